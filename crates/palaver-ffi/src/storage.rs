//! Delivery-queue and message-store entry points.
//!
//! Structured payloads cross the boundary as JSON; byte fields inside the
//! JSON are base64.

use libc::c_char;

use palaver_engine::{QueuedMessage, StoredMessage};

use crate::engine::{cstr, engine_ref, guard, write_json, PalaverEngine};
use crate::error::{invalid_input, map_error};
use crate::ErrorCode;

/// Enqueue a message for later delivery. `msg_json` is a serialized
/// queued message.
///
/// # Safety
///
/// `handle` must be a live engine handle; `msg_json` must be a valid
/// null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn palaver_enqueue(
    handle: *mut PalaverEngine,
    msg_json: *const c_char,
) -> ErrorCode {
    if handle.is_null() || msg_json.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_enqueue", || {
        let msg_json = match unsafe { cstr(msg_json) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        let msg: QueuedMessage = match serde_json::from_str(msg_json) {
            Ok(msg) => msg,
            Err(e) => return invalid_input(&format!("bad queued message JSON: {e}")),
        };
        unsafe { engine_ref(handle) }.queue().enqueue(msg);
        ErrorCode::Success
    })
}

/// Write a JSON array of every queued message, oldest first.
///
/// # Safety
///
/// `handle` must be a live engine handle; `out_json` must be valid. Free
/// the written string with `palaver_string_free`.
#[no_mangle]
pub unsafe extern "C" fn palaver_list_queued(
    handle: *mut PalaverEngine,
    out_json: *mut *mut c_char,
) -> ErrorCode {
    if handle.is_null() || out_json.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_list_queued", || {
        let snapshot = unsafe { engine_ref(handle) }.queue().snapshot();
        unsafe { write_json(&snapshot, out_json) }
    })
}

/// Remove queued messages by id. `ids_json` is a JSON array of strings;
/// unknown ids are ignored.
///
/// # Safety
///
/// `handle` must be a live engine handle; `ids_json` must be a valid
/// null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn palaver_clear_queued(
    handle: *mut PalaverEngine,
    ids_json: *const c_char,
) -> ErrorCode {
    if handle.is_null() || ids_json.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_clear_queued", || {
        let ids_json = match unsafe { cstr(ids_json) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        let ids: Vec<String> = match serde_json::from_str(ids_json) {
            Ok(ids) => ids,
            Err(e) => return invalid_input(&format!("bad id list JSON: {e}")),
        };
        unsafe { engine_ref(handle) }.queue().clear(&ids);
        ErrorCode::Success
    })
}

/// Persist a message to the encrypted store. `msg_json` is a serialized
/// stored message; an existing row with the same id is replaced.
///
/// # Safety
///
/// `handle` must be a live engine handle; `msg_json` must be a valid
/// null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn palaver_store_message(
    handle: *mut PalaverEngine,
    msg_json: *const c_char,
) -> ErrorCode {
    if handle.is_null() || msg_json.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_store_message", || {
        let msg_json = match unsafe { cstr(msg_json) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        let msg: StoredMessage = match serde_json::from_str(msg_json) {
            Ok(msg) => msg,
            Err(e) => return invalid_input(&format!("bad stored message JSON: {e}")),
        };
        match unsafe { engine_ref(handle) }.store_message(&msg) {
            Ok(()) => ErrorCode::Success,
            Err(e) => map_error(&e),
        }
    })
}

/// Write a JSON array of a conversation's stored messages, newest first.
///
/// # Safety
///
/// `handle` must be a live engine handle; `conversation_id` must be a
/// valid null-terminated string; `out_json` must be valid. Free the
/// written string with `palaver_string_free`.
#[no_mangle]
pub unsafe extern "C" fn palaver_list_messages(
    handle: *mut PalaverEngine,
    conversation_id: *const c_char,
    limit: u32,
    offset: u32,
    out_json: *mut *mut c_char,
) -> ErrorCode {
    if handle.is_null() || conversation_id.is_null() || out_json.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_list_messages", || {
        let conversation_id = match unsafe { cstr(conversation_id) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        match unsafe { engine_ref(handle) }.list_messages(conversation_id, limit, offset) {
            Ok(messages) => unsafe { write_json(&messages, out_json) },
            Err(e) => map_error(&e),
        }
    })
}

/// Write the session for `peer_id` to the encrypted store.
///
/// # Safety
///
/// `handle` must be a live engine handle; `peer_id` must be a valid
/// null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn palaver_persist_session(
    handle: *mut PalaverEngine,
    peer_id: *const c_char,
) -> ErrorCode {
    if handle.is_null() || peer_id.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_persist_session", || {
        let peer_id = match unsafe { cstr(peer_id) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        match unsafe { engine_ref(handle) }.persist_session(peer_id) {
            Ok(()) => ErrorCode::Success,
            Err(e) => map_error(&e),
        }
    })
}

/// Load the session for `peer_id` from the encrypted store, replacing
/// any in-memory session for that peer.
///
/// # Safety
///
/// Same contract as [`palaver_persist_session`].
#[no_mangle]
pub unsafe extern "C" fn palaver_restore_session(
    handle: *mut PalaverEngine,
    peer_id: *const c_char,
) -> ErrorCode {
    if handle.is_null() || peer_id.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_restore_session", || {
        let peer_id = match unsafe { cstr(peer_id) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        match unsafe { engine_ref(handle) }.restore_session(peer_id) {
            Ok(()) => ErrorCode::Success,
            Err(e) => map_error(&e),
        }
    })
}
