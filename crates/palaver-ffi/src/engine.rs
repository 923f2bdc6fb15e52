//! Engine lifecycle, identity, and session entry points.

use std::ffi::CStr;
use std::panic::AssertUnwindSafe;
use std::path::Path;

use libc::c_char;

use palaver_engine::{Engine, PublicKeyBundle};

use crate::buffers::{into_c_string, PalaverBuffer};
use crate::error::{invalid_input, map_error, set_last_error};
use crate::ErrorCode;

/// Opaque engine handle. Create with [`palaver_engine_open`], release with
/// [`palaver_engine_close`].
pub struct PalaverEngine {
    pub(crate) engine: Engine,
}

/// Run an entry-point body, converting panics to [`ErrorCode::Internal`]
/// instead of unwinding across the C boundary.
pub(crate) fn guard<F: FnOnce() -> ErrorCode>(name: &str, body: F) -> ErrorCode {
    match std::panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(code) => code,
        Err(_) => {
            set_last_error(&format!("panic in {name}"));
            ErrorCode::Internal
        }
    }
}

/// Borrow a non-null C string as UTF-8.
///
/// # Safety
///
/// `ptr` must be a valid null-terminated string.
pub(crate) unsafe fn cstr<'a>(ptr: *const c_char) -> Result<&'a str, ErrorCode> {
    match unsafe { CStr::from_ptr(ptr) }.to_str() {
        Ok(s) => Ok(s),
        Err(_) => Err(invalid_input("argument is not valid UTF-8")),
    }
}

/// Borrow the engine behind a non-null handle.
///
/// # Safety
///
/// `handle` must be a live pointer from [`palaver_engine_open`].
pub(crate) unsafe fn engine_ref<'a>(handle: *const PalaverEngine) -> &'a Engine {
    &unsafe { &*handle }.engine
}

/// Serialize a payload to JSON and hand it out as a C string.
///
/// # Safety
///
/// `out_json` must be a valid pointer.
pub(crate) unsafe fn write_json<T: serde::Serialize>(
    payload: &T,
    out_json: *mut *mut c_char,
) -> ErrorCode {
    let json = match serde_json::to_string(payload) {
        Ok(json) => json,
        Err(e) => {
            set_last_error(&format!("serialization failed: {e}"));
            return ErrorCode::Internal;
        }
    };
    match into_c_string(json) {
        Some(ptr) => {
            unsafe { *out_json = ptr };
            ErrorCode::Success
        }
        None => {
            set_last_error("payload contains interior nul");
            ErrorCode::Internal
        }
    }
}

/// Open an engine backed by the encrypted store at `path`, unlocked with
/// `passphrase`.
///
/// On success writes a handle to `out_engine`; release it with
/// [`palaver_engine_close`].
///
/// # Safety
///
/// `path` and `passphrase` must be valid null-terminated strings;
/// `out_engine` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn palaver_engine_open(
    path: *const c_char,
    passphrase: *const c_char,
    out_engine: *mut *mut PalaverEngine,
) -> ErrorCode {
    if path.is_null() || passphrase.is_null() || out_engine.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_engine_open", || {
        let path = match unsafe { cstr(path) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        let passphrase = match unsafe { cstr(passphrase) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        match Engine::open(Path::new(path), passphrase) {
            Ok(engine) => {
                let handle = Box::into_raw(Box::new(PalaverEngine { engine }));
                unsafe { *out_engine = handle };
                ErrorCode::Success
            }
            Err(e) => map_error(&e),
        }
    })
}

/// Release an engine handle. Null is a no-op.
///
/// # Safety
///
/// `handle` must be a pointer from [`palaver_engine_open`] that has not
/// already been closed.
#[no_mangle]
pub unsafe extern "C" fn palaver_engine_close(handle: *mut PalaverEngine) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

/// Generate (or regenerate) the identity; writes the public bundle JSON.
///
/// # Safety
///
/// `handle` must be a live engine handle; `out_json` must be valid. Free
/// the written string with `palaver_string_free`.
#[no_mangle]
pub unsafe extern "C" fn palaver_generate_identity(
    handle: *mut PalaverEngine,
    out_json: *mut *mut c_char,
) -> ErrorCode {
    if handle.is_null() || out_json.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_generate_identity", || {
        let bundle = unsafe { engine_ref(handle) }.generate_identity();
        unsafe { write_json(&bundle, out_json) }
    })
}

/// Write the current identity's public bundle JSON.
///
/// # Safety
///
/// Same contract as [`palaver_generate_identity`].
#[no_mangle]
pub unsafe extern "C" fn palaver_public_bundle(
    handle: *mut PalaverEngine,
    out_json: *mut *mut c_char,
) -> ErrorCode {
    if handle.is_null() || out_json.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_public_bundle", || {
        match unsafe { engine_ref(handle) }.public_bundle() {
            Ok(bundle) => unsafe { write_json(&bundle, out_json) },
            Err(e) => map_error(&e),
        }
    })
}

/// Establish a session with `peer_id` from their public bundle JSON.
///
/// # Safety
///
/// `handle` must be a live engine handle; `peer_id` and `bundle_json`
/// must be valid null-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn palaver_establish_session(
    handle: *mut PalaverEngine,
    peer_id: *const c_char,
    bundle_json: *const c_char,
) -> ErrorCode {
    if handle.is_null() || peer_id.is_null() || bundle_json.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_establish_session", || {
        let peer_id = match unsafe { cstr(peer_id) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        let bundle_json = match unsafe { cstr(bundle_json) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        let bundle: PublicKeyBundle = match serde_json::from_str(bundle_json) {
            Ok(bundle) => bundle,
            Err(e) => return invalid_input(&format!("bad bundle JSON: {e}")),
        };
        match unsafe { engine_ref(handle) }.establish_session(peer_id, &bundle) {
            Ok(()) => ErrorCode::Success,
            Err(e) => map_error(&e),
        }
    })
}

/// Write whether a session exists for `peer_id` to `out_has`.
///
/// # Safety
///
/// `handle` must be a live engine handle; `peer_id` must be a valid
/// null-terminated string; `out_has` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn palaver_has_session(
    handle: *mut PalaverEngine,
    peer_id: *const c_char,
    out_has: *mut bool,
) -> ErrorCode {
    if handle.is_null() || peer_id.is_null() || out_has.is_null() {
        return ErrorCode::NullPointer;
    }
    guard("palaver_has_session", || {
        let peer_id = match unsafe { cstr(peer_id) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        let has = unsafe { engine_ref(handle) }.has_session(peer_id);
        unsafe { *out_has = has };
        ErrorCode::Success
    })
}

/// Encrypt `plaintext` for `peer_id`; writes a buffer to `out_ciphertext`.
///
/// # Safety
///
/// `handle` must be a live engine handle; `plaintext` must point to
/// `plaintext_len` readable bytes (null only when the length is zero);
/// `out_ciphertext` must be valid. Free the buffer with
/// `palaver_bytes_free`.
#[no_mangle]
pub unsafe extern "C" fn palaver_encrypt(
    handle: *mut PalaverEngine,
    peer_id: *const c_char,
    plaintext: *const u8,
    plaintext_len: usize,
    out_ciphertext: *mut PalaverBuffer,
) -> ErrorCode {
    if handle.is_null() || peer_id.is_null() || out_ciphertext.is_null() {
        return ErrorCode::NullPointer;
    }
    if plaintext.is_null() && plaintext_len > 0 {
        return ErrorCode::NullPointer;
    }
    guard("palaver_encrypt", || {
        let peer_id = match unsafe { cstr(peer_id) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        let plaintext = if plaintext_len == 0 {
            &[][..]
        } else {
            unsafe { std::slice::from_raw_parts(plaintext, plaintext_len) }
        };
        match unsafe { engine_ref(handle) }.encrypt(peer_id, plaintext) {
            Ok(ciphertext) => {
                unsafe { *out_ciphertext = PalaverBuffer::from_vec(ciphertext) };
                ErrorCode::Success
            }
            Err(e) => {
                unsafe { *out_ciphertext = PalaverBuffer::empty() };
                map_error(&e)
            }
        }
    })
}

/// Decrypt the next message from `peer_id`; writes a buffer to
/// `out_plaintext`.
///
/// # Safety
///
/// Same contract as [`palaver_encrypt`].
#[no_mangle]
pub unsafe extern "C" fn palaver_decrypt(
    handle: *mut PalaverEngine,
    peer_id: *const c_char,
    ciphertext: *const u8,
    ciphertext_len: usize,
    out_plaintext: *mut PalaverBuffer,
) -> ErrorCode {
    if handle.is_null() || peer_id.is_null() || out_plaintext.is_null() {
        return ErrorCode::NullPointer;
    }
    if ciphertext.is_null() && ciphertext_len > 0 {
        return ErrorCode::NullPointer;
    }
    guard("palaver_decrypt", || {
        let peer_id = match unsafe { cstr(peer_id) } {
            Ok(s) => s,
            Err(code) => return code,
        };
        let ciphertext = if ciphertext_len == 0 {
            &[][..]
        } else {
            unsafe { std::slice::from_raw_parts(ciphertext, ciphertext_len) }
        };
        match unsafe { engine_ref(handle) }.decrypt(peer_id, ciphertext) {
            Ok(plaintext) => {
                unsafe { *out_plaintext = PalaverBuffer::from_vec(plaintext) };
                ErrorCode::Success
            }
            Err(e) => {
                unsafe { *out_plaintext = PalaverBuffer::empty() };
                map_error(&e)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::{CStr, CString};

    use tempfile::TempDir;

    use crate::buffers::{palaver_bytes_free, palaver_string_free};

    use super::*;

    unsafe fn open(dir: &TempDir, name: &str) -> *mut PalaverEngine {
        let path = CString::new(dir.path().join(name).to_str().unwrap()).unwrap();
        let passphrase = CString::new("passphrase").unwrap();
        let mut handle: *mut PalaverEngine = std::ptr::null_mut();
        let code = palaver_engine_open(path.as_ptr(), passphrase.as_ptr(), &mut handle);
        assert_eq!(code, ErrorCode::Success);
        handle
    }

    unsafe fn identity_json(handle: *mut PalaverEngine) -> String {
        let mut json: *mut c_char = std::ptr::null_mut();
        assert_eq!(
            palaver_generate_identity(handle, &mut json),
            ErrorCode::Success
        );
        let owned = CStr::from_ptr(json).to_str().unwrap().to_string();
        palaver_string_free(json);
        owned
    }

    #[test]
    fn null_arguments_are_rejected_up_front() {
        unsafe {
            let mut handle: *mut PalaverEngine = std::ptr::null_mut();
            assert_eq!(
                palaver_engine_open(std::ptr::null(), std::ptr::null(), &mut handle),
                ErrorCode::NullPointer
            );
            assert_eq!(
                palaver_generate_identity(std::ptr::null_mut(), std::ptr::null_mut()),
                ErrorCode::NullPointer
            );
        }
    }

    #[test]
    fn public_bundle_before_identity_reports_not_initialized() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let handle = open(&dir, "a.db");
            let mut json: *mut c_char = std::ptr::null_mut();
            assert_eq!(
                palaver_public_bundle(handle, &mut json),
                ErrorCode::NotInitialized
            );
            let message = CStr::from_ptr(crate::error::palaver_last_error());
            assert!(message.to_str().unwrap().contains("not initialized"));
            palaver_engine_close(handle);
        }
    }

    #[test]
    fn full_exchange_through_the_boundary() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let alice = open(&dir, "alice.db");
            let bob = open(&dir, "bob.db");

            let alice_bundle = CString::new(identity_json(alice)).unwrap();
            let bob_bundle = CString::new(identity_json(bob)).unwrap();

            let bob_id = CString::new("bob").unwrap();
            let alice_id = CString::new("alice").unwrap();
            assert_eq!(
                palaver_establish_session(alice, bob_id.as_ptr(), bob_bundle.as_ptr()),
                ErrorCode::Success
            );
            assert_eq!(
                palaver_establish_session(bob, alice_id.as_ptr(), alice_bundle.as_ptr()),
                ErrorCode::Success
            );

            let mut has = false;
            assert_eq!(
                palaver_has_session(alice, bob_id.as_ptr(), &mut has),
                ErrorCode::Success
            );
            assert!(has);

            let plaintext = b"hello";
            let mut ciphertext = PalaverBuffer::empty();
            assert_eq!(
                palaver_encrypt(
                    alice,
                    bob_id.as_ptr(),
                    plaintext.as_ptr(),
                    plaintext.len(),
                    &mut ciphertext,
                ),
                ErrorCode::Success
            );

            let mut decrypted = PalaverBuffer::empty();
            assert_eq!(
                palaver_decrypt(
                    bob,
                    alice_id.as_ptr(),
                    ciphertext.data,
                    ciphertext.len,
                    &mut decrypted,
                ),
                ErrorCode::Success
            );
            let view = std::slice::from_raw_parts(decrypted.data, decrypted.len);
            assert_eq!(view, plaintext);

            palaver_bytes_free(ciphertext);
            palaver_bytes_free(decrypted);
            palaver_engine_close(alice);
            palaver_engine_close(bob);
        }
    }

    #[test]
    fn bad_bundle_json_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let handle = open(&dir, "a.db");
            identity_json(handle);

            let peer = CString::new("bob").unwrap();
            let junk = CString::new("{not json").unwrap();
            assert_eq!(
                palaver_establish_session(handle, peer.as_ptr(), junk.as_ptr()),
                ErrorCode::InvalidInput
            );
            palaver_engine_close(handle);
        }
    }

    #[test]
    fn decrypt_without_session_reports_no_session() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let handle = open(&dir, "a.db");
            identity_json(handle);

            let peer = CString::new("stranger").unwrap();
            let data = [0u8; 24];
            let mut out = PalaverBuffer::empty();
            assert_eq!(
                palaver_decrypt(handle, peer.as_ptr(), data.as_ptr(), data.len(), &mut out),
                ErrorCode::NoSession
            );
            palaver_engine_close(handle);
        }
    }
}
