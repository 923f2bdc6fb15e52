//! Buffer ownership across the boundary.
//!
//! Anything the library allocates and hands to the host must come back
//! through the matching free function exactly once.

use std::ffi::CString;

use libc::c_char;

/// A length-tagged byte buffer allocated by the library.
///
/// Release with [`palaver_bytes_free`]. A null `data` with zero `len`
/// represents the empty buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PalaverBuffer {
    pub data: *mut u8,
    pub len: usize,
}

impl PalaverBuffer {
    pub(crate) fn empty() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
        }
    }

    /// Move a vector across the boundary.
    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        let mut boxed = bytes.into_boxed_slice();
        let buffer = Self {
            data: boxed.as_mut_ptr(),
            len: boxed.len(),
        };
        std::mem::forget(boxed);
        buffer
    }
}

/// Move a JSON string across the boundary as a C string, or `None` if it
/// contains an interior nul (serde_json escapes control characters, so
/// this does not happen for payloads we produce).
pub(crate) fn into_c_string(json: String) -> Option<*mut c_char> {
    CString::new(json).ok().map(CString::into_raw)
}

/// Release a string returned by this library.
///
/// # Safety
///
/// `ptr` must be a pointer previously returned by a `palaver_*` function,
/// or null; it must not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn palaver_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Release a byte buffer returned by this library.
///
/// # Safety
///
/// `buffer` must have been returned by a `palaver_*` function and must not
/// be used after this call.
#[no_mangle]
pub unsafe extern "C" fn palaver_bytes_free(buffer: PalaverBuffer) {
    if !buffer.data.is_null() {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
            buffer.data,
            buffer.len,
        )));
    }
}
