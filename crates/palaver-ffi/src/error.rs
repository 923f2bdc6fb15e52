//! Error-code mapping and the per-thread last-error message.

use std::cell::RefCell;
use std::ffi::CString;

use libc::c_char;

use palaver_engine::{CryptoError, EngineError, StoreError};

use crate::ErrorCode;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

/// Record the message to be returned by [`palaver_last_error`].
pub(crate) fn set_last_error(message: &str) {
    // Interior nuls cannot appear in our own error text, but don't trust it.
    let sanitized = message.replace('\0', " ");
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

/// Map an engine error to its status code, recording the message.
pub(crate) fn map_error(err: &EngineError) -> ErrorCode {
    set_last_error(&err.to_string());
    match err {
        EngineError::Crypto(e) => match e {
            CryptoError::NotInitialized => ErrorCode::NotInitialized,
            CryptoError::InvalidPeerKeys(_) | CryptoError::CiphertextTooShort { .. } => {
                ErrorCode::InvalidInput
            }
            CryptoError::KeyAgreementFailed => ErrorCode::KeyAgreementFailed,
            CryptoError::AuthenticationFailed => ErrorCode::AuthenticationFailed,
            CryptoError::EncryptionFailed(_) | CryptoError::InvalidSessionState(_) => {
                ErrorCode::Internal
            }
        },
        EngineError::Store(e) => match e {
            StoreError::Storage(_) => ErrorCode::StorageFailure,
            StoreError::NotFound(_) => ErrorCode::NotFound,
        },
        EngineError::NoSession(_) => ErrorCode::NoSession,
        EngineError::InvalidInput(_) => ErrorCode::InvalidInput,
    }
}

/// Record an invalid-input failure and return its code.
pub(crate) fn invalid_input(message: &str) -> ErrorCode {
    set_last_error(message);
    ErrorCode::InvalidInput
}

/// A description of the most recent failure on the calling thread.
///
/// The returned pointer stays valid until the next failing call on the
/// same thread; do not free it.
#[no_mangle]
pub extern "C" fn palaver_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ptr())
}

#[cfg(test)]
mod tests {
    use std::ffi::CStr;

    use super::*;

    #[test]
    fn last_error_reflects_most_recent_failure() {
        set_last_error("first failure");
        set_last_error("second failure");
        let text = unsafe { CStr::from_ptr(palaver_last_error()) };
        assert_eq!(text.to_str().unwrap(), "second failure");
    }

    #[test]
    fn interior_nul_does_not_truncate_silently() {
        set_last_error("bad\0value");
        let text = unsafe { CStr::from_ptr(palaver_last_error()) };
        assert_eq!(text.to_str().unwrap(), "bad value");
    }

    #[test]
    fn codes_cover_the_taxonomy() {
        let err = EngineError::Crypto(CryptoError::AuthenticationFailed);
        assert_eq!(map_error(&err), ErrorCode::AuthenticationFailed);

        let err = EngineError::Crypto(CryptoError::NotInitialized);
        assert_eq!(map_error(&err), ErrorCode::NotInitialized);

        let err = EngineError::NoSession("bob".into());
        assert_eq!(map_error(&err), ErrorCode::NoSession);

        let err = EngineError::Store(StoreError::NotFound("m1".into()));
        assert_eq!(map_error(&err), ErrorCode::NotFound);
    }
}
