//! # palaver-ffi
//!
//! C-compatible boundary for the Palaver engine.
//!
//! Every operation is a stateless request/response call: UTF-8 strings and
//! length-tagged byte buffers in, an integer status code out, with any
//! structured payload JSON-encoded (binary fields base64). Buffers
//! allocated by the library must be released with the paired free
//! functions ([`buffers::palaver_string_free`],
//! [`buffers::palaver_bytes_free`]).
//!
//! ## Safety
//!
//! All entry points null-check their arguments and catch panics before
//! they can unwind across the C boundary. Error codes are returned instead
//! of exceptions; a human-readable description of the most recent failure
//! on the calling thread is available from [`error::palaver_last_error`].

pub mod buffers;
pub mod engine;
pub mod error;
pub mod storage;

pub use buffers::PalaverBuffer;
pub use engine::PalaverEngine;

/// Status codes returned by every FFI entry point.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Success.
    Success = 0,
    /// A required pointer argument was null.
    NullPointer = -1,
    /// Malformed input: bad UTF-8, bad JSON, bad key lengths, short ciphertext.
    InvalidInput = -2,
    /// Operation requires a generated identity.
    NotInitialized = -3,
    /// No established session for the requested peer.
    NoSession = -4,
    /// Key agreement hit a degenerate curve point.
    KeyAgreementFailed = -5,
    /// AEAD tag mismatch: tampering or chain desynchronization.
    AuthenticationFailed = -6,
    /// Underlying disk/database error.
    StorageFailure = -7,
    /// Lookup miss.
    NotFound = -8,
    /// Panic or other internal failure.
    Internal = -99,
}
