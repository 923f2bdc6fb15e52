use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("identity not initialized")]
    NotInitialized,

    #[error("invalid peer keys: {0}")]
    InvalidPeerKeys(String),

    #[error("key agreement failed: degenerate curve point")]
    KeyAgreementFailed,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("ciphertext too short: {len} bytes, need at least {min}")]
    CiphertextTooShort { len: usize, min: usize },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid session state: {0}")]
    InvalidSessionState(String),
}
