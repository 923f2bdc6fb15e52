use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Crypto(#[from] palaver_crypto::CryptoError),

    #[error(transparent)]
    Store(#[from] palaver_store::StoreError),

    #[error("no session with peer {0}")]
    NoSession(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
