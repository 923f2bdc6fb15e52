use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),
}
