pub mod error;
pub mod message;
pub mod store;

pub use error::StoreError;
pub use message::{MessageStatus, StoredMessage};
pub use store::EncryptedStore;
