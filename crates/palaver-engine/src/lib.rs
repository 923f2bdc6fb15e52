pub mod engine;
pub mod error;
pub mod queue;

pub use engine::Engine;
pub use error::EngineError;
pub use queue::{DeliveryQueue, QueuedMessage};

// The crates the boundary layer needs types from.
pub use palaver_crypto::{CryptoError, PublicKeyBundle};
pub use palaver_store::{MessageStatus, StoreError, StoredMessage};
