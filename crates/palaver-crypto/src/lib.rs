pub mod encoding;
pub mod error;
pub mod keys;
pub mod session;

pub use error::CryptoError;
pub use keys::{IdentityKeyBundle, KeyManager, OneTimePrekey, PublicKeyBundle};
pub use session::{Session, SessionRole, NONCE_LEN};
