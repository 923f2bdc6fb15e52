//! The engine instance.
//!
//! One `Engine` owns everything shared across calls: the single process
//! identity, the `peer_id → Session` map, the delivery queue, and the
//! encrypted store. Nothing is global, so multiple engines (tests, multiple
//! profiles) coexist without colliding.
//!
//! Sessions are guarded by engine-owned locks — one mutex per peer inside
//! a read-write-locked map — so concurrent calls for different peers run
//! in parallel while calls for the same peer serialize. The foreign-call
//! boundary cannot enforce caller discipline, so the engine does.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::{Mutex, RwLock};

use palaver_crypto::{KeyManager, PublicKeyBundle, Session, SessionRole};
use palaver_store::{EncryptedStore, StoredMessage};

use crate::error::EngineError;
use crate::queue::DeliveryQueue;

pub struct Engine {
    keys: Mutex<KeyManager>,
    sessions: RwLock<HashMap<String, Mutex<Session>>>,
    queue: DeliveryQueue,
    store: Mutex<EncryptedStore>,
}

impl Engine {
    /// Open an engine backed by the encrypted store at `path`.
    ///
    /// This is the only blocking-on-disk entry point besides the store
    /// operations themselves; everything cryptographic is in-memory.
    pub fn open(path: &Path, passphrase: &str) -> Result<Self, EngineError> {
        let store = EncryptedStore::open(path, passphrase)?;
        Ok(Self {
            keys: Mutex::new(KeyManager::new()),
            sessions: RwLock::new(HashMap::new()),
            queue: DeliveryQueue::new(),
            store: Mutex::new(store),
        })
    }

    /// Generate (or regenerate) the process identity and return its
    /// shareable public bundle.
    pub fn generate_identity(&self) -> PublicKeyBundle {
        self.keys.lock().generate_identity()
    }

    /// The public bundle of the current identity.
    pub fn public_bundle(&self) -> Result<PublicKeyBundle, EngineError> {
        Ok(self.keys.lock().public_bundle()?)
    }

    /// Establish (or re-establish) a session with a peer from their
    /// public bundle. A previous session for the peer is replaced.
    ///
    /// The chain-ordering role is chosen deterministically: the side with
    /// the lexicographically smaller identity public key takes the
    /// initiator ordering. Both peers compute the same comparison from the
    /// same two keys, so independently established sessions mirror each
    /// other.
    pub fn establish_session(
        &self,
        peer_id: &str,
        peer_bundle: &PublicKeyBundle,
    ) -> Result<(), EngineError> {
        let session = {
            let keys = self.keys.lock();
            let local_identity = keys.identity_public_key()?;
            let role = if local_identity.as_slice() <= peer_bundle.identity_public_key.as_slice() {
                SessionRole::Initiator
            } else {
                SessionRole::Responder
            };
            Session::establish(peer_id, role, keys.agreement_secret()?, peer_bundle)?
        };

        self.sessions
            .write()
            .insert(peer_id.to_string(), Mutex::new(session));
        tracing::debug!(peer = %peer_id, "session established");
        Ok(())
    }

    /// Whether an in-memory session exists for this peer.
    pub fn has_session(&self, peer_id: &str) -> bool {
        self.sessions.read().contains_key(peer_id)
    }

    /// Encrypt a message for a peer over the established session.
    pub fn encrypt(&self, peer_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(peer_id)
            .ok_or_else(|| EngineError::NoSession(peer_id.to_string()))?;
        let result = session.lock().encrypt(plaintext)?;
        Ok(result)
    }

    /// Decrypt the next message from a peer.
    pub fn decrypt(&self, peer_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>, EngineError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(peer_id)
            .ok_or_else(|| EngineError::NoSession(peer_id.to_string()))?;
        let result = session.lock().decrypt(ciphertext).map_err(|e| {
            tracing::warn!(peer = %peer_id, error = %e, "decrypt failed");
            EngineError::from(e)
        });
        result
    }

    /// The offline delivery queue.
    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Persist a message record.
    pub fn store_message(&self, msg: &StoredMessage) -> Result<(), EngineError> {
        Ok(self.store.lock().put_message(msg)?)
    }

    /// Fetch a stored message by id.
    pub fn get_message(&self, id: &str) -> Result<StoredMessage, EngineError> {
        Ok(self.store.lock().get_message(id)?)
    }

    /// List a conversation's stored messages, newest first.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>, EngineError> {
        Ok(self.store.lock().list_messages(conversation_id, limit, offset)?)
    }

    /// Write a peer's current session state to the store.
    ///
    /// The in-memory session map is not durable on its own; the hosting
    /// application decides when state is worth persisting.
    pub fn persist_session(&self, peer_id: &str) -> Result<(), EngineError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(peer_id)
            .ok_or_else(|| EngineError::NoSession(peer_id.to_string()))?;
        let blob = session.lock().to_bytes();
        self.store.lock().put_session(peer_id, &blob)?;
        Ok(())
    }

    /// Load a peer's session state from the store, replacing any
    /// in-memory session for that peer.
    pub fn restore_session(&self, peer_id: &str) -> Result<(), EngineError> {
        let blob = self.store.lock().get_session(peer_id)?;
        let session = Session::from_bytes(&blob)?;
        self.sessions
            .write()
            .insert(peer_id.to_string(), Mutex::new(session));
        Ok(())
    }
}
