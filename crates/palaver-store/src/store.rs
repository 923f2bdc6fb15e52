//! SQLCipher-backed storage.
//!
//! The database file is encrypted at rest with a key derived from the
//! user's passphrase via Argon2id. Inside the process the store is a
//! plain key-value/relational sink: callers decide what (and whether)
//! content is end-to-end encrypted before it gets here.

use std::path::Path;

use rusqlite::{params, Connection};
use zeroize::Zeroizing;

use crate::error::StoreError;
use crate::message::{MessageStatus, StoredMessage};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL,
        sender_id TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending'
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages(conversation_id, timestamp DESC);

    CREATE TABLE IF NOT EXISTS sessions (
        peer_id TEXT PRIMARY KEY,
        session_data BLOB NOT NULL,
        updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    );
";

/// Passphrase-protected persistent store for messages and opaque session
/// blobs. Not internally synchronized; the engine serializes access.
pub struct EncryptedStore {
    conn: Connection,
}

impl EncryptedStore {
    /// Open (or create) the encrypted database at `path`.
    ///
    /// A wrong passphrase surfaces as a `Storage` error here, on the first
    /// read of the existing file.
    pub fn open(path: &Path, passphrase: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        let key = derive_key(passphrase);
        conn.execute_batch(&format!("PRAGMA key = \"x'{}'\";", hex::encode(key.as_slice())))?;
        conn.execute_batch(SCHEMA)?;

        tracing::debug!(path = %path.display(), "encrypted store opened");
        Ok(Self { conn })
    }

    /// Insert or replace a message record (same id overwrites).
    pub fn put_message(&self, msg: &StoredMessage) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO messages (id, conversation_id, sender_id, content, timestamp, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                msg.id,
                msg.conversation_id,
                msg.sender_id,
                msg.content,
                msg.timestamp,
                msg.status.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single message by id.
    pub fn get_message(&self, id: &str) -> Result<StoredMessage, StoreError> {
        self.conn
            .query_row(
                "SELECT id, conversation_id, sender_id, content, timestamp, status \
                 FROM messages WHERE id = ?1",
                params![id],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("message {id}"))
                }
                other => StoreError::Storage(other),
            })
    }

    /// List a conversation's messages, newest first, with paging.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, conversation_id, sender_id, content, timestamp, status \
             FROM messages WHERE conversation_id = ?1 \
             ORDER BY timestamp DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![conversation_id, limit, offset], row_to_message)?;
        let messages = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Insert or replace a peer's serialized session state.
    pub fn put_session(&self, peer_id: &str, session_data: &[u8]) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sessions (peer_id, session_data, updated_at) \
             VALUES (?1, ?2, strftime('%s', 'now'))",
            params![peer_id, session_data],
        )?;
        Ok(())
    }

    /// Fetch a peer's serialized session state.
    pub fn get_session(&self, peer_id: &str) -> Result<Vec<u8>, StoreError> {
        self.conn
            .query_row(
                "SELECT session_data FROM sessions WHERE peer_id = ?1",
                params![peer_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("session for {peer_id}"))
                }
                other => StoreError::Storage(other),
            })
    }

    /// Whether a stored session exists for this peer.
    pub fn has_session(&self, peer_id: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE peer_id = ?1",
            params![peer_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<StoredMessage, rusqlite::Error> {
    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        timestamp: row.get(4)?,
        status: MessageStatus::parse(&row.get::<_, String>(5)?),
    })
}

/// Derive the 32-byte SQLCipher key from a passphrase using Argon2id.
///
/// Production: `m=65536, t=3, p=4`. Test builds: `m=256, t=1, p=1` for fast
/// iteration.
fn derive_key(passphrase: &str) -> Zeroizing<[u8; 32]> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let salt = b"palaver-store-salt";

    #[cfg(debug_assertions)]
    let params = Params::new(256, 1, 1, Some(32)).expect("invalid argon2 params");
    #[cfg(not(debug_assertions))]
    let params = Params::new(65536, 3, 4, Some(32)).expect("invalid argon2 params");

    let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    hasher
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut())
        .expect("argon2 hash failed");
    key
}
