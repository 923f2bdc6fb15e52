//! Offline delivery queue.
//!
//! Ciphertext that could not be handed to the network is parked here until
//! the hosting application retries and confirms delivery. The queue is
//! internally locked and safe for concurrent use from any number of
//! threads; growth is unbounded and entries have no expiry — removal only
//! happens when the caller confirms delivery by id.

use std::collections::{HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use palaver_crypto::encoding::b64;

/// A ciphertext waiting for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub recipient_id: String,
    /// Sealed message bytes; base64 in JSON.
    #[serde(with = "b64")]
    pub encrypted_content: Vec<u8>,
    /// Unix timestamp (seconds) when the message was queued.
    pub created_at: i64,
    /// Retry count, incremented by the caller on each attempt.
    pub attempts: u32,
}

impl QueuedMessage {
    /// Create a fresh entry stamped with the current time.
    pub fn new(id: String, recipient_id: String, encrypted_content: Vec<u8>) -> Self {
        Self {
            id,
            recipient_id,
            encrypted_content,
            created_at: unix_now(),
            attempts: 0,
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Thread-safe FIFO of undelivered messages.
#[derive(Default)]
pub struct DeliveryQueue {
    inner: Mutex<VecDeque<QueuedMessage>>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the back of the queue.
    pub fn enqueue(&self, msg: QueuedMessage) {
        self.inner.lock().push_back(msg);
    }

    /// Atomically pop and return the oldest message, if any.
    pub fn dequeue(&self) -> Option<QueuedMessage> {
        self.inner.lock().pop_front()
    }

    /// The oldest message without removing it.
    pub fn peek(&self) -> Option<QueuedMessage> {
        self.inner.lock().front().cloned()
    }

    /// An independent copy of the whole queue at this moment.
    pub fn snapshot(&self) -> Vec<QueuedMessage> {
        self.inner.lock().iter().cloned().collect()
    }

    /// Messages for one recipient, in queue order.
    pub fn for_recipient(&self, recipient_id: &str) -> Vec<QueuedMessage> {
        self.inner
            .lock()
            .iter()
            .filter(|m| m.recipient_id == recipient_id)
            .cloned()
            .collect()
    }

    /// Remove every entry whose id is in `ids`; unknown ids are ignored.
    pub fn clear(&self, ids: &[String]) {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.inner.lock().retain(|m| !ids.contains(m.id.as_str()));
    }

    /// Bump the attempt counter for `id`; no-op if the id is absent.
    pub fn increment_attempts(&self, id: &str) {
        if let Some(msg) = self.inner.lock().iter_mut().find(|m| m.id == id) {
            msg.attempts += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
