//! Pairwise encrypted sessions with a symmetric key ratchet.
//!
//! A session is established by X25519 key agreement between the local
//! signed prekey and the peer's, expanded with HKDF-SHA256 into a root key
//! and two chain keys. Each message consumes exactly one key derived from
//! the corresponding chain, so a key is never reused and knowledge of a
//! later chain key does not reveal earlier ones (forward secrecy for past
//! messages).
//!
//! The ratchet is symmetric only: there is no fresh Diffie-Hellman step
//! per message, so a chain-key compromise exposes all later messages on
//! that chain until the session is re-established. Decryption is strictly
//! in-order — a lost message permanently desynchronizes the receive chain.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::keys::PublicKeyBundle;

/// AES-GCM nonce length; also the minimum ciphertext length.
pub const NONCE_LEN: usize = 12;

const CHAIN_KEY_LEN: usize = 32;
// Context labels keep session-level and per-message HKDF outputs in
// separate derivation domains.
const SESSION_INFO: &[u8] = b"palaver/session/v1";
const MESSAGE_INFO: &[u8] = b"palaver/message/v1";

/// Which side of the key agreement this session is.
///
/// Both sides derive the same three HKDF outputs; the responder swaps the
/// send and receive chains so that each side's send chain matches the
/// other's receive chain. Callers must assign the roles consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Initiator,
    Responder,
}

/// An established session with one peer.
///
/// Mutated by every [`encrypt`](Session::encrypt) /
/// [`decrypt`](Session::decrypt) call; replaced chain keys are zeroized,
/// and the whole state zeroizes on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Session {
    peer_id: String,
    root_key: [u8; CHAIN_KEY_LEN],
    send_chain_key: [u8; CHAIN_KEY_LEN],
    recv_chain_key: [u8; CHAIN_KEY_LEN],
    send_counter: u32,
    recv_counter: u32,
}

impl Session {
    /// Establish a session from the peer's public bundle.
    ///
    /// Validates the bundle (lengths and prekey signature) before any
    /// agreement is attempted, performs X25519 between the local agreement
    /// secret and the peer's signed prekey, and expands the shared secret
    /// into root, send, and receive keys. Counters start at zero.
    pub fn establish(
        peer_id: &str,
        role: SessionRole,
        local_secret: &StaticSecret,
        peer_bundle: &PublicKeyBundle,
    ) -> Result<Self, CryptoError> {
        peer_bundle.verify()?;
        let their_key = peer_bundle.agreement_key()?;

        let shared = local_secret.diffie_hellman(&their_key);
        // A low-order peer point yields an all-zero shared secret.
        if !shared.was_contributory() {
            return Err(CryptoError::KeyAgreementFailed);
        }

        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut okm = [0u8; 3 * CHAIN_KEY_LEN];
        hk.expand(SESSION_INFO, &mut okm)
            .map_err(|e| CryptoError::InvalidSessionState(format!("HKDF expand: {e}")))?;

        let mut root_key = [0u8; CHAIN_KEY_LEN];
        let mut send_chain_key = [0u8; CHAIN_KEY_LEN];
        let mut recv_chain_key = [0u8; CHAIN_KEY_LEN];
        root_key.copy_from_slice(&okm[..32]);
        match role {
            SessionRole::Initiator => {
                send_chain_key.copy_from_slice(&okm[32..64]);
                recv_chain_key.copy_from_slice(&okm[64..96]);
            }
            SessionRole::Responder => {
                recv_chain_key.copy_from_slice(&okm[32..64]);
                send_chain_key.copy_from_slice(&okm[64..96]);
            }
        }
        okm.zeroize();

        Ok(Self {
            peer_id: peer_id.to_string(),
            root_key,
            send_chain_key,
            recv_chain_key,
            send_counter: 0,
            recv_counter: 0,
        })
    }

    /// Encrypt a message for the peer.
    ///
    /// Derives a one-time key from the send chain, seals the plaintext
    /// under AES-256-GCM with a fresh random nonce (no associated data),
    /// and advances the chain. Output is `nonce || ciphertext || tag`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (mut message_key, next_chain_key) =
            derive_next(&self.send_chain_key, self.send_counter)?;

        let cipher = Aes256Gcm::new_from_slice(&message_key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        message_key.zeroize();

        self.send_chain_key.zeroize();
        self.send_chain_key = next_chain_key;
        self.send_counter += 1;

        let mut output = Vec::with_capacity(NONCE_LEN + sealed.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&sealed);
        Ok(output)
    }

    /// Decrypt the next message from the peer.
    ///
    /// Consumes exactly the next key in the receive chain. The chain only
    /// advances when the tag verifies, so a tampered ciphertext does not
    /// burn the key the genuine message needs. `AuthenticationFailed`
    /// covers both tampering and chain desynchronization — the two are
    /// deliberately indistinguishable to the caller.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(CryptoError::CiphertextTooShort {
                len: ciphertext.len(),
                min: NONCE_LEN,
            });
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);

        let (mut message_key, mut next_chain_key) =
            derive_next(&self.recv_chain_key, self.recv_counter)?;

        let cipher = Aes256Gcm::new_from_slice(&message_key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let opened = cipher.decrypt(Nonce::from_slice(nonce_bytes), sealed);
        message_key.zeroize();

        match opened {
            Ok(plaintext) => {
                self.recv_chain_key.zeroize();
                self.recv_chain_key = next_chain_key;
                self.recv_counter += 1;
                Ok(plaintext)
            }
            Err(_) => {
                next_chain_key.zeroize();
                Err(CryptoError::AuthenticationFailed)
            }
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn send_counter(&self) -> u32 {
        self.send_counter
    }

    pub fn recv_counter(&self) -> u32 {
        self.recv_counter
    }

    /// Serialize the session state as an opaque blob for durable storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let peer = self.peer_id.as_bytes();
        let mut data = Vec::with_capacity(4 + peer.len() + 3 * CHAIN_KEY_LEN + 8);
        data.extend_from_slice(&u32::try_from(peer.len()).unwrap_or(u32::MAX).to_le_bytes());
        data.extend_from_slice(peer);
        data.extend_from_slice(&self.root_key);
        data.extend_from_slice(&self.send_chain_key);
        data.extend_from_slice(&self.recv_chain_key);
        data.extend_from_slice(&self.send_counter.to_le_bytes());
        data.extend_from_slice(&self.recv_counter.to_le_bytes());
        data
    }

    /// Restore a session from a blob produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        let corrupt = || CryptoError::InvalidSessionState("corrupt session blob".into());

        let peer_len = data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or_else(corrupt)? as usize;
        let expected = 4 + peer_len + 3 * CHAIN_KEY_LEN + 8;
        if data.len() != expected {
            return Err(corrupt());
        }

        let mut pos = 4;
        let peer_id = std::str::from_utf8(&data[pos..pos + peer_len])
            .map_err(|_| corrupt())?
            .to_string();
        pos += peer_len;

        let take_key = |pos: &mut usize| {
            let mut key = [0u8; CHAIN_KEY_LEN];
            key.copy_from_slice(&data[*pos..*pos + CHAIN_KEY_LEN]);
            *pos += CHAIN_KEY_LEN;
            key
        };
        let root_key = take_key(&mut pos);
        let send_chain_key = take_key(&mut pos);
        let recv_chain_key = take_key(&mut pos);

        let send_counter = u32::from_le_bytes(data[pos..pos + 4].try_into().map_err(|_| corrupt())?);
        pos += 4;
        let recv_counter = u32::from_le_bytes(data[pos..pos + 4].try_into().map_err(|_| corrupt())?);

        Ok(Self {
            peer_id,
            root_key,
            send_chain_key,
            recv_chain_key,
            send_counter,
            recv_counter,
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer_id", &self.peer_id)
            .field("send_counter", &self.send_counter)
            .field("recv_counter", &self.recv_counter)
            .finish_non_exhaustive()
    }
}

/// Advance a chain by one step: HKDF-SHA256 keyed by the chain key, salted
/// with the big-endian counter, yielding `(message_key, next_chain_key)`.
///
/// One-way: the next chain key does not reveal the current one, which is
/// what makes discarding old chain keys meaningful.
fn derive_next(
    chain_key: &[u8; CHAIN_KEY_LEN],
    counter: u32,
) -> Result<([u8; CHAIN_KEY_LEN], [u8; CHAIN_KEY_LEN]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(&counter.to_be_bytes()), chain_key);
    let mut okm = [0u8; 2 * CHAIN_KEY_LEN];
    hk.expand(MESSAGE_INFO, &mut okm)
        .map_err(|e| CryptoError::InvalidSessionState(format!("HKDF expand: {e}")))?;

    let mut message_key = [0u8; CHAIN_KEY_LEN];
    let mut next_chain_key = [0u8; CHAIN_KEY_LEN];
    message_key.copy_from_slice(&okm[..32]);
    next_chain_key.copy_from_slice(&okm[32..]);
    okm.zeroize();
    Ok((message_key, next_chain_key))
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use super::*;
    use crate::keys::KeyManager;

    fn session_pair() -> (Session, Session) {
        let mut alice_keys = KeyManager::new();
        let mut bob_keys = KeyManager::new();
        let alice_bundle = alice_keys.generate_identity();
        let bob_bundle = bob_keys.generate_identity();

        let alice = Session::establish(
            "bob",
            SessionRole::Initiator,
            alice_keys.agreement_secret().unwrap(),
            &bob_bundle,
        )
        .unwrap();
        let bob = Session::establish(
            "alice",
            SessionRole::Responder,
            bob_keys.agreement_secret().unwrap(),
            &alice_bundle,
        )
        .unwrap();
        (alice, bob)
    }

    #[test]
    fn roundtrip_both_directions() {
        let (mut alice, mut bob) = session_pair();

        let ct = alice.encrypt(b"hello").unwrap();
        assert_eq!(bob.decrypt(&ct).unwrap(), b"hello");

        let ct = bob.encrypt(b"hi back").unwrap();
        assert_eq!(alice.decrypt(&ct).unwrap(), b"hi back");
    }

    #[test]
    fn roundtrip_many_messages_in_order() {
        let (mut alice, mut bob) = session_pair();
        for i in 0..20u32 {
            let msg = format!("message {i}");
            let ct = alice.encrypt(msg.as_bytes()).unwrap();
            assert_eq!(bob.decrypt(&ct).unwrap(), msg.as_bytes());
        }
        assert_eq!(alice.send_counter(), 20);
        assert_eq!(bob.recv_counter(), 20);
    }

    #[test]
    fn same_plaintext_never_yields_same_ciphertext() {
        let (mut alice, _) = session_pair();
        let a = alice.encrypt(b"repeat").unwrap();
        let b = alice.encrypt(b"repeat").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn counters_advance_by_one_per_call() {
        let (mut alice, mut bob) = session_pair();
        assert_eq!(alice.send_counter(), 0);
        let ct = alice.encrypt(b"x").unwrap();
        assert_eq!(alice.send_counter(), 1);
        assert_eq!(bob.recv_counter(), 0);
        bob.decrypt(&ct).unwrap();
        assert_eq!(bob.recv_counter(), 1);
    }

    #[test]
    fn consecutive_message_keys_are_distinct() {
        let chain = [7u8; 32];
        let (k1, c1) = derive_next(&chain, 0).unwrap();
        let (k2, c2) = derive_next(&c1, 1).unwrap();
        let (k3, _) = derive_next(&c2, 2).unwrap();
        assert_ne!(k1, k2);
        assert_ne!(k2, k3);
        assert_ne!(k1, k3);
    }

    #[test]
    fn tampered_ciphertext_fails_and_does_not_burn_the_key() {
        let (mut alice, mut bob) = session_pair();
        let ct = alice.encrypt(b"important").unwrap();

        for idx in [0, NONCE_LEN, ct.len() / 2, ct.len() - 1] {
            let mut tampered = ct.clone();
            tampered[idx] ^= 0x01;
            assert!(matches!(
                bob.decrypt(&tampered),
                Err(CryptoError::AuthenticationFailed)
            ));
        }

        // The receive chain did not advance, so the genuine message still opens.
        assert_eq!(bob.decrypt(&ct).unwrap(), b"important");
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let (_, mut bob) = session_pair();
        assert!(matches!(
            bob.decrypt(&[0u8; NONCE_LEN - 1]),
            Err(CryptoError::CiphertextTooShort { len: 11, min: 12 })
        ));
    }

    #[test]
    fn mismatched_roles_cannot_communicate() {
        let mut alice_keys = KeyManager::new();
        let mut bob_keys = KeyManager::new();
        let alice_bundle = alice_keys.generate_identity();
        let bob_bundle = bob_keys.generate_identity();

        // Both sides take the initiator ordering: send chains collide.
        let mut alice = Session::establish(
            "bob",
            SessionRole::Initiator,
            alice_keys.agreement_secret().unwrap(),
            &bob_bundle,
        )
        .unwrap();
        let mut bob = Session::establish(
            "alice",
            SessionRole::Initiator,
            bob_keys.agreement_secret().unwrap(),
            &alice_bundle,
        )
        .unwrap();

        let ct = alice.encrypt(b"hello").unwrap();
        assert!(bob.decrypt(&ct).is_err());
    }

    #[test]
    fn forged_bundle_is_rejected_before_agreement() {
        let mut alice_keys = KeyManager::new();
        alice_keys.generate_identity();
        let mut bob_keys = KeyManager::new();
        let mut bundle = bob_keys.generate_identity();
        bundle.signature[0] ^= 0xff;

        assert!(matches!(
            Session::establish(
                "bob",
                SessionRole::Initiator,
                alice_keys.agreement_secret().unwrap(),
                &bundle,
            ),
            Err(CryptoError::InvalidPeerKeys(_))
        ));
    }

    #[test]
    fn low_order_prekey_fails_agreement() {
        // A validly signed bundle whose prekey is the identity point: the
        // signature check passes but the DH result is non-contributory.
        let signing_key = SigningKey::generate(&mut OsRng);
        let zero_prekey = [0u8; 32];
        let signature = signing_key.sign(&zero_prekey);
        let bundle = PublicKeyBundle {
            identity_public_key: signing_key.verifying_key().to_bytes().to_vec(),
            signed_prekey: zero_prekey.to_vec(),
            signature: signature.to_bytes().to_vec(),
            one_time_prekey: None,
        };

        let mut alice_keys = KeyManager::new();
        alice_keys.generate_identity();
        assert!(matches!(
            Session::establish(
                "mallory",
                SessionRole::Initiator,
                alice_keys.agreement_secret().unwrap(),
                &bundle,
            ),
            Err(CryptoError::KeyAgreementFailed)
        ));
    }

    #[test]
    fn session_blob_roundtrips_and_keeps_working() {
        let (mut alice, mut bob) = session_pair();
        let ct = alice.encrypt(b"before snapshot").unwrap();
        bob.decrypt(&ct).unwrap();

        let blob = bob.to_bytes();
        assert_eq!(blob, Session::from_bytes(&blob).unwrap().to_bytes());

        let mut restored = Session::from_bytes(&blob).unwrap();
        assert_eq!(restored.peer_id(), "alice");
        assert_eq!(restored.recv_counter(), 1);

        let ct = alice.encrypt(b"after snapshot").unwrap();
        assert_eq!(restored.decrypt(&ct).unwrap(), b"after snapshot");
    }

    #[test]
    fn corrupt_session_blob_is_rejected() {
        let (_, bob) = session_pair();
        let mut blob = bob.to_bytes();
        blob.truncate(blob.len() - 1);
        assert!(Session::from_bytes(&blob).is_err());
        assert!(Session::from_bytes(&[]).is_err());
    }

    #[test]
    fn shared_secret_matches_from_both_sides() {
        let mut alice_keys = KeyManager::new();
        let mut bob_keys = KeyManager::new();
        let alice_bundle = alice_keys.generate_identity();
        let bob_bundle = bob_keys.generate_identity();

        let a = alice_keys
            .agreement_secret()
            .unwrap()
            .diffie_hellman(&bob_bundle.agreement_key().unwrap());
        let b = bob_keys
            .agreement_secret()
            .unwrap()
            .diffie_hellman(&alice_bundle.agreement_key().unwrap());
        assert_eq!(a.as_bytes(), b.as_bytes());
    }
}
