//! Identity and prekey management.
//!
//! Each installation holds one long-term Ed25519 identity keypair (for
//! signing) and one X25519 signed prekey (for key agreement), with the
//! prekey's public half signed by the identity key so a directory service
//! cannot substitute it. Only the public halves ever leave the process,
//! projected as a [`PublicKeyBundle`].

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::encoding::{b64, b64_opt};
use crate::error::CryptoError;

/// Length of Ed25519 and X25519 public keys.
pub const KEY_LEN: usize = 32;
/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// A full identity: signing keypair, agreement keypair, and the binding
/// signature. Private halves never leave the process; the dalek key types
/// zeroize themselves on drop.
pub struct IdentityKeyBundle {
    signing_key: SigningKey,
    prekey_secret: StaticSecret,
    prekey_public: X25519Public,
    prekey_signature: Signature,
}

impl IdentityKeyBundle {
    /// Generate a fresh identity.
    ///
    /// Entropy-source exhaustion is the only failure mode and is fatal:
    /// `OsRng` aborts the operation by panicking rather than handing out
    /// weak keys.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let prekey_secret = StaticSecret::random_from_rng(OsRng);
        let prekey_public = X25519Public::from(&prekey_secret);
        let prekey_signature = signing_key.sign(prekey_public.as_bytes());
        Self {
            signing_key,
            prekey_secret,
            prekey_public,
            prekey_signature,
        }
    }

    /// The Ed25519 identity public key (32 bytes).
    pub fn identity_public_key(&self) -> [u8; KEY_LEN] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The X25519 agreement secret, for session establishment.
    pub fn agreement_secret(&self) -> &StaticSecret {
        &self.prekey_secret
    }

    /// Project the shareable public fields.
    pub fn public_bundle(&self) -> PublicKeyBundle {
        PublicKeyBundle {
            identity_public_key: self.identity_public_key().to_vec(),
            signed_prekey: self.prekey_public.as_bytes().to_vec(),
            signature: self.prekey_signature.to_bytes().to_vec(),
            one_time_prekey: None,
        }
    }
}

impl std::fmt::Debug for IdentityKeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyBundle")
            .field("identity_public_key", &hex::encode(self.identity_public_key()))
            .field("signed_prekey", &hex::encode(self.prekey_public.as_bytes()))
            .finish_non_exhaustive()
    }
}

/// The public projection of an identity, safe to publish to a directory
/// service. Byte fields are base64 in JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyBundle {
    /// Ed25519 identity public key.
    #[serde(with = "b64")]
    pub identity_public_key: Vec<u8>,
    /// X25519 signed prekey (public).
    #[serde(with = "b64")]
    pub signed_prekey: Vec<u8>,
    /// Signature over `signed_prekey` by the identity key.
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
    /// Optional one-time prekey, consumed by the first contact.
    #[serde(with = "b64_opt", default, skip_serializing_if = "Option::is_none")]
    pub one_time_prekey: Option<Vec<u8>>,
}

impl PublicKeyBundle {
    /// Validate key lengths and the prekey binding signature.
    ///
    /// A bundle that fails this check must be rejected before any key
    /// agreement is attempted with it.
    pub fn verify(&self) -> Result<(), CryptoError> {
        let identity: [u8; KEY_LEN] = self
            .identity_public_key
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidPeerKeys("identity key must be 32 bytes".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&identity)
            .map_err(|e| CryptoError::InvalidPeerKeys(format!("bad identity key: {e}")))?;

        if self.signed_prekey.len() != KEY_LEN {
            return Err(CryptoError::InvalidPeerKeys(
                "signed prekey must be 32 bytes".into(),
            ));
        }

        let signature: [u8; SIGNATURE_LEN] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidPeerKeys("signature must be 64 bytes".into()))?;
        let signature = Signature::from_bytes(&signature);

        verifying_key
            .verify(&self.signed_prekey, &signature)
            .map_err(|_| CryptoError::InvalidPeerKeys("prekey signature does not verify".into()))
    }

    /// The peer's agreement key as a typed X25519 public key.
    pub fn agreement_key(&self) -> Result<X25519Public, CryptoError> {
        let bytes: [u8; KEY_LEN] = self
            .signed_prekey
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidPeerKeys("signed prekey must be 32 bytes".into()))?;
        Ok(X25519Public::from(bytes))
    }
}

/// A one-time prekey pair. The public half is advertised in a bundle; the
/// secret half stays local until the prekey is consumed.
pub struct OneTimePrekey {
    /// Prekey ID, unique within a generated batch.
    pub id: u32,
    /// X25519 public key to advertise.
    pub public_key: [u8; KEY_LEN],
    /// Local secret half.
    pub secret: StaticSecret,
}

/// Holds the single active identity for an engine instance.
///
/// Regenerating replaces the previous identity outright — there is no
/// migration path, and the old key material is zeroized on drop.
#[derive(Default)]
pub struct KeyManager {
    identity: Option<IdentityKeyBundle>,
}

impl KeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate (or regenerate) the identity and return its public bundle.
    pub fn generate_identity(&mut self) -> PublicKeyBundle {
        let identity = IdentityKeyBundle::generate();
        tracing::debug!(
            identity = %hex::encode(identity.identity_public_key()),
            "generated identity keys"
        );
        let bundle = identity.public_bundle();
        self.identity = Some(identity);
        bundle
    }

    pub fn is_initialized(&self) -> bool {
        self.identity.is_some()
    }

    /// The shareable public bundle, or `NotInitialized` before
    /// [`generate_identity`](Self::generate_identity).
    pub fn public_bundle(&self) -> Result<PublicKeyBundle, CryptoError> {
        self.identity
            .as_ref()
            .map(IdentityKeyBundle::public_bundle)
            .ok_or(CryptoError::NotInitialized)
    }

    /// The local X25519 agreement secret, for session construction.
    pub fn agreement_secret(&self) -> Result<&StaticSecret, CryptoError> {
        self.identity
            .as_ref()
            .map(IdentityKeyBundle::agreement_secret)
            .ok_or(CryptoError::NotInitialized)
    }

    /// The local Ed25519 identity public key.
    pub fn identity_public_key(&self) -> Result<[u8; KEY_LEN], CryptoError> {
        self.identity
            .as_ref()
            .map(IdentityKeyBundle::identity_public_key)
            .ok_or(CryptoError::NotInitialized)
    }

    /// Generate a batch of one-time prekeys for publication.
    ///
    /// The prekeys are advertised to peers but do not enter the two-party
    /// key agreement; they exist so a directory service can hand each new
    /// contact a distinct key.
    pub fn generate_one_time_prekeys(count: u32) -> Vec<OneTimePrekey> {
        (0..count)
            .map(|id| {
                let secret = StaticSecret::random_from_rng(OsRng);
                let public_key = *X25519Public::from(&secret).as_bytes();
                OneTimePrekey {
                    id,
                    public_key,
                    secret,
                }
            })
            .collect()
    }
}
