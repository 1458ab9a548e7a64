//! Cryptographic primitives for Cairn.
//!
//! Provides three things:
//!   1. BLAKE3 hashing: segment, fragment and content-root digests
//!   2. Peer identity: a long-term X25519 keypair for the local peer node
//!   3. Account signing: an Ed25519 key derived from the account credential,
//!      used to authorize state-changing chain calls
//!
//! Private key material is zeroized when dropped.
//! There is no unsafe code in this module.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Incremental BLAKE3 hasher for digests built from many pieces.
///
/// # Example
/// ```
/// use cairn_core::crypto::Hasher;
/// let mut h = Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// let digest = h.finalize();
/// assert_eq!(digest, cairn_core::crypto::hash(b"hello world"));
/// ```
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        *self.0.finalize().as_bytes()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

// ── Peer keypair ──────────────────────────────────────────────────────────────

/// A peer node's long-term static X25519 keypair.
///
/// Generated once per workspace and stored persistently. The public key is
/// the node's network identity and is what gets registered on chain.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    private: Zeroizing<[u8; 32]>,
    pub public: [u8; 32],
}

impl Keypair {
    /// Generate a new random X25519 keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(secret.to_bytes()),
            public: *public.as_bytes(),
        }
    }

    /// Reconstruct a keypair from stored private key bytes.
    /// The public key is derived deterministically from the private key.
    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private_bytes);
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(private_bytes),
            public: *public.as_bytes(),
        }
    }

    /// Serialize the private key for persistent storage.
    ///
    /// The public key need not be stored; it is always derived on load.
    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.private)
    }
}

// ── Account signer ────────────────────────────────────────────────────────────

/// Domain-separation context for deriving the account seed from a credential.
const ACCOUNT_SEED_CONTEXT: &str = "cairn 2024-06 account signing seed v1";

/// Ed25519 signing key for chain submissions.
///
/// Derived deterministically from the secret phrase, so the same credential
/// always yields the same account key.
pub struct AccountSigner {
    key: SigningKey,
}

impl AccountSigner {
    /// Derive the signer from a secret phrase.
    ///
    ///   seed = BLAKE3-derive-key(ACCOUNT_SEED_CONTEXT, phrase)
    pub fn from_phrase(phrase: &str) -> Self {
        let seed = Zeroizing::new(blake3::derive_key(ACCOUNT_SEED_CONTEXT, phrase.as_bytes()));
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// The 32-byte Ed25519 public key.
    pub fn public(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Sign a message, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }
}

/// Verify a signature produced by [`AccountSigner::sign`].
pub fn verify(public: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public).map_err(|_| CryptoError::BadPublicKey)?;
    key.verify(message, &Signature::from_bytes(signature))
        .map_err(|_| CryptoError::BadSignature)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("public key is not a valid Ed25519 point")]
    BadPublicKey,
    #[error("signature verification failed")]
    BadSignature,
}
