/// Crypto primitives for protected storage.
///
/// Hash: SHA-256 over the MessagePack encoding of a value. MessagePack
/// encodes structs positionally, so equal values hash identically on
/// every node.
///
/// Signatures: Ed25519 with strict verification.
use std::fmt;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::TomStorageError;

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// 32-byte SHA-256 digest.
pub type Digest = [u8; 32];

/// Ed25519 public key used to authorize storage operations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoragePublicKey(pub [u8; 32]);

impl StoragePublicKey {
    /// Parse into a verifying key. Fails for points not on the curve.
    pub fn verifying_key(&self) -> Result<VerifyingKey, TomStorageError> {
        VerifyingKey::from_bytes(&self.0).map_err(|e| TomStorageError::InvalidKey(e.to_string()))
    }
}

impl fmt::Debug for StoragePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoragePublicKey(")?;
        for b in &self.0[..6] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "...)")
    }
}

/// Ed25519 key pair for signing storage records.
#[derive(Clone)]
pub struct StorageKeyPair {
    signing_key: SigningKey,
}

impl StorageKeyPair {
    /// Fresh random key pair.
    pub fn generate() -> Self {
        Self::from_seed(rand::random::<[u8; 32]>())
    }

    /// Deterministic key pair from a 32-byte secret seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key(&self) -> StoragePublicKey {
        StoragePublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// The 32-byte secret seed.
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for StorageKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageKeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Deterministic hash of any serializable value.
pub fn hash<T: Serialize + ?Sized>(value: &T) -> Result<Digest, TomStorageError> {
    let bytes = rmp_serde::to_vec(value)?;
    Ok(Sha256::digest(&bytes).into())
}

/// Sign a digest. Returns the 64-byte signature.
pub fn sign(keypair: &StorageKeyPair, digest: &Digest) -> Vec<u8> {
    keypair.signing_key.sign(digest).to_bytes().to_vec()
}

/// Verify `signature` over `digest` under `public_key`.
///
/// Never fails loudly: malformed keys, wrong-length signatures and bad
/// signatures all yield `false`.
pub fn verify(public_key: &StoragePublicKey, digest: &Digest, signature: &[u8]) -> bool {
    let Ok(sig_bytes) = <[u8; SIGNATURE_LEN]>::try_from(signature) else {
        return false;
    };
    let Ok(verifying_key) = public_key.verifying_key() else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    verifying_key.verify_strict(digest, &signature).is_ok()
}
