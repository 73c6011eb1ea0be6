/// Protected records — the unit of storage.
///
/// A record wraps a payload with the owner key, a per-key sequence number
/// and a signature over `hash(payload, sequence_number)`. The receipt
/// time is local: it is assigned at admission and never taken from the
/// wire as a future value.
use serde::{Deserialize, Deserializer, Serialize};

use crate::crypto::{self, Digest, StorageKeyPair, StoragePublicKey};
use crate::error::TomStorageError;
use crate::payload::{MailboxPayload, Payload};
use crate::types::{now_ms, StorageKey};

/// Signed, sequence-numbered payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedRecord {
    pub payload: Payload,
    /// Lifetime after local receipt. Clamped to the payload TTL on admission.
    pub ttl_ms: u64,
    /// Key that produced `signature`.
    pub owner_public_key: StoragePublicKey,
    /// Strictly increasing per storage key, across removals.
    pub sequence_number: u64,
    /// Ed25519 signature over `signing_digest()`.
    pub signature: Vec<u8>,
    /// Local receipt time (Unix ms). Future values are reset to now when decoded.
    #[serde(deserialize_with = "deserialize_receipt_time")]
    pub received_at: u64,
}

impl ProtectedRecord {
    /// Assemble a record from already-signed parts.
    pub fn new(
        payload: Payload,
        owner_public_key: StoragePublicKey,
        sequence_number: u64,
        signature: Vec<u8>,
    ) -> Self {
        Self {
            ttl_ms: payload.ttl_ms(),
            payload,
            owner_public_key,
            sequence_number,
            signature,
            received_at: now_ms(),
        }
    }

    /// Sign `payload` at `sequence_number` with `keypair` and wrap it.
    pub fn new_signed(
        payload: impl Into<Payload>,
        sequence_number: u64,
        keypair: &StorageKeyPair,
    ) -> Result<Self, TomStorageError> {
        let payload = payload.into();
        let digest = signing_digest(&payload, sequence_number)?;
        let signature = crypto::sign(keypair, &digest);
        Ok(Self::new(
            payload,
            keypair.public_key(),
            sequence_number,
            signature,
        ))
    }

    pub fn storage_key(&self) -> Result<StorageKey, TomStorageError> {
        self.payload.storage_key()
    }

    /// Digest the owner signs: `hash(payload, sequence_number)`.
    pub fn signing_digest(&self) -> Result<Digest, TomStorageError> {
        signing_digest(&self.payload, self.sequence_number)
    }

    /// Check `signature` against `owner_public_key`.
    pub fn verify_signature(&self) -> bool {
        match self.signing_digest() {
            Ok(digest) => crypto::verify(&self.owner_public_key, &digest, &self.signature),
            Err(_) => false,
        }
    }

    /// Absolute expiry time (Unix ms).
    pub fn expires_at(&self) -> u64 {
        self.received_at.saturating_add(self.ttl_ms)
    }

    /// Expired once `now` is strictly past `received_at + ttl_ms`.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at()
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TomStorageError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TomStorageError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Mailbox record: a protected record plus the key allowed to delete it.
///
/// At insertion `record.owner_public_key` is the sender's key. At removal
/// it must be the receiver's key, equal to both the payload receiver and
/// `authorized_remover_public_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedMailboxRecord {
    pub record: ProtectedRecord,
    pub authorized_remover_public_key: StoragePublicKey,
}

impl ProtectedMailboxRecord {
    pub fn new(record: ProtectedRecord, authorized_remover_public_key: StoragePublicKey) -> Self {
        Self {
            record,
            authorized_remover_public_key,
        }
    }

    /// Sign a mailbox payload. Use the sender's key pair to deposit and
    /// the receiver's key pair to remove.
    pub fn new_signed(
        payload: MailboxPayload,
        sequence_number: u64,
        keypair: &StorageKeyPair,
        authorized_remover_public_key: StoragePublicKey,
    ) -> Result<Self, TomStorageError> {
        let record = ProtectedRecord::new_signed(payload, sequence_number, keypair)?;
        Ok(Self::new(record, authorized_remover_public_key))
    }

    /// The mailbox payload, if the inner record actually holds one.
    pub fn mailbox_payload(&self) -> Option<&MailboxPayload> {
        self.record.payload.as_mailbox()
    }

    pub fn storage_key(&self) -> Result<StorageKey, TomStorageError> {
        self.record.storage_key()
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TomStorageError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TomStorageError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// A live entry in the record map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectedEntry {
    Plain(ProtectedRecord),
    Mailbox(ProtectedMailboxRecord),
}

impl ProtectedEntry {
    pub fn record(&self) -> &ProtectedRecord {
        match self {
            ProtectedEntry::Plain(r) => r,
            ProtectedEntry::Mailbox(m) => &m.record,
        }
    }

    pub fn record_mut(&mut self) -> &mut ProtectedRecord {
        match self {
            ProtectedEntry::Plain(r) => r,
            ProtectedEntry::Mailbox(m) => &mut m.record,
        }
    }

    pub fn storage_key(&self) -> Result<StorageKey, TomStorageError> {
        self.record().storage_key()
    }

    pub fn sequence_number(&self) -> u64 {
        self.record().sequence_number
    }

    pub fn is_mailbox(&self) -> bool {
        matches!(self, ProtectedEntry::Mailbox(_))
    }
}

impl From<ProtectedRecord> for ProtectedEntry {
    fn from(r: ProtectedRecord) -> Self {
        ProtectedEntry::Plain(r)
    }
}

impl From<ProtectedMailboxRecord> for ProtectedEntry {
    fn from(m: ProtectedMailboxRecord) -> Self {
        ProtectedEntry::Mailbox(m)
    }
}

/// Canonical `(payload, sequence_number)` pair that gets signed.
#[derive(Serialize)]
struct PayloadAndSequence<'a> {
    payload: &'a Payload,
    sequence_number: u64,
}

/// `hash(payload, sequence_number)`.
pub fn signing_digest(payload: &Payload, sequence_number: u64) -> Result<Digest, TomStorageError> {
    crypto::hash(&PayloadAndSequence {
        payload,
        sequence_number,
    })
}

/// Receipt times from untrusted input never lie in the future.
fn deserialize_receipt_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let received_at = u64::deserialize(deserializer)?;
    let now = now_ms();
    if received_at > now {
        tracing::debug!(
            "receipt time {received_at} is {}ms in the future, reset to now",
            received_at - now
        );
        return Ok(now);
    }
    Ok(received_at)
}
