/// Payloads held by protected storage.
///
/// A payload is content-addressed: the SHA-256 of its canonical encoding
/// is its [`StorageKey`]. Every variant carries its own TTL, which is
/// covered by the record signature.
use serde::{Deserialize, Serialize};

use crate::crypto::{self, StoragePublicKey};
use crate::error::TomStorageError;
use crate::types::StorageKey;

/// TTL for mailbox payloads: 10 days.
pub const MAILBOX_TTL_MS: u64 = 10 * 24 * 60 * 60 * 1000;

/// Application data published by a single owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationPayload {
    /// Application-defined kind tag (e.g. "offer", "alert").
    pub kind: String,
    /// Opaque content.
    pub data: Vec<u8>,
    /// Key whose holder may add, refresh and remove this payload.
    pub owner_public_key: StoragePublicKey,
    pub ttl_ms: u64,
}

impl ApplicationPayload {
    pub fn new(
        kind: impl Into<String>,
        data: Vec<u8>,
        owner_public_key: StoragePublicKey,
        ttl_ms: u64,
    ) -> Self {
        Self {
            kind: kind.into(),
            data,
            owner_public_key,
            ttl_ms,
        }
    }
}

/// A sealed message deposited by a sender for a specific receiver.
///
/// The sender authorizes the deposit; only the receiver may delete it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxPayload {
    /// Encrypted and signed message, opaque to storage.
    pub sealed_message: Vec<u8>,
    pub sender_public_key: StoragePublicKey,
    pub receiver_public_key: StoragePublicKey,
    pub ttl_ms: u64,
}

impl MailboxPayload {
    /// Mailbox payload with the default mailbox TTL.
    pub fn new(
        sealed_message: Vec<u8>,
        sender_public_key: StoragePublicKey,
        receiver_public_key: StoragePublicKey,
    ) -> Self {
        Self {
            sealed_message,
            sender_public_key,
            receiver_public_key,
            ttl_ms: MAILBOX_TTL_MS,
        }
    }

    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Payload {
    Application(ApplicationPayload),
    Mailbox(MailboxPayload),
}

impl Payload {
    pub fn ttl_ms(&self) -> u64 {
        match self {
            Payload::Application(p) => p.ttl_ms,
            Payload::Mailbox(p) => p.ttl_ms,
        }
    }

    /// Key allowed to author (add) this payload: the owner for
    /// application data, the sender for mailbox data.
    pub fn author_public_key(&self) -> &StoragePublicKey {
        match self {
            Payload::Application(p) => &p.owner_public_key,
            Payload::Mailbox(p) => &p.sender_public_key,
        }
    }

    pub fn as_mailbox(&self) -> Option<&MailboxPayload> {
        match self {
            Payload::Mailbox(p) => Some(p),
            Payload::Application(_) => None,
        }
    }

    pub fn is_mailbox(&self) -> bool {
        matches!(self, Payload::Mailbox(_))
    }

    /// Content address of this payload.
    pub fn storage_key(&self) -> Result<StorageKey, TomStorageError> {
        crypto::hash(self).map(StorageKey)
    }
}

impl From<ApplicationPayload> for Payload {
    fn from(p: ApplicationPayload) -> Self {
        Payload::Application(p)
    }
}

impl From<MailboxPayload> for Payload {
    fn from(p: MailboxPayload) -> Self {
        Payload::Mailbox(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(b: u8) -> StoragePublicKey {
        StoragePublicKey([b; 32])
    }

    #[test]
    fn storage_key_deterministic() {
        let p: Payload = ApplicationPayload::new("offer", vec![1, 2], pk(1), 1000).into();
        assert_eq!(p.storage_key().unwrap(), p.clone().storage_key().unwrap());
    }

    #[test]
    fn storage_key_covers_every_field() {
        let base = ApplicationPayload::new("offer", vec![1, 2], pk(1), 1000);
        let key = Payload::from(base.clone()).storage_key().unwrap();

        let mut other = base.clone();
        other.data = vec![1, 3];
        assert_ne!(key, Payload::from(other).storage_key().unwrap());

        let mut other = base.clone();
        other.ttl_ms = 1001;
        assert_ne!(key, Payload::from(other).storage_key().unwrap());

        let mut other = base;
        other.owner_public_key = pk(2);
        assert_ne!(key, Payload::from(other).storage_key().unwrap());
    }

    #[test]
    fn author_of_mailbox_is_sender() {
        let p: Payload = MailboxPayload::new(vec![9], pk(1), pk(2)).into();
        assert_eq!(p.author_public_key(), &pk(1));
        assert!(p.is_mailbox());
        assert_eq!(p.as_mailbox().unwrap().receiver_public_key, pk(2));
        assert_eq!(p.ttl_ms(), MAILBOX_TTL_MS);
    }

    #[test]
    fn mailbox_with_ttl() {
        let p = MailboxPayload::new(vec![], pk(1), pk(2)).with_ttl(50);
        assert_eq!(Payload::from(p).ttl_ms(), 50);
    }

    #[test]
    fn application_and_mailbox_keys_differ() {
        let a: Payload = ApplicationPayload::new("", vec![], pk(1), 0).into();
        let m: Payload = MailboxPayload::new(vec![], pk(1), pk(1)).with_ttl(0).into();
        assert_ne!(a.storage_key().unwrap(), m.storage_key().unwrap());
    }
}
