//! ToM protected storage.
//!
//! Replicated store for content-addressed, signed records with a TTL.
//! A per-key sequence number, strictly increasing across the whole
//! add/remove history, decides which of two conflicting writes wins, so
//! replayed or reordered gossip is rejected without extra bookkeeping.
//!
//! Mailbox records split write authority: the sender deposits, only the
//! receiver may delete.
//!
//! Wire format: MessagePack. Crypto: Ed25519 over SHA-256 digests.

pub mod crypto;
pub mod error;
pub mod ledger;
pub mod message;
pub mod metrics;
pub mod payload;
pub mod record;
pub mod snapshot;
pub mod storage;
pub mod types;

pub use crypto::{StorageKeyPair, StoragePublicKey};
pub use error::{RejectReason, TomStorageError};
pub use ledger::SequenceLedger;
pub use message::StorageMessage;
pub use metrics::{MetricsSnapshot, StorageMetrics};
pub use payload::{ApplicationPayload, MailboxPayload, Payload, MAILBOX_TTL_MS};
pub use record::{ProtectedEntry, ProtectedMailboxRecord, ProtectedRecord};
pub use snapshot::StorageSnapshot;
pub use storage::{Broadcaster, LocalOnly, ProtectedStorage, StorageConfig, StorageEvent};
pub use types::{now_ms, PeerAddress, StorageKey};
