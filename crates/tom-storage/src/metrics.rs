//! Storage counters.
//!
//! Plain [`AtomicU64`] counters with `Relaxed` ordering: statistics only,
//! no inter-thread ordering is implied.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::RejectReason;

#[derive(Debug, Default)]
pub struct StorageMetrics {
    adds_accepted: AtomicU64,
    refreshes: AtomicU64,
    removes_accepted: AtomicU64,
    rejected_signature: AtomicU64,
    rejected_sequence: AtomicU64,
    rejected_keys: AtomicU64,
    rejected_other: AtomicU64,
    expired: AtomicU64,
    broadcast_failures: AtomicU64,
}

/// Point-in-time copy of [`StorageMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub adds_accepted: u64,
    /// Accepted adds that replaced a live entry for the same key.
    pub refreshes: u64,
    pub removes_accepted: u64,
    pub rejected_signature: u64,
    pub rejected_sequence: u64,
    /// Owner, mailbox or payload-kind mismatches.
    pub rejected_keys: u64,
    pub rejected_other: u64,
    pub expired: u64,
    pub broadcast_failures: u64,
}

impl MetricsSnapshot {
    pub fn rejected_total(&self) -> u64 {
        self.rejected_signature + self.rejected_sequence + self.rejected_keys + self.rejected_other
    }
}

fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StorageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_accepted(&self, refreshed: bool) {
        inc(&self.adds_accepted);
        if refreshed {
            inc(&self.refreshes);
        }
    }

    pub(crate) fn remove_accepted(&self) {
        inc(&self.removes_accepted);
    }

    pub(crate) fn rejected(&self, reason: &RejectReason) {
        match reason {
            RejectReason::InvalidSignature => inc(&self.rejected_signature),
            RejectReason::StaleSequenceNumber { .. } => inc(&self.rejected_sequence),
            RejectReason::OwnerMismatch
            | RejectReason::MailboxKeyMismatch
            | RejectReason::WrongPayloadKind => inc(&self.rejected_keys),
            RejectReason::ShutDown => inc(&self.rejected_other),
        }
    }

    /// Counts undecodable or unhashable input.
    pub(crate) fn malformed(&self) {
        inc(&self.rejected_other);
    }

    pub(crate) fn expired_by(&self, n: u64) {
        self.expired.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn broadcast_failed(&self) {
        inc(&self.broadcast_failures);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            adds_accepted: get(&self.adds_accepted),
            refreshes: get(&self.refreshes),
            removes_accepted: get(&self.removes_accepted),
            rejected_signature: get(&self.rejected_signature),
            rejected_sequence: get(&self.rejected_sequence),
            rejected_keys: get(&self.rejected_keys),
            rejected_other: get(&self.rejected_other),
            expired: get(&self.expired),
            broadcast_failures: get(&self.broadcast_failures),
        }
    }
}
