/// Snapshot of a storage: live entries plus the full sequence ledger.
///
/// Handed to whatever persists or transfers storage state. Decoding goes
/// through the same receipt-time clamp as the wire path, and
/// `ProtectedStorage::restore` re-validates every entry.
use serde::{Deserialize, Serialize};

use crate::error::TomStorageError;
use crate::record::ProtectedEntry;
use crate::types::StorageKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    /// When the snapshot was taken (Unix ms).
    pub taken_at: u64,
    pub records: Vec<ProtectedEntry>,
    pub sequence_numbers: Vec<(StorageKey, u64)>,
}

impl StorageSnapshot {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.sequence_numbers.is_empty()
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
