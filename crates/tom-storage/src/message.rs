use serde::{Deserialize, Serialize};

use crate::error::TomStorageError;
use crate::record::{ProtectedEntry, ProtectedMailboxRecord, ProtectedRecord};

/// Storage operation as it travels between peers.
///
/// Serialized as MessagePack. Inbound bytes are decoded through
/// [`StorageMessage::from_bytes`], which resets any future receipt time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMessage {
    Add(ProtectedEntry),
    Remove(ProtectedRecord),
    RemoveMailbox(ProtectedMailboxRecord),
}

impl StorageMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageMessage::Add(_) => "add",
            StorageMessage::Remove(_) => "remove",
            StorageMessage::RemoveMailbox(_) => "remove_mailbox",
        }
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
