use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default interval between TTL sweeps (10 minutes).
pub const DEFAULT_CHECK_TTL_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Hard upper bound on any record TTL (10 days).
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(10 * 24 * 60 * 60);

/// Capacity of the storage event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Storage key — SHA-256 of a payload's canonical encoding.
///
/// Identifies one logical item across its whole add/remove history.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey(pub [u8; 32]);

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_string();
        write!(f, "StorageKey({}...)", &hex[..12])
    }
}

/// Network address of the peer a message came from.
///
/// Opaque to storage. Only used to exclude the originator when
/// re-broadcasting an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
