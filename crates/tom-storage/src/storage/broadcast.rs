use crate::message::StorageMessage;
use crate::types::PeerAddress;

/// Network hand-off for accepted storage operations.
///
/// In production: implemented by the overlay transport (send to every
/// known peer except `exclude`).
/// In tests: `MockBroadcaster` records what would have been sent.
#[async_trait::async_trait]
pub trait Broadcaster: Send + Sync + 'static {
    /// Fire-and-forget send of `message` to all peers but `exclude`.
    async fn broadcast(
        &self,
        message: StorageMessage,
        exclude: Option<PeerAddress>,
    ) -> Result<(), String>;
}

/// Broadcaster for nodes that only store locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOnly;

#[async_trait::async_trait]
impl Broadcaster for LocalOnly {
    async fn broadcast(
        &self,
        _message: StorageMessage,
        _exclude: Option<PeerAddress>,
    ) -> Result<(), String> {
        Ok(())
    }
}

// ── MockBroadcaster (tests) ─────────────────────────────────────────

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records broadcasts for verification; can be told to fail.
    #[derive(Clone, Default)]
    pub struct MockBroadcaster {
        sent: Arc<Mutex<Vec<(StorageMessage, Option<PeerAddress>)>>>,
        fail_sends: Arc<Mutex<bool>>,
    }

    impl MockBroadcaster {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<(StorageMessage, Option<PeerAddress>)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn set_fail_sends(&self, fail: bool) {
            *self.fail_sends.lock().unwrap() = fail;
        }
    }

    #[async_trait::async_trait]
    impl Broadcaster for MockBroadcaster {
        async fn broadcast(
            &self,
            message: StorageMessage,
            exclude: Option<PeerAddress>,
        ) -> Result<(), String> {
            if *self.fail_sends.lock().unwrap() {
                return Err("mock: broadcast failed".to_string());
            }
            self.sent.lock().unwrap().push((message, exclude));
            Ok(())
        }
    }
}
