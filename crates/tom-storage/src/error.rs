use crate::types::StorageKey;

/// Errors for the ToM protected storage.
///
/// Admission rejections are expected under adversarial input and are
/// wrapped in [`TomStorageError::Rejected`]; the public `add`/`remove`
/// entry points fold them into a `false` return.
#[derive(Debug, thiserror::Error)]
pub enum TomStorageError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("no tokio runtime available")]
    NoRuntime,
}

/// Why an add/remove request was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("signature does not verify against owner key")]
    InvalidSignature,

    #[error("sequence number {got} for {key} not above {highest}")]
    StaleSequenceNumber {
        key: StorageKey,
        got: u64,
        highest: u64,
    },

    #[error("owner key does not match payload owner")]
    OwnerMismatch,

    #[error("mailbox keys do not match (owner, receiver, authorized remover)")]
    MailboxKeyMismatch,

    #[error("payload kind not accepted by this operation")]
    WrongPayloadKind,

    #[error("storage has been shut down")]
    ShutDown,
}

impl From<rmp_serde::encode::Error> for TomStorageError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TomStorageError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TomStorageError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TomStorageError::Deserialization(e.to_string())
    }
}
