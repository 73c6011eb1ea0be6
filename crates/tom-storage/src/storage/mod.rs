/// Protected storage — the admission engine for signed records.
///
/// Owns the live record map and the sequence ledger behind one mutex, so
/// the check-then-set on sequence numbers and the map/ledger update are a
/// single critical section. Listener events are sent inside that section
/// (`broadcast::Sender::send` never blocks), so subscribers see them in
/// admission order. The network hand-off runs after the lock is released.
///
/// Admission order:
/// - `add`: key binding → signature → sequence number
/// - `remove`: key binding → signature → sequence number
/// - `remove_mailbox`: three-way key equality → signature → sequence number
mod broadcast;
mod expiry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;

pub use broadcast::{Broadcaster, LocalOnly};

use crate::crypto::{StorageKeyPair, StoragePublicKey};
use crate::error::{RejectReason, TomStorageError};
use crate::ledger::SequenceLedger;
use crate::message::StorageMessage;
use crate::metrics::StorageMetrics;
use crate::payload::{ApplicationPayload, MailboxPayload, Payload};
use crate::record::{ProtectedEntry, ProtectedMailboxRecord, ProtectedRecord};
use crate::snapshot::StorageSnapshot;
use crate::types::{
    now_ms, PeerAddress, StorageKey, DEFAULT_CHECK_TTL_INTERVAL, DEFAULT_EVENT_CAPACITY,
    DEFAULT_MAX_TTL,
};

use expiry::ExpiryScheduler;

// ── Configuration ─────────────────────────────────────────────────────

/// Startup configuration for [`ProtectedStorage`].
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Interval between TTL sweeps.
    pub check_ttl_interval: Duration,
    /// Upper bound on any record TTL.
    pub max_ttl: Duration,
    /// Buffer of the storage event channel.
    pub event_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            check_ttl_interval: DEFAULT_CHECK_TTL_INTERVAL,
            max_ttl: DEFAULT_MAX_TTL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

// ── Events (storage → listeners) ──────────────────────────────────────

/// Change notifications for components mirroring the record map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// An add was accepted (new entry or refresh).
    Added(ProtectedEntry),
    /// A remove was accepted. Carries the evicted entry, or the removal
    /// request itself when nothing was stored locally.
    Removed(ProtectedEntry),
    /// The TTL sweep dropped an entry. Local only, never broadcast.
    Expired(ProtectedEntry),
}

// ── Shared state ──────────────────────────────────────────────────────

struct State {
    records: HashMap<StorageKey, ProtectedEntry>,
    ledger: SequenceLedger,
}

impl State {
    fn check_sequence(&self, key: &StorageKey, sequence_number: u64) -> Result<(), RejectReason> {
        if self.ledger.admits(key, sequence_number) {
            return Ok(());
        }
        Err(RejectReason::StaleSequenceNumber {
            key: *key,
            got: sequence_number,
            highest: self.ledger.highest_seen(key).unwrap_or(sequence_number),
        })
    }
}

/// State reachable from both the storage handle and the sweep task.
pub(crate) struct Shared {
    state: Mutex<State>,
    events: tokio::sync::broadcast::Sender<StorageEvent>,
    metrics: StorageMetrics,
    shut_down: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn notify(&self, event: StorageEvent) {
        // Err only means nobody is subscribed
        let _ = self.events.send(event);
    }

    /// Drop every entry with `now > received_at + ttl`. The ledger is left alone.
    pub(crate) fn sweep_expired(&self, now: u64) -> usize {
        let mut state = self.lock();
        let keys: Vec<StorageKey> = state
            .records
            .iter()
            .filter(|(_, entry)| entry.record().is_expired(now))
            .map(|(key, _)| *key)
            .collect();

        let mut count = 0;
        for key in keys {
            if let Some(entry) = state.records.remove(&key) {
                self.notify(StorageEvent::Expired(entry));
                count += 1;
            }
        }
        drop(state);

        self.metrics.expired_by(count as u64);
        count
    }
}

// ── ProtectedStorage ──────────────────────────────────────────────────

/// Local store of protected records, shared by the inbound message path,
/// local callers and the TTL sweep.
pub struct ProtectedStorage {
    shared: Arc<Shared>,
    broadcaster: Arc<dyn Broadcaster>,
    runtime: Handle,
    config: StorageConfig,
    expiry: ExpiryScheduler,
}

impl ProtectedStorage {
    /// Create the storage and start its TTL sweep.
    ///
    /// Must be called from within a tokio runtime; the runtime handle is
    /// kept so the other methods can be called from any thread.
    pub fn new(
        config: StorageConfig,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Self, TomStorageError> {
        let runtime = Handle::try_current().map_err(|_| TomStorageError::NoRuntime)?;
        let (events, _) = tokio::sync::broadcast::channel(config.event_capacity.max(1));

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                records: HashMap::new(),
                ledger: SequenceLedger::new(),
            }),
            events,
            metrics: StorageMetrics::new(),
            shut_down: AtomicBool::new(false),
        });

        let expiry =
            ExpiryScheduler::start(Arc::downgrade(&shared), config.check_ttl_interval, &runtime);

        Ok(Self {
            shared,
            broadcaster,
            runtime,
            config,
            expiry,
        })
    }

    /// Storage that never broadcasts.
    pub fn local(config: StorageConfig) -> Result<Self, TomStorageError> {
        Self::new(config, Arc::new(LocalOnly))
    }

    // ── Admission ────────────────────────────────────────────────────

    /// Add or refresh an entry. Returns `false` when not admitted.
    ///
    /// `exclude_sender` is the peer the entry came from; it is skipped
    /// when re-broadcasting.
    pub fn add(
        &self,
        entry: impl Into<ProtectedEntry>,
        exclude_sender: Option<&PeerAddress>,
    ) -> bool {
        let result = self.try_add(entry, exclude_sender);
        self.settle("add", result)
    }

    /// Remove a plain entry. Returns `false` when not admitted.
    ///
    /// Acceptance is gated by the sequence number alone: a remove for a
    /// key with no live entry still advances the ledger.
    pub fn remove(&self, record: ProtectedRecord, exclude_sender: Option<&PeerAddress>) -> bool {
        let result = self.try_remove(record, exclude_sender);
        self.settle("remove", result)
    }

    /// Remove a mailbox entry on behalf of its receiver.
    pub fn remove_mailbox(
        &self,
        mailbox: ProtectedMailboxRecord,
        exclude_sender: Option<&PeerAddress>,
    ) -> bool {
        let result = self.try_remove_mailbox(mailbox, exclude_sender);
        self.settle("remove_mailbox", result)
    }

    /// [`add`](Self::add) with the rejection reason.
    pub fn try_add(
        &self,
        entry: impl Into<ProtectedEntry>,
        exclude_sender: Option<&PeerAddress>,
    ) -> Result<(), TomStorageError> {
        self.ensure_running()?;
        let mut entry = entry.into();
        let key = entry.storage_key()?;

        check_author(&entry)?;
        if !entry.record().verify_signature() {
            return Err(RejectReason::InvalidSignature.into());
        }

        let refreshed = {
            let mut state = self.shared.lock();
            state.check_sequence(&key, entry.sequence_number())?;

            let record = entry.record_mut();
            record.received_at = now_ms();
            bound_ttl(record, self.max_ttl_ms());

            state.ledger.record(key, record.sequence_number);
            let refreshed = state.records.insert(key, entry.clone()).is_some();
            self.shared.notify(StorageEvent::Added(entry.clone()));
            refreshed
        };

        self.shared.metrics.add_accepted(refreshed);
        tracing::debug!(
            "add accepted: key={key:?} seq={} refreshed={refreshed}",
            entry.sequence_number()
        );

        self.hand_off(StorageMessage::Add(entry), exclude_sender);
        Ok(())
    }

    /// [`remove`](Self::remove) with the rejection reason.
    pub fn try_remove(
        &self,
        record: ProtectedRecord,
        exclude_sender: Option<&PeerAddress>,
    ) -> Result<(), TomStorageError> {
        self.ensure_running()?;
        let key = record.storage_key()?;

        let Payload::Application(payload) = &record.payload else {
            return Err(RejectReason::WrongPayloadKind.into());
        };
        if payload.owner_public_key != record.owner_public_key {
            return Err(RejectReason::OwnerMismatch.into());
        }
        if !record.verify_signature() {
            return Err(RejectReason::InvalidSignature.into());
        }

        let had_entry = self.commit_removal(&key, record.sequence_number, || {
            ProtectedEntry::Plain(record.clone())
        })?;
        self.shared.metrics.remove_accepted();
        tracing::debug!(
            "remove accepted: key={key:?} seq={} had_entry={had_entry}",
            record.sequence_number
        );

        self.hand_off(StorageMessage::Remove(record), exclude_sender);
        Ok(())
    }

    /// [`remove_mailbox`](Self::remove_mailbox) with the rejection reason.
    pub fn try_remove_mailbox(
        &self,
        mailbox: ProtectedMailboxRecord,
        exclude_sender: Option<&PeerAddress>,
    ) -> Result<(), TomStorageError> {
        self.ensure_running()?;
        let key = mailbox.storage_key()?;

        let Some(payload) = mailbox.mailbox_payload() else {
            return Err(RejectReason::WrongPayloadKind.into());
        };
        // owner == receiver == authorized remover, before any signature work
        let owner = &mailbox.record.owner_public_key;
        if owner != &payload.receiver_public_key || owner != &mailbox.authorized_remover_public_key
        {
            return Err(RejectReason::MailboxKeyMismatch.into());
        }
        if !mailbox.record.verify_signature() {
            return Err(RejectReason::InvalidSignature.into());
        }

        let had_entry = self.commit_removal(&key, mailbox.record.sequence_number, || {
            ProtectedEntry::Mailbox(mailbox.clone())
        })?;
        self.shared.metrics.remove_accepted();
        tracing::debug!(
            "mailbox remove accepted: key={key:?} seq={} had_entry={had_entry}",
            mailbox.record.sequence_number
        );

        self.hand_off(StorageMessage::RemoveMailbox(mailbox), exclude_sender);
        Ok(())
    }

    /// Decode an inbound wire message and dispatch it.
    ///
    /// Undecodable input is rejected like any other invalid request.
    pub fn handle_message(&self, data: &[u8], sender: Option<&PeerAddress>) -> bool {
        let message = match StorageMessage::from_bytes(data) {
            Ok(m) => m,
            Err(e) => {
                self.shared.metrics.malformed();
                tracing::debug!(
                    "bad storage message from {}: {e}",
                    sender.map(PeerAddress::as_str).unwrap_or("local")
                );
                return false;
            }
        };
        match message {
            StorageMessage::Add(entry) => self.add(entry, sender),
            StorageMessage::Remove(record) => self.remove(record, sender),
            StorageMessage::RemoveMailbox(mailbox) => self.remove_mailbox(mailbox, sender),
        }
    }

    // ── Signing helpers ──────────────────────────────────────────────

    /// Sequence number the next local write for `payload` should use.
    pub fn next_sequence_number(&self, payload: &Payload) -> Result<u64, TomStorageError> {
        let key = payload.storage_key()?;
        Ok(self
            .highest_sequence_number(&key)
            .map_or(0, |highest| highest + 1))
    }

    /// Sign `payload` at the next sequence number.
    pub fn signed_record(
        &self,
        payload: ApplicationPayload,
        keypair: &StorageKeyPair,
    ) -> Result<ProtectedRecord, TomStorageError> {
        let payload = Payload::Application(payload);
        let sequence_number = self.next_sequence_number(&payload)?;
        ProtectedRecord::new_signed(payload, sequence_number, keypair)
    }

    /// Sign a mailbox deposit at the next sequence number.
    pub fn signed_mailbox_record(
        &self,
        payload: MailboxPayload,
        sender: &StorageKeyPair,
        receiver: StoragePublicKey,
    ) -> Result<ProtectedMailboxRecord, TomStorageError> {
        let sequence_number = self.next_sequence_number(&Payload::Mailbox(payload.clone()))?;
        ProtectedMailboxRecord::new_signed(payload, sequence_number, sender, receiver)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Copy of the live record map.
    pub fn get_map(&self) -> HashMap<StorageKey, ProtectedEntry> {
        self.shared.lock().records.clone()
    }

    pub fn get(&self, key: &StorageKey) -> Option<ProtectedEntry> {
        self.shared.lock().records.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest sequence number ever accepted for `key`, live or not.
    pub fn highest_sequence_number(&self, key: &StorageKey) -> Option<u64> {
        self.shared.lock().ledger.highest_seen(key)
    }

    /// Receive every accepted add/remove and every expiry.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StorageEvent> {
        self.shared.events.subscribe()
    }

    pub fn metrics(&self) -> &StorageMetrics {
        &self.shared.metrics
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Run one TTL sweep as of `now` (Unix ms). Returns entries dropped.
    pub fn sweep_expired_at(&self, now: u64) -> usize {
        self.shared.sweep_expired(now)
    }

    /// Copy of the record map and ledger.
    pub fn snapshot(&self) -> StorageSnapshot {
        let state = self.shared.lock();
        StorageSnapshot {
            taken_at: now_ms(),
            records: state.records.values().cloned().collect(),
            sequence_numbers: state.ledger.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }

    /// Merge a snapshot into this storage. Returns entries restored.
    ///
    /// Ledger values keep the maximum of local and restored. Live entries
    /// the merged ledger has moved past are evicted and announced as
    /// `Removed`. A snapshot entry is restored only if it passes the
    /// author and signature checks, carries the merged ledger value for its
    /// key and has not expired once its TTL is bounded like an admitted
    /// add. Restored entries are announced as `Added` but not broadcast.
    pub fn restore(&self, snapshot: StorageSnapshot) -> Result<usize, TomStorageError> {
        self.ensure_running()?;
        if snapshot.is_empty() {
            return Ok(0);
        }
        let now = now_ms();
        let max_ttl = self.max_ttl_ms();

        let mut state = self.shared.lock();
        for (key, sequence_number) in snapshot.sequence_numbers {
            state.ledger.merge(key, sequence_number);
        }

        let superseded: Vec<StorageKey> = state
            .records
            .iter()
            .filter(|(key, entry)| {
                state
                    .ledger
                    .highest_seen(key)
                    .is_some_and(|highest| entry.sequence_number() < highest)
            })
            .map(|(key, _)| *key)
            .collect();
        for key in superseded {
            if let Some(entry) = state.records.remove(&key) {
                tracing::debug!(
                    "restore: evicting superseded entry {key:?} seq={}",
                    entry.sequence_number()
                );
                self.shared.notify(StorageEvent::Removed(entry));
            }
        }

        let mut restored = 0;
        for mut entry in snapshot.records {
            let Ok(key) = entry.storage_key() else {
                continue;
            };
            if check_author(&entry).is_err() || !entry.record().verify_signature() {
                tracing::debug!("restore: dropping unauthenticated entry {key:?}");
                continue;
            }
            if state.ledger.highest_seen(&key) != Some(entry.sequence_number()) {
                continue;
            }
            let record = entry.record_mut();
            record.received_at = record.received_at.min(now);
            bound_ttl(record, max_ttl);
            if record.is_expired(now) {
                continue;
            }
            state.records.insert(key, entry.clone());
            self.shared.notify(StorageEvent::Added(entry));
            restored += 1;
        }
        let tracked = state.ledger.len();
        drop(state);

        tracing::info!("storage: restored {restored} entries from snapshot, {tracked} keys tracked");
        Ok(restored)
    }

    /// Stop the TTL sweep. Idempotent; later operations are rejected.
    pub fn shut_down(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.expiry.stop();
        tracing::info!("storage: shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }

    /// Whether the TTL sweep task is alive.
    pub fn is_sweeping(&self) -> bool {
        self.expiry.is_running()
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn ensure_running(&self) -> Result<(), TomStorageError> {
        if self.is_shut_down() {
            return Err(RejectReason::ShutDown.into());
        }
        Ok(())
    }

    fn max_ttl_ms(&self) -> u64 {
        u64::try_from(self.config.max_ttl.as_millis()).unwrap_or(u64::MAX)
    }

    /// Sequence check, map/ledger update and `Removed` event for a removal,
    /// under the lock. `request` builds the event entry when nothing was
    /// stored. Returns whether a live entry was evicted.
    fn commit_removal(
        &self,
        key: &StorageKey,
        sequence_number: u64,
        request: impl FnOnce() -> ProtectedEntry,
    ) -> Result<bool, RejectReason> {
        let mut state = self.shared.lock();
        state.check_sequence(key, sequence_number)?;
        state.ledger.record(*key, sequence_number);
        let removed = state.records.remove(key);
        let had_entry = removed.is_some();
        self.shared
            .notify(StorageEvent::Removed(removed.unwrap_or_else(request)));
        Ok(had_entry)
    }

    /// Spawn the broadcast; failures are logged and counted, never rolled back.
    fn hand_off(&self, message: StorageMessage, exclude_sender: Option<&PeerAddress>) {
        let broadcaster = Arc::clone(&self.broadcaster);
        let shared = Arc::clone(&self.shared);
        let exclude = exclude_sender.cloned();
        self.runtime.spawn(async move {
            let kind = message.kind();
            if let Err(e) = broadcaster.broadcast(message, exclude).await {
                shared.metrics.broadcast_failed();
                tracing::warn!("storage: {kind} broadcast failed: {e}");
            }
        });
    }

    /// Fold an admission result into the boolean contract.
    fn settle(&self, op: &str, result: Result<(), TomStorageError>) -> bool {
        match result {
            Ok(()) => true,
            Err(TomStorageError::Rejected(RejectReason::ShutDown)) => {
                self.shared.metrics.rejected(&RejectReason::ShutDown);
                tracing::error!("storage: {op} called after shut down");
                false
            }
            Err(TomStorageError::Rejected(reason)) => {
                self.shared.metrics.rejected(&reason);
                tracing::debug!("{op} rejected: {reason}");
                false
            }
            Err(e) => {
                self.shared.metrics.malformed();
                tracing::debug!("{op} rejected, malformed input: {e}");
                false
            }
        }
    }
}

impl Drop for ProtectedStorage {
    fn drop(&mut self) {
        self.expiry.stop();
    }
}

/// The record owner must be the key the payload names as its author, and
/// a mailbox must name the payload receiver as its remover.
fn check_author(entry: &ProtectedEntry) -> Result<(), RejectReason> {
    let record = entry.record();
    let mismatch = match (entry, &record.payload) {
        (ProtectedEntry::Plain(_), Payload::Application(_)) => RejectReason::OwnerMismatch,
        (ProtectedEntry::Mailbox(mailbox), Payload::Mailbox(payload)) => {
            if payload.receiver_public_key != mailbox.authorized_remover_public_key {
                return Err(RejectReason::MailboxKeyMismatch);
            }
            RejectReason::MailboxKeyMismatch
        }
        _ => return Err(RejectReason::WrongPayloadKind),
    };
    if record.payload.author_public_key() != &record.owner_public_key {
        return Err(mismatch);
    }
    Ok(())
}

/// Bound the unsigned record TTL by the signed payload TTL and `max_ttl_ms`.
fn bound_ttl(record: &mut ProtectedRecord, max_ttl_ms: u64) {
    record.ttl_ms = record.ttl_ms.min(record.payload.ttl_ms()).min(max_ttl_ms);
}
