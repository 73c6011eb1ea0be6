/// Sequence ledger — highest accepted sequence number per storage key.
///
/// Lives independently of the record map: entries are created on the
/// first accepted add, overwritten on every accepted add/remove, and never
/// evicted by expiry. Forgetting an entry would let a superseded sequence
/// number be replayed once the live record is gone.
use std::collections::HashMap;

use crate::types::StorageKey;

#[derive(Debug, Default, Clone)]
pub struct SequenceLedger {
    entries: HashMap<StorageKey, u64>,
}

impl SequenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last accepted sequence number for `key`, if any.
    pub fn highest_seen(&self, key: &StorageKey) -> Option<u64> {
        self.entries.get(key).copied()
    }

    /// Whether `sequence_number` may be accepted for `key`.
    ///
    /// Unknown keys accept any value; known keys need a strictly greater one.
    pub fn admits(&self, key: &StorageKey, sequence_number: u64) -> bool {
        match self.highest_seen(key) {
            Some(highest) => sequence_number > highest,
            None => true,
        }
    }

    /// Store `sequence_number` for `key`. Callers have already checked
    /// monotonicity.
    pub fn record(&mut self, key: StorageKey, sequence_number: u64) {
        self.entries.insert(key, sequence_number);
    }

    /// Keep the larger of the stored and given value.
    pub fn merge(&mut self, key: StorageKey, sequence_number: u64) {
        let entry = self.entries.entry(key).or_insert(sequence_number);
        *entry = (*entry).max(sequence_number);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StorageKey, &u64)> {
        self.entries.iter()
    }
}
