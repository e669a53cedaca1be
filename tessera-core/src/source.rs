//! Record storage substrate.
//!
//! A [`RecordSource`] maps data IDs to records or tombstones. Absence of an
//! entry means the record is unknown. Every inter-record reference is a
//! [`DataId`], so cyclic graphs need no special handling here.

use crate::identity::DataId;
use crate::record::{Record, RecordState};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Read access to a record source or a composition of sources.
pub trait RecordSourceView {
    /// Look up the state of one record.
    fn get(&self, id: &DataId) -> RecordState;

    /// IDs with a known state (present or nonexistent).
    ///
    /// Each call returns a fresh iterator over the current contents.
    fn record_ids(&self) -> Box<dyn Iterator<Item = DataId> + '_>;

    /// Returns true when the ID is present or explicitly nonexistent.
    fn has(&self, id: &DataId) -> bool {
        !self.get(id).is_unknown()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Record(Arc<Record>),
    Tombstone,
}

/// Mutable mapping from data ID to record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSource {
    entries: BTreeMap<DataId, Slot>,
}

impl RecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source from a list of records.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut source = Self::new();
        for record in records {
            source.set(record);
        }
        source
    }

    pub fn get(&self, id: &DataId) -> RecordState {
        match self.entries.get(id) {
            Some(Slot::Record(record)) => RecordState::Present(Arc::clone(record)),
            Some(Slot::Tombstone) => RecordState::Nonexistent,
            None => RecordState::Unknown,
        }
    }

    /// Store a record under its own ID, replacing any previous state.
    pub fn set(&mut self, record: Record) {
        self.set_shared(Arc::new(record));
    }

    pub fn set_shared(&mut self, record: Arc<Record>) {
        self.entries.insert(record.id().clone(), Slot::Record(record));
    }

    /// Mark the ID as nonexistent.
    pub fn delete(&mut self, id: &DataId) {
        self.entries.insert(id.clone(), Slot::Tombstone);
    }

    /// Forget the ID entirely, returning it to the unknown state.
    pub fn remove(&mut self, id: &DataId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn has(&self, id: &DataId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record_ids(&self) -> impl Iterator<Item = &DataId> {
        self.entries.keys()
    }

    /// Every entry with its state, in data ID order.
    pub fn iter(&self) -> impl Iterator<Item = (&DataId, RecordState)> {
        self.entries.iter().map(|(id, slot)| {
            let state = match slot {
                Slot::Record(record) => RecordState::Present(Arc::clone(record)),
                Slot::Tombstone => RecordState::Nonexistent,
            };
            (id, state)
        })
    }

    /// Mutate a present record.
    ///
    /// The record is cloned first when its `Arc` is shared, so holders of the
    /// previous value never observe the change. Returns false when the ID is
    /// not present.
    pub fn update<F>(&mut self, id: &DataId, mutate: F) -> bool
    where
        F: FnOnce(&mut Record),
    {
        match self.entries.get_mut(id) {
            Some(Slot::Record(record)) => {
                mutate(Arc::make_mut(record));
                true
            }
            _ => false,
        }
    }

    /// Merge a sparse diff into this source field by field.
    ///
    /// Returns the IDs whose state actually changed.
    pub fn merge_diff(&mut self, diff: &RecordSource) -> BTreeSet<DataId> {
        let mut changed = BTreeSet::new();
        for (id, upper) in diff.iter() {
            let lower = self.get(id);
            let next = layer_state(lower.clone(), upper);
            let unchanged = match (&lower, &next) {
                (RecordState::Present(a), RecordState::Present(b)) => Arc::ptr_eq(a, b) || a == b,
                (RecordState::Nonexistent, RecordState::Nonexistent) => true,
                _ => false,
            };
            if !unchanged {
                self.put_state(id, next);
                changed.insert(id.clone());
            }
        }
        changed
    }

    /// Set or tombstone an ID according to a looked-up state.
    ///
    /// `Unknown` removes the entry.
    pub fn put_state(&mut self, id: &DataId, state: RecordState) {
        match state {
            RecordState::Present(record) => {
                self.entries.insert(id.clone(), Slot::Record(record));
            }
            RecordState::Nonexistent => self.delete(id),
            RecordState::Unknown => {
                self.entries.remove(id);
            }
        }
    }
}

impl RecordSourceView for RecordSource {
    fn get(&self, id: &DataId) -> RecordState {
        RecordSource::get(self, id)
    }

    fn record_ids(&self) -> Box<dyn Iterator<Item = DataId> + '_> {
        Box::new(self.entries.keys().cloned())
    }

    fn has(&self, id: &DataId) -> bool {
        RecordSource::has(self, id)
    }
}

/// Compose the state of a sparse diff entry over the state beneath it.
///
/// A tombstone hides the lower state; a diff record merges its fields over a
/// lower record, or stands alone when nothing lower exists.
pub fn layer_state(lower: RecordState, upper: RecordState) -> RecordState {
    match upper {
        RecordState::Unknown => lower,
        RecordState::Nonexistent => RecordState::Nonexistent,
        RecordState::Present(diff) => match lower {
            RecordState::Present(base) => match base.merged_with(&diff) {
                Some(merged) => RecordState::Present(Arc::new(merged)),
                None => RecordState::Present(base),
            },
            _ => RecordState::Present(diff),
        },
    }
}
