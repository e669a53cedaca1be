//! Retained selectors and mark-and-sweep collection.

use crate::reader::read;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tessera_core::{DataId, RecordSource, Selector, SelectorKey, Timestamp};

// ============================================================================
// RETAIN REGISTRY
// ============================================================================

/// A retained selector with its reference count.
#[derive(Debug, Clone, PartialEq)]
pub struct RetainedSelector {
    selector: Selector,
    ref_count: usize,
    fetch_time: Option<Timestamp>,
}

impl RetainedSelector {
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// When a complete response for this selector was last written.
    pub fn fetch_time(&self) -> Option<Timestamp> {
        self.fetch_time
    }
}

/// GC roots keyed by selector identity.
///
/// Equal selectors share one entry. When a count reaches zero the entry stops
/// being retained; with a non-zero release buffer it is kept as a root until
/// that many newer releases push it out.
#[derive(Debug, Clone, Default)]
pub struct RetainRegistry {
    active: HashMap<SelectorKey, RetainedSelector>,
    released: VecDeque<(SelectorKey, RetainedSelector)>,
    buffer_size: usize,
}

impl RetainRegistry {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            active: HashMap::new(),
            released: VecDeque::new(),
            buffer_size,
        }
    }

    /// Increment the count for a selector, registering it on first use.
    pub fn retain(&mut self, selector: &Selector) -> SelectorKey {
        let key = selector.key();
        if let Some(entry) = self.active.get_mut(&key) {
            entry.ref_count += 1;
            return key;
        }
        let fetch_time = self
            .released
            .iter()
            .position(|(released, _)| *released == key)
            .and_then(|position| self.released.remove(position))
            .and_then(|(_, entry)| entry.fetch_time);
        self.active.insert(
            key.clone(),
            RetainedSelector {
                selector: selector.clone(),
                ref_count: 1,
                fetch_time,
            },
        );
        key
    }

    /// Decrement the count for a key. Returns false when it is not retained.
    pub fn release(&mut self, key: &SelectorKey) -> bool {
        let Some(entry) = self.active.get_mut(key) else {
            return false;
        };
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return true;
        }
        if let Some(entry) = self.active.remove(key) {
            if self.buffer_size > 0 {
                self.released.push_back((key.clone(), entry));
                while self.released.len() > self.buffer_size {
                    self.released.pop_front();
                }
            }
        }
        true
    }

    pub fn get(&self, key: &SelectorKey) -> Option<&RetainedSelector> {
        self.active.get(key)
    }

    pub fn is_retained(&self, key: &SelectorKey) -> bool {
        self.active.contains_key(key)
    }

    /// Stamp the fetch time of a retained selector.
    pub fn mark_fetched(&mut self, key: &SelectorKey, fetched_at: Timestamp) -> bool {
        match self.active.get_mut(key) {
            Some(entry) => {
                entry.fetch_time = Some(fetched_at);
                true
            }
            None => false,
        }
    }

    /// Active selectors followed by buffered releases.
    pub fn roots(&self) -> impl Iterator<Item = &Selector> {
        self.active
            .values()
            .chain(self.released.iter().map(|(_, entry)| entry))
            .map(RetainedSelector::selector)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

// ============================================================================
// COLLECTION
// ============================================================================

/// Outcome of one GC pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub marked: usize,
    pub swept: usize,
}

/// Run one mark-and-sweep pass over the base source.
///
/// Roots are traversed against the base alone. Callers must not collect
/// while optimistic layers are applied: any subset of layers can become the
/// effective view after a rollback, and a record reachable through one of
/// them would otherwise be swept.
pub fn collect<'s>(
    base: &mut RecordSource,
    roots: impl IntoIterator<Item = &'s Selector>,
) -> GcReport {
    let mut live: BTreeSet<DataId> = BTreeSet::new();
    for root in roots {
        live.extend(read(&*base, root).seen_records);
    }

    let doomed: Vec<DataId> = base
        .record_ids()
        .filter(|id| !live.contains(*id))
        .cloned()
        .collect();
    for id in &doomed {
        base.remove(id);
    }

    GcReport {
        marked: live.len(),
        swept: doomed.len(),
    }
}
