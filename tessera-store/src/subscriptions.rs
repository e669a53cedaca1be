//! Subscription registry with a reverse index from data IDs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tessera_core::{DataId, Snapshot};

/// Callback invoked with the fresh snapshot when a subscription's result changes.
pub type SubscriptionCallback = Box<dyn FnMut(&Snapshot)>;

struct Subscription {
    snapshot: Snapshot,
    callback: SubscriptionCallback,
}

/// Active subscriptions and the IDs each one last observed.
///
/// The index maps every seen record to the subscriptions that read it, so a
/// notify cycle only visits subscriptions whose seen records intersect the
/// dirty set.
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_subscription_id: u64,
    subscriptions: BTreeMap<u64, Subscription>,
    index: HashMap<DataId, BTreeSet<u64>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, snapshot: Snapshot, callback: SubscriptionCallback) -> u64 {
        self.next_subscription_id = self.next_subscription_id.saturating_add(1);
        let id = self.next_subscription_id;
        self.index_seen(id, &snapshot);
        self.subscriptions.insert(id, Subscription { snapshot, callback });
        id
    }

    pub fn remove(&mut self, id: u64) -> bool {
        match self.subscriptions.remove(&id) {
            Some(subscription) => {
                self.unindex_seen(id, &subscription.snapshot);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.subscriptions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Last snapshot delivered to (or taken for) a subscription.
    pub fn snapshot(&self, id: u64) -> Option<&Snapshot> {
        self.subscriptions.get(&id).map(|subscription| &subscription.snapshot)
    }

    /// Subscriptions that observed at least one of the given IDs, in
    /// subscription order.
    pub fn affected_by(&self, dirty: &BTreeSet<DataId>) -> BTreeSet<u64> {
        dirty
            .iter()
            .filter_map(|id| self.index.get(id))
            .flatten()
            .copied()
            .collect()
    }

    /// Store a re-read snapshot, calling back when the result changed.
    ///
    /// The seen-record index is refreshed either way. Returns whether the
    /// callback fired.
    pub fn deliver(&mut self, id: u64, next: Snapshot) -> bool {
        let Some(previous) = self.subscriptions.get(&id).map(|s| s.snapshot.seen_records.clone())
        else {
            return false;
        };
        for data_id in previous.difference(&next.seen_records) {
            self.unindex_one(id, data_id);
        }
        for data_id in next.seen_records.difference(&previous) {
            self.index.entry(data_id.clone()).or_default().insert(id);
        }

        let Some(subscription) = self.subscriptions.get_mut(&id) else {
            return false;
        };
        let changed = !subscription.snapshot.same_result(&next);
        subscription.snapshot = next;
        if changed {
            (subscription.callback)(&subscription.snapshot);
        }
        changed
    }

    fn index_seen(&mut self, id: u64, snapshot: &Snapshot) {
        for data_id in &snapshot.seen_records {
            self.index.entry(data_id.clone()).or_default().insert(id);
        }
    }

    fn unindex_seen(&mut self, id: u64, snapshot: &Snapshot) {
        for data_id in &snapshot.seen_records {
            self.unindex_one(id, data_id);
        }
    }

    fn unindex_one(&mut self, id: u64, data_id: &DataId) {
        if let Some(ids) = self.index.get_mut(data_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.index.remove(data_id);
            }
        }
    }
}
