//! Read results.

use crate::identity::DataId;
use crate::selection::Selector;
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Immutable result of reading a selector.
///
/// `data` is `None` when the root record is unknown; a nonexistent root
/// reads as `Some(Value::Null)`. Snapshots own their data and stay valid
/// across later writes to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub selector: Selector,
    pub data: Option<Value>,
    pub seen_records: BTreeSet<DataId>,
    pub is_missing_data: bool,
}

impl Snapshot {
    /// True when data and missing-data flag match. Seen records are not
    /// compared; notify uses this to decide whether a subscriber sees a change.
    pub fn same_result(&self, other: &Snapshot) -> bool {
        self.is_missing_data == other.is_missing_data && self.data == other.data
    }

    pub fn has_seen(&self, id: &DataId) -> bool {
        self.seen_records.contains(id)
    }
}

/// Whether a selector can be served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    /// Every selected field is present. `fetch_time` is set when the
    /// operation is retained and was written by a complete response.
    Available { fetch_time: Option<Timestamp> },
    /// Data is present but older than the query cache expiration.
    Stale,
    /// At least one selected record or field is unknown.
    Missing,
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}
