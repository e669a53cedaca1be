//! Normalized records and their field values.

use crate::identity::DataId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Value stored under one field storage key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A scalar or a list of scalars. `null` links are stored here as well.
    Scalar(Value),
    /// Reference to another record.
    Link(DataId),
    /// Ordered references; `None` entries are null list items.
    Links(Vec<Option<DataId>>),
}

impl FieldValue {
    pub fn null() -> Self {
        Self::Scalar(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Value::Null))
    }

    /// Every data ID this value points at.
    pub fn linked_ids(&self) -> impl Iterator<Item = &DataId> {
        let (single, many): (Option<&DataId>, &[Option<DataId>]) = match self {
            Self::Scalar(_) => (None, &[]),
            Self::Link(id) => (Some(id), &[]),
            Self::Links(ids) => (None, ids.as_slice()),
        };
        single.into_iter().chain(many.iter().flatten())
    }
}

/// Flat key-value storage unit for one object.
///
/// Records are never mutated once they are shared through a
/// [`RecordSource`](crate::RecordSource): writers clone the record, change the
/// clone and swap the `Arc` in the source. Holders of an older `Arc<Record>`
/// keep seeing the old values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: DataId,
    typename: String,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(id: DataId, typename: impl Into<String>) -> Self {
        Self {
            id,
            typename: typename.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &DataId {
        &self.id
    }

    pub fn typename(&self) -> &str {
        &self.typename
    }

    pub fn set_typename(&mut self, typename: impl Into<String>) {
        self.typename = typename.into();
    }

    pub fn get(&self, storage_key: &str) -> Option<&FieldValue> {
        self.fields.get(storage_key)
    }

    pub fn has_field(&self, storage_key: &str) -> bool {
        self.fields.contains_key(storage_key)
    }

    pub fn set(&mut self, storage_key: impl Into<String>, value: FieldValue) {
        self.fields.insert(storage_key.into(), value);
    }

    pub fn remove(&mut self, storage_key: &str) -> Option<FieldValue> {
        self.fields.remove(storage_key)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Every data ID referenced from this record, in storage key order.
    pub fn linked_ids(&self) -> impl Iterator<Item = &DataId> {
        self.fields.values().flat_map(FieldValue::linked_ids)
    }

    /// Overlay the fields of `next` onto this record.
    ///
    /// Returns `None` when `next` carries nothing new, so callers can keep
    /// the existing `Arc` and skip the dirty mark.
    pub fn merged_with(&self, next: &Record) -> Option<Record> {
        let typename_changed = self.typename != next.typename;
        let fields_changed = next
            .fields
            .iter()
            .any(|(key, value)| self.fields.get(key) != Some(value));
        if !typename_changed && !fields_changed {
            return None;
        }
        let mut merged = self.clone();
        merged.typename = next.typename.clone();
        for (key, value) in &next.fields {
            merged.fields.insert(key.clone(), value.clone());
        }
        Some(merged)
    }
}

/// Three-valued lookup result for one data ID.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordState {
    /// The record exists.
    Present(Arc<Record>),
    /// The record was explicitly deleted.
    Nonexistent,
    /// Nothing is known about the record yet.
    Unknown,
}

impl RecordState {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn is_nonexistent(&self) -> bool {
        matches!(self, Self::Nonexistent)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub fn record(&self) -> Option<&Arc<Record>> {
        match self {
            Self::Present(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<Arc<Record>> {
        match self {
            Self::Present(record) => Some(record),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(id: &str, name: &str) -> Record {
        let mut record = Record::new(DataId::new(id), "User");
        record.set("name", FieldValue::Scalar(json!(name)));
        record
    }

    #[test]
    fn test_merge_without_changes_returns_none() {
        let prev = user("1", "Ann");
        let next = user("1", "Ann");
        assert!(prev.merged_with(&next).is_none());
    }

    #[test]
    fn test_merge_keeps_untouched_fields() {
        let mut prev = user("1", "Ann");
        prev.set("age", FieldValue::Scalar(json!(30)));
        let next = user("1", "Bea");

        let merged = prev.merged_with(&next).unwrap();
        assert_eq!(merged.get("name"), Some(&FieldValue::Scalar(json!("Bea"))));
        assert_eq!(merged.get("age"), Some(&FieldValue::Scalar(json!(30))));
    }

    #[test]
    fn test_merge_picks_up_typename_change() {
        let prev = user("1", "Ann");
        let mut next = user("1", "Ann");
        next.set_typename("Admin");
        let merged = prev.merged_with(&next).unwrap();
        assert_eq!(merged.typename(), "Admin");
    }

    #[test]
    fn test_linked_ids_skips_null_items() {
        let mut record = Record::new(DataId::new("1"), "User");
        record.set("best", FieldValue::Link(DataId::new("2")));
        record.set(
            "friends",
            FieldValue::Links(vec![Some(DataId::new("3")), None, Some(DataId::new("4"))]),
        );
        record.set("name", FieldValue::Scalar(json!("Ann")));

        let ids: Vec<&str> = record.linked_ids().map(DataId::as_str).collect();
        assert_eq!(ids, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_shared_record_survives_swap() {
        let first = Arc::new(user("1", "Ann"));
        let held = Arc::clone(&first);
        let mut second = (*first).clone();
        second.set("name", FieldValue::Scalar(json!("Bea")));
        drop(first);

        assert_eq!(held.get("name"), Some(&FieldValue::Scalar(json!("Ann"))));
        assert_eq!(second.get("name"), Some(&FieldValue::Scalar(json!("Bea"))));
    }
}
