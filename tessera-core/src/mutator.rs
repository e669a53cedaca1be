//! Copy-on-write record writer.
//!
//! A [`SourceMutator`] pairs a read-only backing view with a sink source.
//! Reads fall through from the sink to the backing view field by field;
//! writes land in the sink as sparse records holding only the touched
//! fields. The sink is therefore a diff that can later be merged into a base
//! source or kept as an optimistic layer.

use crate::error::{InvariantError, TesseraResult};
use crate::identity::{DataId, ROOT_TYPE};
use crate::record::{FieldValue, Record, RecordState};
use crate::source::{layer_state, RecordSource, RecordSourceView};
use serde_json::Value;
use std::collections::BTreeSet;

/// Write handle over a backing view and a diff sink.
pub struct SourceMutator<'a> {
    backing: &'a dyn RecordSourceView,
    sink: &'a mut RecordSource,
    dirty: BTreeSet<DataId>,
}

impl<'a> SourceMutator<'a> {
    pub fn new(backing: &'a dyn RecordSourceView, sink: &'a mut RecordSource) -> Self {
        Self {
            backing,
            sink,
            dirty: BTreeSet::new(),
        }
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Effective state of a record: the sink diff layered over the backing view.
    pub fn get(&self, id: &DataId) -> RecordState {
        layer_state(self.backing.get(id), self.sink.get(id))
    }

    pub fn exists(&self, id: &DataId) -> bool {
        self.get(id).is_present()
    }

    pub fn typename(&self, id: &DataId) -> Option<String> {
        match self.sink.get(id) {
            RecordState::Present(record) => Some(record.typename().to_string()),
            RecordState::Nonexistent => None,
            RecordState::Unknown => self
                .backing
                .get(id)
                .record()
                .map(|record| record.typename().to_string()),
        }
    }

    /// Effective value of one field.
    pub fn get_field(&self, id: &DataId, storage_key: &str) -> Option<FieldValue> {
        match self.sink.get(id) {
            RecordState::Present(record) => {
                if let Some(value) = record.get(storage_key) {
                    return Some(value.clone());
                }
            }
            RecordState::Nonexistent => return None,
            RecordState::Unknown => {}
        }
        self.backing
            .get(id)
            .record()
            .and_then(|record| record.get(storage_key).cloned())
    }

    pub fn get_value(&self, id: &DataId, storage_key: &str) -> Option<Value> {
        match self.get_field(id, storage_key) {
            Some(FieldValue::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_link(&self, id: &DataId, storage_key: &str) -> Option<DataId> {
        match self.get_field(id, storage_key) {
            Some(FieldValue::Link(target)) => Some(target),
            _ => None,
        }
    }

    pub fn get_links(&self, id: &DataId, storage_key: &str) -> Option<Vec<Option<DataId>>> {
        match self.get_field(id, storage_key) {
            Some(FieldValue::Links(targets)) => Some(targets),
            _ => None,
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Write one field. Returns true when the effective value changed.
    pub fn set_field(
        &mut self,
        id: &DataId,
        storage_key: &str,
        value: FieldValue,
    ) -> TesseraResult<bool> {
        if self.get_field(id, storage_key).as_ref() == Some(&value) {
            return Ok(false);
        }
        let key = storage_key.to_string();
        if !self.sink.update(id, |record| record.set(key, value.clone())) {
            let typename = self.existing_typename(id)?;
            let mut record = Record::new(id.clone(), typename);
            record.set(storage_key, value);
            self.sink.set(record);
        }
        self.dirty.insert(id.clone());
        Ok(true)
    }

    pub fn set_value(
        &mut self,
        id: &DataId,
        storage_key: &str,
        value: Value,
    ) -> TesseraResult<bool> {
        self.set_field(id, storage_key, FieldValue::Scalar(value))
    }

    pub fn set_link(
        &mut self,
        id: &DataId,
        storage_key: &str,
        target: DataId,
    ) -> TesseraResult<bool> {
        self.set_field(id, storage_key, FieldValue::Link(target))
    }

    pub fn set_links(
        &mut self,
        id: &DataId,
        storage_key: &str,
        targets: Vec<Option<DataId>>,
    ) -> TesseraResult<bool> {
        self.set_field(id, storage_key, FieldValue::Links(targets))
    }

    /// Create an empty record. Fails when the record already exists.
    pub fn create(&mut self, id: &DataId, typename: &str) -> TesseraResult<()> {
        if self.exists(id) {
            return Err(InvariantError::RecordAlreadyExists {
                data_id: id.clone(),
            }
            .into());
        }
        self.sink.set(Record::new(id.clone(), typename));
        self.dirty.insert(id.clone());
        Ok(())
    }

    /// Make sure a record exists with the given typename.
    ///
    /// Returns the previous typename when an existing record carried a
    /// different one; the new typename is written either way.
    pub fn get_or_create(&mut self, id: &DataId, typename: &str) -> TesseraResult<Option<String>> {
        match self.typename(id) {
            None => {
                self.create(id, typename)?;
                Ok(None)
            }
            Some(previous) if previous == typename => Ok(None),
            Some(previous) => {
                self.set_typename(id, typename)?;
                Ok(Some(previous))
            }
        }
    }

    /// Change the typename of an existing record.
    pub fn set_typename(&mut self, id: &DataId, typename: &str) -> TesseraResult<bool> {
        let current = self.existing_typename(id)?;
        if current == typename {
            return Ok(false);
        }
        if !self.sink.update(id, |record| record.set_typename(typename)) {
            self.sink.set(Record::new(id.clone(), typename));
        }
        self.dirty.insert(id.clone());
        Ok(true)
    }

    /// Mark a record nonexistent. Returns false when it already was.
    pub fn delete(&mut self, id: &DataId) -> bool {
        if self.get(id).is_nonexistent() {
            return false;
        }
        self.sink.delete(id);
        self.dirty.insert(id.clone());
        true
    }

    /// Root record, created on first use.
    pub fn root(&mut self) -> TesseraResult<DataId> {
        let root = DataId::root();
        if !self.exists(&root) {
            self.create(&root, ROOT_TYPE)?;
        }
        Ok(root)
    }

    pub fn dirty_ids(&self) -> &BTreeSet<DataId> {
        &self.dirty
    }

    pub fn into_dirty_ids(self) -> BTreeSet<DataId> {
        self.dirty
    }

    /// The diff written so far.
    pub fn sink(&self) -> &RecordSource {
        self.sink
    }

    fn existing_typename(&self, id: &DataId) -> TesseraResult<String> {
        self.typename(id).ok_or_else(|| {
            InvariantError::MissingRecord {
                data_id: id.clone(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TesseraError;
    use serde_json::json;

    fn base() -> RecordSource {
        let mut user = Record::new(DataId::new("1"), "User");
        user.set("name", FieldValue::Scalar(json!("Ann")));
        user.set("age", FieldValue::Scalar(json!(30)));
        RecordSource::from_records(vec![user])
    }

    #[test]
    fn test_reads_fall_through_per_field() {
        let base = base();
        let mut sink = RecordSource::new();
        let mut mutator = SourceMutator::new(&base, &mut sink);

        mutator
            .set_value(&DataId::new("1"), "name", json!("Bea"))
            .unwrap();

        assert_eq!(mutator.get_value(&DataId::new("1"), "name"), Some(json!("Bea")));
        assert_eq!(mutator.get_value(&DataId::new("1"), "age"), Some(json!(30)));
    }

    #[test]
    fn test_writes_are_sparse() {
        let base = base();
        let mut sink = RecordSource::new();
        {
            let mut mutator = SourceMutator::new(&base, &mut sink);
            mutator
                .set_value(&DataId::new("1"), "name", json!("Bea"))
                .unwrap();
        }
        let diff = sink.get(&DataId::new("1")).into_record().unwrap();
        assert_eq!(diff.field_count(), 1);
        assert_eq!(diff.typename(), "User");
    }

    #[test]
    fn test_equal_write_is_not_dirty() {
        let base = base();
        let mut sink = RecordSource::new();
        let mut mutator = SourceMutator::new(&base, &mut sink);

        let changed = mutator
            .set_value(&DataId::new("1"), "name", json!("Ann"))
            .unwrap();

        assert!(!changed);
        assert!(mutator.dirty_ids().is_empty());
        assert!(mutator.sink().is_empty());
    }

    #[test]
    fn test_write_to_missing_record_fails() {
        let base = RecordSource::new();
        let mut sink = RecordSource::new();
        let mut mutator = SourceMutator::new(&base, &mut sink);

        let result = mutator.set_value(&DataId::new("9"), "name", json!("Ann"));
        assert!(matches!(
            result,
            Err(TesseraError::Invariant(InvariantError::MissingRecord { .. }))
        ));
    }

    #[test]
    fn test_create_existing_fails() {
        let base = base();
        let mut sink = RecordSource::new();
        let mut mutator = SourceMutator::new(&base, &mut sink);

        assert!(matches!(
            mutator.create(&DataId::new("1"), "User"),
            Err(TesseraError::Invariant(InvariantError::RecordAlreadyExists { .. }))
        ));
    }

    #[test]
    fn test_get_or_create_reports_typename_change() {
        let base = base();
        let mut sink = RecordSource::new();
        let mut mutator = SourceMutator::new(&base, &mut sink);

        let previous = mutator.get_or_create(&DataId::new("1"), "Admin").unwrap();
        assert_eq!(previous.as_deref(), Some("User"));
        assert_eq!(mutator.typename(&DataId::new("1")).as_deref(), Some("Admin"));
        assert_eq!(mutator.get_value(&DataId::new("1"), "age"), Some(json!(30)));

        let created = mutator.get_or_create(&DataId::new("2"), "User").unwrap();
        assert!(created.is_none());
        assert!(mutator.exists(&DataId::new("2")));
    }

    #[test]
    fn test_delete_hides_backing_record() {
        let base = base();
        let mut sink = RecordSource::new();
        let mut mutator = SourceMutator::new(&base, &mut sink);

        assert!(mutator.delete(&DataId::new("1")));
        assert!(!mutator.delete(&DataId::new("1")));
        assert!(mutator.get(&DataId::new("1")).is_nonexistent());
        assert_eq!(mutator.get_value(&DataId::new("1"), "name"), None);
        assert!(base.get(&DataId::new("1")).is_present());
    }

    #[test]
    fn test_root_created_once() {
        let base = RecordSource::new();
        let mut sink = RecordSource::new();
        let mut mutator = SourceMutator::new(&base, &mut sink);

        let root = mutator.root().unwrap();
        assert_eq!(root, DataId::root());
        assert_eq!(mutator.typename(&root).as_deref(), Some(ROOT_TYPE));
        assert!(mutator.root().is_ok());
    }
}
