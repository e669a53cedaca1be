//! Denormalizes selectors into snapshots.
//!
//! Reading is a pure function of (source, selector). The walk records every
//! data ID it dereferences so the store can tell which subscriptions a write
//! may affect.

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tessera_core::{
    DataId, FieldValue, LinkedField, Record, RecordSourceView, RecordState, ScalarField,
    Selection, Selector, Snapshot, Variables, ID_KEY, TYPENAME_KEY,
};

/// Read a selector against a source.
///
/// An unknown record needed by the walk leaves its key out of the result and
/// flags the snapshot as missing data. A nonexistent record reads as `null`
/// and is not missing.
pub fn read(source: &dyn RecordSourceView, selector: &Selector) -> Snapshot {
    let mut reader = Reader {
        source,
        variables: selector.variables(),
        seen_records: BTreeSet::new(),
        is_missing_data: false,
    };
    let data = reader.read_record(selector.data_id(), selector.selections());
    Snapshot {
        selector: selector.clone(),
        data,
        seen_records: reader.seen_records,
        is_missing_data: reader.is_missing_data,
    }
}

struct Reader<'a> {
    source: &'a dyn RecordSourceView,
    variables: &'a Variables,
    seen_records: BTreeSet<DataId>,
    is_missing_data: bool,
}

impl Reader<'_> {
    fn read_record(&mut self, id: &DataId, selections: &[Selection]) -> Option<Value> {
        self.seen_records.insert(id.clone());
        match self.source.get(id) {
            RecordState::Unknown => {
                self.is_missing_data = true;
                None
            }
            RecordState::Nonexistent => Some(Value::Null),
            RecordState::Present(record) => {
                let mut data = Map::new();
                self.read_selections(&record, selections, &mut data);
                Some(Value::Object(data))
            }
        }
    }

    fn read_selections(
        &mut self,
        record: &Record,
        selections: &[Selection],
        data: &mut Map<String, Value>,
    ) {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => self.read_scalar(record, field, data),
                Selection::Linked(field) => self.read_linked(record, field, data),
                Selection::Condition(condition) => {
                    if condition.passes(self.variables) {
                        self.read_selections(record, &condition.selections, data);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if record.typename() == fragment.type_condition {
                        self.read_selections(record, &fragment.selections, data);
                    }
                }
                // Deferred data lives in the same record once it has arrived.
                Selection::Defer(defer) => self.read_selections(record, &defer.selections, data),
            }
        }
    }

    fn read_scalar(&mut self, record: &Record, field: &ScalarField, data: &mut Map<String, Value>) {
        let key = field.response_key().to_string();
        match field.name.as_str() {
            TYPENAME_KEY => {
                data.insert(key, Value::String(record.typename().to_string()));
            }
            ID_KEY => {
                data.insert(key, Value::String(record.id().to_string()));
            }
            _ => match record.get(&field.storage_key(self.variables)) {
                Some(FieldValue::Scalar(value)) => {
                    data.insert(key, value.clone());
                }
                _ => self.is_missing_data = true,
            },
        }
    }

    fn read_linked(&mut self, record: &Record, field: &LinkedField, data: &mut Map<String, Value>) {
        let key = field.response_key().to_string();
        match record.get(&field.storage_key(self.variables)) {
            Some(FieldValue::Scalar(Value::Null)) => {
                data.insert(key, Value::Null);
            }
            Some(FieldValue::Link(target)) if !field.plural => {
                if let Some(value) = self.read_record(target, &field.selections) {
                    data.insert(key, value);
                }
            }
            Some(FieldValue::Links(targets)) if field.plural => {
                let items = targets
                    .iter()
                    .map(|target| match target {
                        Some(target) => self
                            .read_record(target, &field.selections)
                            .unwrap_or(Value::Null),
                        None => Value::Null,
                    })
                    .collect();
                data.insert(key, Value::Array(items));
            }
            _ => self.is_missing_data = true,
        }
    }
}
