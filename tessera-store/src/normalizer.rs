//! Merges payloads into a record source.
//!
//! The normalizer walks the selection tree and the payload in lock-step and
//! writes through a [`SourceMutator`], so the same code fills the base source,
//! an optimistic layer or a publish diff. Writes are applied field by field:
//! when a shape error aborts the walk, fields written before it stay written.

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tessera_core::{
    format_path, DataId, Diagnostic, FieldValue, InvariantError, LinkedField, NormalizationError,
    PathSegment, RecordSource, Selection, Selector, SourceMutator, StoreConfig, TesseraResult,
    Variables, ID_KEY, OWNER_KEY, TYPENAME_KEY,
};

// ============================================================================
// OPTIONS AND OUTPUT
// ============================================================================

/// Per-call normalization options.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOptions {
    /// Response path of the payload root; empty for a complete response.
    pub path: Vec<PathSegment>,
    pub id_field_name: String,
    pub treat_missing_fields_as_null: bool,
    pub max_stream_gap: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

impl NormalizeOptions {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            path: Vec::new(),
            id_field_name: config.id_field_name.clone(),
            treat_missing_fields_as_null: config.treat_missing_fields_as_null,
            max_stream_gap: config.max_stream_gap,
        }
    }

    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }
}

/// Point in a normalized tree where a later incremental chunk attaches.
#[derive(Debug, Clone, PartialEq)]
pub enum IncrementalPlaceholder {
    /// Deferred selections on the record at `path`.
    Defer {
        label: String,
        path: Vec<PathSegment>,
        parent_id: DataId,
        selections: Vec<Selection>,
    },
    /// Streamed items of the plural field at `path`.
    Stream {
        label: String,
        path: Vec<PathSegment>,
        parent_id: DataId,
        field: LinkedField,
    },
}

impl IncrementalPlaceholder {
    pub fn label(&self) -> &str {
        match self {
            Self::Defer { label, .. } | Self::Stream { label, .. } => label,
        }
    }

    pub fn path(&self) -> &[PathSegment] {
        match self {
            Self::Defer { path, .. } | Self::Stream { path, .. } => path,
        }
    }
}

/// Result of one normalization pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeOutput {
    /// IDs whose effective state changed.
    pub dirty: BTreeSet<DataId>,
    pub placeholders: Vec<IncrementalPlaceholder>,
    pub diagnostics: Vec<Diagnostic>,
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Normalize a payload for a selector through a mutator.
///
/// The selector's own record is created when needed, using the payload's
/// `__typename` or the node's type.
pub fn normalize(
    mutator: &mut SourceMutator<'_>,
    selector: &Selector,
    payload: &Value,
    options: &NormalizeOptions,
) -> TesseraResult<NormalizeOutput> {
    let mut normalizer = Normalizer::new(mutator, selector.variables(), options);
    let data = normalizer.expect_object(payload)?;
    let id = selector.data_id();
    let typename = match normalizer.asserted_typename(data)? {
        Some(asserted) => asserted.to_string(),
        None => normalizer
            .mutator
            .typename(id)
            .unwrap_or_else(|| selector.node().type_name.clone()),
    };
    normalizer.ensure_record(id, &typename)?;
    normalizer.traverse(id, &typename, selector.selections(), data)?;
    Ok(normalizer.finish())
}

/// Normalize a payload straight into a source, with no backing view.
pub fn normalize_into(
    source: &mut RecordSource,
    selector: &Selector,
    payload: &Value,
    options: &NormalizeOptions,
) -> TesseraResult<NormalizeOutput> {
    let empty = RecordSource::new();
    let mut mutator = SourceMutator::new(&empty, source);
    normalize(&mut mutator, selector, payload, options)
}

/// Normalize deferred selections onto an existing record.
pub(crate) fn normalize_deferred(
    mutator: &mut SourceMutator<'_>,
    parent_id: &DataId,
    selections: &[Selection],
    variables: &Variables,
    payload: &Value,
    options: &NormalizeOptions,
) -> TesseraResult<NormalizeOutput> {
    let mut normalizer = Normalizer::new(mutator, variables, options);
    let data = normalizer.expect_object(payload)?;
    let typename = normalizer.existing_typename(parent_id)?;
    normalizer.traverse(parent_id, &typename, selections, data)?;
    Ok(normalizer.finish())
}

/// Normalize one streamed list item and splice it into the parent's list.
///
/// An index inside the list overwrites that slot; an index past the end
/// pads the gap with null items, up to `max_stream_gap` of them.
pub(crate) fn normalize_stream_item(
    mutator: &mut SourceMutator<'_>,
    parent_id: &DataId,
    field: &LinkedField,
    index: usize,
    variables: &Variables,
    item: &Value,
    options: &NormalizeOptions,
) -> TesseraResult<NormalizeOutput> {
    let mut normalizer = Normalizer::new(mutator, variables, options);
    normalizer.existing_typename(parent_id)?;
    let storage_key = field.storage_key(variables);
    let mut links = normalizer
        .mutator
        .get_links(parent_id, &storage_key)
        .unwrap_or_default();
    let limit = links.len().saturating_add(options.max_stream_gap);
    if index > limit {
        normalizer.path.push(PathSegment::Index(index));
        return Err(NormalizationError::StructuralMismatch {
            path: format_path(&normalizer.path),
            expected: format!("list index at most {limit}"),
            found: format!("index {index}"),
        }
        .into());
    }

    let child = normalizer.normalize_item(parent_id, field, &storage_key, Some(index), item)?;
    if index < links.len() {
        links[index] = child;
    } else {
        links.resize(index, None);
        links.push(child);
    }
    normalizer.mutator.set_links(parent_id, &storage_key, links)?;
    Ok(normalizer.finish())
}

// ============================================================================
// WALK
// ============================================================================

struct Normalizer<'m, 'a> {
    mutator: &'m mut SourceMutator<'a>,
    variables: &'m Variables,
    options: &'m NormalizeOptions,
    path: Vec<PathSegment>,
    placeholders: Vec<IncrementalPlaceholder>,
    diagnostics: Vec<Diagnostic>,
}

impl<'m, 'a> Normalizer<'m, 'a> {
    fn new(
        mutator: &'m mut SourceMutator<'a>,
        variables: &'m Variables,
        options: &'m NormalizeOptions,
    ) -> Self {
        Self {
            mutator,
            variables,
            options,
            path: options.path.clone(),
            placeholders: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn finish(self) -> NormalizeOutput {
        NormalizeOutput {
            dirty: self.mutator.dirty_ids().clone(),
            placeholders: self.placeholders,
            diagnostics: self.diagnostics,
        }
    }

    fn traverse(
        &mut self,
        id: &DataId,
        typename: &str,
        selections: &[Selection],
        data: &Map<String, Value>,
    ) -> TesseraResult<()> {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => {
                    if field.name == TYPENAME_KEY || field.name == ID_KEY {
                        continue;
                    }
                    let storage_key = field.storage_key(self.variables);
                    match data.get(field.response_key()) {
                        Some(value) => {
                            self.mutator.set_value(id, &storage_key, value.clone())?;
                        }
                        None if self.options.treat_missing_fields_as_null => {
                            self.mutator.set_value(id, &storage_key, Value::Null)?;
                        }
                        None => {}
                    }
                }
                Selection::Linked(field) => self.normalize_linked(id, field, data)?,
                Selection::Condition(condition) => {
                    if condition.passes(self.variables) {
                        self.traverse(id, typename, &condition.selections, data)?;
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if fragment.type_condition == typename {
                        self.traverse(id, typename, &fragment.selections, data)?;
                    }
                }
                Selection::Defer(defer) => {
                    if defer.is_active(self.variables) {
                        self.placeholders.push(IncrementalPlaceholder::Defer {
                            label: defer.label.clone(),
                            path: self.path.clone(),
                            parent_id: id.clone(),
                            selections: defer.selections.clone(),
                        });
                    } else {
                        self.traverse(id, typename, &defer.selections, data)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn normalize_linked(
        &mut self,
        id: &DataId,
        field: &LinkedField,
        data: &Map<String, Value>,
    ) -> TesseraResult<()> {
        let storage_key = field.storage_key(self.variables);
        let value = match data.get(field.response_key()) {
            Some(value) => value,
            None => {
                if self.options.treat_missing_fields_as_null {
                    self.mutator.set_field(id, &storage_key, FieldValue::null())?;
                }
                return Ok(());
            }
        };

        self.path.push(PathSegment::Key(field.response_key().to_string()));
        match value {
            Value::Null => {
                self.mutator.set_field(id, &storage_key, FieldValue::null())?;
            }
            Value::Array(items) if field.plural => {
                if let Some(label) = field.active_stream(self.variables) {
                    self.placeholders.push(IncrementalPlaceholder::Stream {
                        label: label.to_string(),
                        path: self.path.clone(),
                        parent_id: id.clone(),
                        field: field.clone(),
                    });
                }
                let mut links = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    links.push(self.normalize_item(id, field, &storage_key, Some(index), item)?);
                }
                self.mutator.set_links(id, &storage_key, links)?;
            }
            Value::Object(_) if !field.plural => {
                if let Some(child) = self.normalize_item(id, field, &storage_key, None, value)? {
                    self.mutator.set_link(id, &storage_key, child)?;
                }
            }
            other => {
                let expected = if field.plural { "list" } else { "object" };
                return Err(self.mismatch(expected, other).into());
            }
        }
        self.path.pop();
        Ok(())
    }

    /// Normalize one linked object, returning its data ID (`None` for null).
    fn normalize_item(
        &mut self,
        parent_id: &DataId,
        field: &LinkedField,
        storage_key: &str,
        index: Option<usize>,
        item: &Value,
    ) -> TesseraResult<Option<DataId>> {
        if let Some(index) = index {
            self.path.push(PathSegment::Index(index));
        }
        let child = match item {
            Value::Null => None,
            Value::Object(data) => {
                let (child_id, owner) = self.resolve_id(data, parent_id, storage_key, index)?;
                let existed = self.mutator.exists(&child_id);
                let typename = match self.asserted_typename(data)? {
                    Some(asserted) => asserted.to_string(),
                    None => field.concrete_type.clone().ok_or_else(|| {
                        NormalizationError::MissingTypename {
                            path: format_path(&self.path),
                        }
                    })?,
                };
                self.ensure_record(&child_id, &typename)?;
                self.claim_owner(&child_id, owner, existed)?;
                self.traverse(&child_id, &typename, &field.selections, data)?;
                Some(child_id)
            }
            other => return Err(self.mismatch("object", other).into()),
        };
        if index.is_some() {
            self.path.pop();
        }
        Ok(child)
    }

    /// Resolve the identity of a linked object. Synthesized client IDs come
    /// back with the owner triple they were derived from.
    fn resolve_id(
        &self,
        data: &Map<String, Value>,
        parent_id: &DataId,
        storage_key: &str,
        index: Option<usize>,
    ) -> TesseraResult<(DataId, Option<Value>)> {
        match data.get(&self.options.id_field_name) {
            None | Some(Value::Null) => Ok((
                DataId::client_id(parent_id, storage_key, index),
                Some(DataId::client_owner(parent_id, storage_key, index)),
            )),
            Some(Value::String(id)) => Ok((DataId::new(id.as_str()), None)),
            Some(Value::Number(id)) if id.is_i64() || id.is_u64() => {
                Ok((DataId::new(id.to_string()), None))
            }
            Some(other) => Err(NormalizationError::InvalidIdentity {
                path: format_path(&self.path),
                reason: format!(
                    "{} must be a string or an integer, found {}",
                    self.options.id_field_name,
                    kind_of(other)
                ),
            }
            .into()),
        }
    }

    fn asserted_typename<'v>(
        &self,
        data: &'v Map<String, Value>,
    ) -> TesseraResult<Option<&'v str>> {
        match data.get(TYPENAME_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(typename)) => Ok(Some(typename)),
            Some(other) => Err(self.mismatch("string", other).into()),
        }
    }

    /// Create the record or adopt the asserted typename, reporting conflicts.
    fn ensure_record(&mut self, id: &DataId, typename: &str) -> TesseraResult<()> {
        if let Some(previous) = self.mutator.get_or_create(id, typename)? {
            tracing::warn!(
                data_id = %id,
                previous_typename = %previous,
                asserted_typename = %typename,
                "Payload changed the typename of an existing record"
            );
            self.diagnostics.push(Diagnostic::IdentityConflict {
                data_id: id.clone(),
                previous_typename: previous,
                asserted_typename: typename.to_string(),
            });
        }
        Ok(())
    }

    /// Stamp a synthesized record with its owner and report an ID that two
    /// different owners resolve to. A missing owner is a server identity.
    fn claim_owner(
        &mut self,
        id: &DataId,
        owner: Option<Value>,
        existed: bool,
    ) -> TesseraResult<()> {
        let claimed = owner.unwrap_or(Value::Null);
        if existed {
            let recorded = self.mutator.get_value(id, OWNER_KEY).unwrap_or(Value::Null);
            if recorded == claimed {
                return Ok(());
            }
            let previous_owner = describe_owner(&recorded);
            let owner = describe_owner(&claimed);
            tracing::warn!(
                data_id = %id,
                previous_owner = ?previous_owner,
                owner = ?owner,
                "Two parent fields resolved to the same client ID"
            );
            self.diagnostics.push(Diagnostic::ClientIdCollision {
                data_id: id.clone(),
                previous_owner,
                owner,
            });
        }
        if existed || !claimed.is_null() {
            self.mutator.set_value(id, OWNER_KEY, claimed)?;
        }
        Ok(())
    }

    fn existing_typename(&self, id: &DataId) -> TesseraResult<String> {
        self.mutator.typename(id).ok_or_else(|| {
            InvariantError::MissingRecord {
                data_id: id.clone(),
            }
            .into()
        })
    }

    fn expect_object<'v>(&self, payload: &'v Value) -> TesseraResult<&'v Map<String, Value>> {
        match payload {
            Value::Object(data) => Ok(data),
            other => Err(self.mismatch("object", other).into()),
        }
    }

    fn mismatch(&self, expected: &str, found: &Value) -> NormalizationError {
        NormalizationError::StructuralMismatch {
            path: format_path(&self.path),
            expected: expected.to_string(),
            found: kind_of(found).to_string(),
        }
    }
}

fn describe_owner(owner: &Value) -> Option<String> {
    (!owner.is_null()).then(|| owner.to_string())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read;
    use serde_json::json;
    use std::sync::Arc;
    use tessera_core::{ReaderNode, TesseraError};

    fn query(selections: Vec<Selection>) -> Selector {
        Selector::operation(
            Arc::new(ReaderNode::new("Query", "__Root", selections)),
            Variables::new(),
        )
    }

    fn viewer_selector() -> Selector {
        query(vec![Selection::linked(
            LinkedField::new(
                "viewer",
                vec![
                    Selection::scalar("id"),
                    Selection::scalar("name"),
                    Selection::linked(
                        LinkedField::new("friends", vec![Selection::scalar("name")])
                            .with_concrete_type("User")
                            .plural(),
                    ),
                ],
            )
            .with_concrete_type("User"),
        )])
    }

    #[test]
    fn test_normalize_then_read() {
        let selector = viewer_selector();
        let payload = json!({
            "viewer": {
                "id": "1",
                "name": "Ann",
                "friends": [{ "name": "Bea" }, null]
            }
        });
        let mut source = RecordSource::new();

        let output = normalize_into(&mut source, &selector, &payload, &NormalizeOptions::default())
            .unwrap();

        assert!(output.dirty.contains(&DataId::new("1")));
        assert!(output.dirty.contains(&DataId::new("client:1:friends:0")));
        let snapshot = read(&source, &selector);
        assert_eq!(snapshot.data, Some(payload));
        assert!(!snapshot.is_missing_data);
    }

    #[test]
    fn test_second_pass_is_clean() {
        let selector = viewer_selector();
        let payload = json!({ "viewer": { "id": "1", "name": "Ann", "friends": [] } });
        let mut source = RecordSource::new();
        let options = NormalizeOptions::default();

        normalize_into(&mut source, &selector, &payload, &options).unwrap();
        let second = normalize_into(&mut source, &selector, &payload, &options).unwrap();

        assert!(second.dirty.is_empty());
    }

    #[test]
    fn test_link_change_keeps_old_target() {
        let selector = viewer_selector();
        let mut source = RecordSource::new();
        let options = NormalizeOptions::default();

        let first = json!({ "viewer": { "id": "1", "name": "Ann" } });
        normalize_into(&mut source, &selector, &first, &options).unwrap();
        let output = normalize_into(
            &mut source,
            &selector,
            &json!({ "viewer": { "id": "2", "name": "Bea" } }),
            &options,
        )
        .unwrap();

        assert!(output.dirty.contains(&DataId::root()));
        assert!(source.get(&DataId::new("1")).is_present());
    }

    #[test]
    fn test_integer_id_accepted_and_bool_rejected() {
        let selector = viewer_selector();
        let mut source = RecordSource::new();
        let options = NormalizeOptions::default();

        let numeric = json!({ "viewer": { "id": 7, "name": "Ann" } });
        normalize_into(&mut source, &selector, &numeric, &options).unwrap();
        assert!(source.get(&DataId::new("7")).is_present());

        let boolean = json!({ "viewer": { "id": true } });
        let err = normalize_into(&mut source, &selector, &boolean, &options).unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Normalization(NormalizationError::InvalidIdentity { .. })
        ));
    }

    #[test]
    fn test_structural_mismatch_keeps_earlier_writes() {
        let selector = query(vec![
            Selection::scalar("greeting"),
            Selection::linked(LinkedField::new("viewer", vec![]).with_concrete_type("User")),
        ]);
        let mut source = RecordSource::new();

        let err = normalize_into(
            &mut source,
            &selector,
            &json!({ "greeting": "hi", "viewer": "not an object" }),
            &NormalizeOptions::default(),
        )
        .unwrap_err();

        match err {
            TesseraError::Normalization(NormalizationError::StructuralMismatch {
                path,
                expected,
                found,
            }) => {
                assert_eq!(path, "viewer");
                assert_eq!(expected, "object");
                assert_eq!(found, "string");
            }
            other => panic!("Expected StructuralMismatch, got: {:?}", other),
        }
        let root = source.get(&DataId::root()).into_record().unwrap();
        assert_eq!(root.get("greeting"), Some(&FieldValue::Scalar(json!("hi"))));
    }

    #[test]
    fn test_missing_typename_for_abstract_field() {
        let selector = query(vec![Selection::linked(LinkedField::new(
            "node",
            vec![Selection::scalar("id")],
        ))]);
        let mut source = RecordSource::new();

        let err = normalize_into(
            &mut source,
            &selector,
            &json!({ "node": { "id": "1" } }),
            &NormalizeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Normalization(NormalizationError::MissingTypename { .. })
        ));
    }

    #[test]
    fn test_typename_change_reports_conflict() {
        let selector = query(vec![Selection::linked(LinkedField::new(
            "node",
            vec![
                Selection::scalar("id"),
                Selection::on_type("User", vec![Selection::scalar("name")]),
                Selection::on_type("Page", vec![Selection::scalar("title")]),
            ],
        ))]);
        let mut source = RecordSource::new();
        let options = NormalizeOptions::default();

        normalize_into(
            &mut source,
            &selector,
            &json!({ "node": { "__typename": "User", "id": "1", "name": "Ann" } }),
            &options,
        )
        .unwrap();
        let output = normalize_into(
            &mut source,
            &selector,
            &json!({ "node": { "__typename": "Page", "id": "1", "title": "Home" } }),
            &options,
        )
        .unwrap();

        assert_eq!(
            output.diagnostics,
            vec![Diagnostic::IdentityConflict {
                data_id: DataId::new("1"),
                previous_typename: "User".to_string(),
                asserted_typename: "Page".to_string(),
            }]
        );
        let record = source.get(&DataId::new("1")).into_record().unwrap();
        assert_eq!(record.typename(), "Page");
    }

    fn nested(name: &str, selections: Vec<Selection>) -> Selection {
        Selection::linked(LinkedField::new(name, selections).with_concrete_type("Node"))
    }

    #[test]
    fn test_colliding_client_ids_are_reported() {
        // "4" + a gives client:4:a, whose b child is client:4:a:b. The server
        // record "4:a" + b renders the same ID.
        let selector = query(vec![
            nested(
                "first",
                vec![
                    Selection::scalar("id"),
                    nested("a", vec![nested("b", vec![Selection::scalar("x")])]),
                ],
            ),
            nested(
                "second",
                vec![Selection::scalar("id"), nested("b", vec![Selection::scalar("x")])],
            ),
        ]);
        let payload = json!({
            "first": { "id": "4", "a": { "b": { "x": 1 } } },
            "second": { "id": "4:a", "b": { "x": 2 } }
        });
        let mut source = RecordSource::new();

        let output =
            normalize_into(&mut source, &selector, &payload, &NormalizeOptions::default()).unwrap();

        assert_eq!(
            output.diagnostics,
            vec![Diagnostic::ClientIdCollision {
                data_id: DataId::new("client:4:a:b"),
                previous_owner: Some(r#"["client:4:a","b",null]"#.to_string()),
                owner: Some(r#"["4:a","b",null]"#.to_string()),
            }]
        );
        let record = source.get(&DataId::new("client:4:a:b")).into_record().unwrap();
        assert_eq!(record.get("x"), Some(&FieldValue::Scalar(json!(2))));
    }

    #[test]
    fn test_server_id_shaped_like_client_id_is_reported() {
        let selector = query(vec![
            nested("viewer", vec![Selection::scalar("id"), nested("home", vec![])]),
            nested("node", vec![Selection::scalar("id")]),
        ]);
        let payload = json!({
            "viewer": { "id": "1", "home": {} },
            "node": { "id": "client:1:home" }
        });
        let mut source = RecordSource::new();
        let options = NormalizeOptions::default();

        let output = normalize_into(&mut source, &selector, &payload, &options).unwrap();
        let second = normalize_into(&mut source, &selector, &payload, &options).unwrap();

        assert!(matches!(
            output.diagnostics.as_slice(),
            [Diagnostic::ClientIdCollision { owner: None, previous_owner: Some(_), .. }]
        ));
        assert_eq!(second.diagnostics.len(), 2);
    }

    #[test]
    fn test_repeated_client_id_keeps_owner_quietly() {
        let selector = viewer_selector();
        let payload = json!({
            "viewer": { "id": "1", "name": "Ann", "friends": [{ "name": "Bea" }] }
        });
        let mut source = RecordSource::new();
        let options = NormalizeOptions::default();

        normalize_into(&mut source, &selector, &payload, &options).unwrap();
        let second = normalize_into(&mut source, &selector, &payload, &options).unwrap();

        assert!(second.diagnostics.is_empty());
        let friend = source.get(&DataId::new("client:1:friends:0")).into_record().unwrap();
        assert_eq!(
            friend.get(OWNER_KEY),
            Some(&FieldValue::Scalar(json!(["1", "friends", 0])))
        );
    }

    #[test]
    fn test_unmatched_fragment_writes_common_fields_only() {
        let selector = query(vec![Selection::linked(LinkedField::new(
            "node",
            vec![
                Selection::scalar("id"),
                Selection::on_type("User", vec![Selection::scalar("name")]),
            ],
        ))]);
        let mut source = RecordSource::new();

        normalize_into(
            &mut source,
            &selector,
            &json!({ "node": { "__typename": "Page", "id": "p", "name": "ignored" } }),
            &NormalizeOptions::default(),
        )
        .unwrap();

        let record = source.get(&DataId::new("p")).into_record().unwrap();
        assert!(record.has_field("id"));
        assert!(!record.has_field("name"));
    }

    #[test]
    fn test_missing_fields_as_null() {
        let selector = viewer_selector();
        let mut source = RecordSource::new();
        let options = NormalizeOptions::from_config(
            &StoreConfig::new().with_missing_fields_as_null(true),
        );

        normalize_into(&mut source, &selector, &json!({ "viewer": { "id": "1" } }), &options)
            .unwrap();

        let record = source.get(&DataId::new("1")).into_record().unwrap();
        assert_eq!(record.get("name"), Some(&FieldValue::null()));
        assert_eq!(record.get("friends"), Some(&FieldValue::null()));
    }

    #[test]
    fn test_defer_and_stream_placeholders() {
        let selector = query(vec![Selection::linked(
            LinkedField::new(
                "viewer",
                vec![
                    Selection::scalar("id"),
                    Selection::defer("ViewerBio", vec![Selection::scalar("bio")]),
                    Selection::linked(
                        LinkedField::new("feed", vec![Selection::scalar("id")])
                            .with_concrete_type("Post")
                            .with_stream("Feed"),
                    ),
                ],
            )
            .with_concrete_type("User"),
        )]);
        let mut source = RecordSource::new();

        let output = normalize_into(
            &mut source,
            &selector,
            &json!({ "viewer": { "id": "1", "feed": [] } }),
            &NormalizeOptions::default(),
        )
        .unwrap();

        let keys: Vec<(&str, String)> = output
            .placeholders
            .iter()
            .map(|p| (p.label(), format_path(p.path())))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("ViewerBio", "viewer".to_string()),
                ("Feed", "viewer.feed".to_string())
            ]
        );
    }

    #[test]
    fn test_stream_item_splices_into_list() {
        let field = LinkedField::new("feed", vec![Selection::scalar("id")])
            .with_concrete_type("Post")
            .with_stream("Feed");
        let mut user = tessera_core::Record::new(DataId::new("1"), "User");
        user.set("feed", FieldValue::Links(vec![Some(DataId::new("p0"))]));
        let base = RecordSource::from_records(vec![user]);
        let mut sink = RecordSource::new();
        let mut mutator = SourceMutator::new(&base, &mut sink);
        let options = NormalizeOptions::default();

        normalize_stream_item(
            &mut mutator,
            &DataId::new("1"),
            &field,
            2,
            &Variables::new(),
            &json!({ "id": "p2" }),
            &options,
        )
        .unwrap();

        assert_eq!(
            mutator.get_links(&DataId::new("1"), "feed"),
            Some(vec![Some(DataId::new("p0")), None, Some(DataId::new("p2"))])
        );
    }
}
