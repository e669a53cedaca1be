//! Tessera Test Utilities
//!
//! Shared test infrastructure for the Tessera workspace:
//! - Proptest generators for identities, scalars and whole operations
//! - Fixtures for the user/friends graph used across test suites
//! - Custom assertions for snapshots, record states and error variants

// Re-export core types for convenience
pub use tessera_core::{
    Availability, ConfigError, DataId, Diagnostic, FieldValue, InvariantError, LinkedField,
    NormalizationError, OptimisticToken, PathSegment, PayloadChunk, ReaderNode, Record,
    RecordSource, RecordSourceView, RecordState, Selection, Selector, Snapshot, StoreConfig,
    TesseraError, TesseraResult, Variables,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating test data.

    use super::*;
    use proptest::collection::{btree_map, vec};
    use proptest::prelude::*;
    use proptest::strategy::Union;
    use serde_json::{Map, Value};
    use tessera_core::{Argument, ScalarField, TYPENAME_KEY};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Payload key that generated operations use for server identity.
    pub const ID_FIELD: &str = "id";

    /// Generate a server data ID.
    pub fn arb_data_id() -> impl Strategy<Value = DataId> {
        "[a-z0-9]{1,12}".prop_map(DataId::new)
    }

    /// Generate an optimistic token from arbitrary UUID bytes.
    pub fn arb_optimistic_token() -> impl Strategy<Value = OptimisticToken> {
        any::<[u8; 16]>().prop_map(|bytes| OptimisticToken::from_uuid(Uuid::from_bytes(bytes)))
    }

    /// Generate a JSON scalar (never an object or array).
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z ]{0,16}".prop_map(Value::String),
        ]
    }

    /// Generate a field name. Never collides with `id` or the reserved keys.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "f[a-z]{1,4}"
    }

    /// Generate a response key for a type-specific field. The `g` prefix
    /// keeps these apart from the common fields next to them.
    pub fn arb_variant_field_name() -> impl Strategy<Value = String> {
        "g[a-z]{1,4}"
    }

    /// Shape of one field in a generated operation.
    #[derive(Debug, Clone)]
    pub struct FieldSchema {
        pub kind: FieldKind,
        /// Selected under an alias: the schema field is `{key}_src` and the
        /// response key is the map key.
        pub aliased: bool,
        pub argument: Option<ArgumentSchema>,
        pub condition: Option<ConditionSchema>,
    }

    #[derive(Debug, Clone)]
    pub enum FieldKind {
        Scalar,
        Linked {
            plural: bool,
            /// Objects under this field carry a unique server `id`.
            identified: bool,
            shape: LinkedShape,
        },
    }

    #[derive(Debug, Clone)]
    pub enum LinkedShape {
        /// The field's type is known up front.
        Concrete(ObjectSchema),
        /// The payload names one of the variants in `__typename`; each
        /// variant's fields sit behind an inline fragment on its type.
        Abstract {
            common: ObjectSchema,
            variants: Vec<ObjectSchema>,
        },
    }

    /// One integer argument `n`, inline or bound through a variable.
    #[derive(Debug, Clone, Copy)]
    pub struct ArgumentSchema {
        pub value: i64,
        pub via_variable: bool,
    }

    /// An include or skip condition and whether its variable lets the
    /// field through.
    #[derive(Debug, Clone, Copy)]
    pub struct ConditionSchema {
        pub skip: bool,
        pub passes: bool,
    }

    impl FieldSchema {
        /// Whether the field survives condition pruning.
        pub fn is_selected(&self) -> bool {
            self.condition.map_or(true, |condition| condition.passes)
        }
    }

    pub type ObjectSchema = BTreeMap<String, FieldSchema>;

    fn arb_argument() -> impl Strategy<Value = ArgumentSchema> {
        (-5i64..100, any::<bool>())
            .prop_map(|(value, via_variable)| ArgumentSchema { value, via_variable })
    }

    fn arb_condition() -> impl Strategy<Value = ConditionSchema> {
        (any::<bool>(), any::<bool>()).prop_map(|(skip, passes)| ConditionSchema { skip, passes })
    }

    fn arb_decorations(
    ) -> impl Strategy<Value = (bool, Option<ArgumentSchema>, Option<ConditionSchema>)> {
        (
            proptest::bool::weighted(0.3),
            proptest::option::weighted(0.3, arb_argument()),
            proptest::option::weighted(0.3, arb_condition()),
        )
    }

    /// Generate a field shape up to three levels deep.
    pub fn arb_field_schema() -> impl Strategy<Value = FieldSchema> {
        let scalar = arb_decorations().prop_map(|(aliased, argument, condition)| FieldSchema {
            kind: FieldKind::Scalar,
            aliased,
            argument,
            condition,
        });
        scalar.prop_recursive(3, 24, 4, |inner| {
            let shape = prop_oneof![
                3 => btree_map(arb_field_name(), inner.clone(), 1..4)
                    .prop_map(LinkedShape::Concrete),
                1 => (
                    btree_map(arb_field_name(), inner.clone(), 0..3),
                    vec(btree_map(arb_variant_field_name(), inner, 0..3), 1..3),
                )
                    .prop_map(|(common, variants)| LinkedShape::Abstract { common, variants }),
            ];
            (any::<bool>(), any::<bool>(), shape, arb_decorations()).prop_map(
                |(plural, identified, shape, (aliased, argument, condition))| FieldSchema {
                    kind: FieldKind::Linked {
                        plural,
                        identified,
                        shape,
                    },
                    aliased,
                    argument,
                    condition,
                },
            )
        })
    }

    /// Generate a root operation together with a payload that fulfills it
    /// completely: every selected field is present, fields pruned by a
    /// condition are absent and every server `id` is unique within the
    /// payload.
    pub fn arb_operation() -> impl Strategy<Value = (Selector, Value)> {
        btree_map(arb_field_name(), arb_field_schema(), 1..5).prop_flat_map(|schema| {
            let selector = selector_for(&schema);
            arb_object(&schema).prop_map(move |mut payload| {
                let mut next_id = 0;
                assign_ids(&schema, &mut payload, &mut next_id);
                (selector.clone(), Value::Object(payload))
            })
        })
    }

    /// Build the root selector that reads exactly the given shape, with the
    /// variables its arguments and conditions refer to.
    pub fn selector_for(schema: &ObjectSchema) -> Selector {
        let mut variables = Variables::new();
        let selections = selections_for(schema, &mut variables);
        let node = ReaderNode::new("GeneratedQuery", "__Root", selections);
        Selector::operation(Arc::new(node), variables)
    }

    /// Selections reading exactly the given shape. Variables the selections
    /// refer to are added to `variables`.
    pub fn selections_for(schema: &ObjectSchema, variables: &mut Variables) -> Vec<Selection> {
        schema
            .iter()
            .map(|(key, field)| selection_for(key, field, variables))
            .collect()
    }

    /// Typename of the `index`th variant of an abstract field.
    pub fn variant_typename(key: &str, index: usize) -> String {
        format!("T{key}V{index}")
    }

    fn selection_for(key: &str, field: &FieldSchema, variables: &mut Variables) -> Selection {
        let name = if field.aliased {
            format!("{key}_src")
        } else {
            key.to_string()
        };
        let args = match field.argument {
            None => Vec::new(),
            Some(ArgumentSchema {
                value,
                via_variable: false,
            }) => vec![Argument::literal("n", Value::from(value))],
            Some(ArgumentSchema {
                value,
                via_variable: true,
            }) => {
                let variable = format!("v{}", variables.len());
                variables.insert(variable.clone(), Value::from(value));
                vec![Argument::variable("n", variable)]
            }
        };

        let selection = match &field.kind {
            FieldKind::Scalar => {
                let mut scalar = ScalarField::new(name).with_args(args);
                if field.aliased {
                    scalar = scalar.with_alias(key);
                }
                Selection::Scalar(scalar)
            }
            FieldKind::Linked {
                plural,
                identified,
                shape,
            } => {
                let mut selections = Vec::new();
                if *identified {
                    selections.push(Selection::scalar(ID_FIELD));
                }
                let mut linked = match shape {
                    LinkedShape::Concrete(fields) => {
                        selections.extend(selections_for(fields, variables));
                        LinkedField::new(name, selections).with_concrete_type(format!("T{key}"))
                    }
                    LinkedShape::Abstract { common, variants } => {
                        selections.push(Selection::scalar(TYPENAME_KEY));
                        selections.extend(selections_for(common, variables));
                        for (index, variant) in variants.iter().enumerate() {
                            selections.push(Selection::on_type(
                                variant_typename(key, index),
                                selections_for(variant, variables),
                            ));
                        }
                        LinkedField::new(name, selections)
                    }
                };
                linked = linked.with_args(args);
                if field.aliased {
                    linked = linked.with_alias(key);
                }
                if *plural {
                    linked = linked.plural();
                }
                Selection::linked(linked)
            }
        };

        match field.condition {
            None => selection,
            Some(ConditionSchema { skip, passes }) => {
                let variable = format!("c{}", variables.len());
                variables.insert(variable.clone(), Value::Bool(passes != skip));
                if skip {
                    Selection::skip_if(variable, vec![selection])
                } else {
                    Selection::include_if(variable, vec![selection])
                }
            }
        }
    }

    fn arb_object(schema: &ObjectSchema) -> BoxedStrategy<Map<String, Value>> {
        let entries: Vec<BoxedStrategy<Option<(String, Value)>>> = schema
            .iter()
            .map(|(key, field)| {
                if !field.is_selected() {
                    return Just(None).boxed();
                }
                let owned_key = key.clone();
                arb_field_value(key, field)
                    .prop_map(move |value| Some((owned_key.clone(), value)))
                    .boxed()
            })
            .collect();
        entries
            .prop_map(|pairs| pairs.into_iter().flatten().collect())
            .boxed()
    }

    fn arb_field_value(key: &str, field: &FieldSchema) -> BoxedStrategy<Value> {
        match &field.kind {
            FieldKind::Scalar => arb_scalar().boxed(),
            FieldKind::Linked {
                plural: false,
                shape,
                ..
            } => arb_nullable_object(key, shape),
            FieldKind::Linked {
                plural: true,
                shape,
                ..
            } => vec(arb_nullable_object(key, shape), 0..4)
                .prop_map(Value::Array)
                .boxed(),
        }
    }

    fn arb_nullable_object(key: &str, shape: &LinkedShape) -> BoxedStrategy<Value> {
        prop_oneof![
            1 => Just(Value::Null),
            4 => arb_linked_object(key, shape).prop_map(Value::Object),
        ]
        .boxed()
    }

    fn arb_linked_object(key: &str, shape: &LinkedShape) -> BoxedStrategy<Map<String, Value>> {
        match shape {
            LinkedShape::Concrete(fields) => arb_object(fields),
            LinkedShape::Abstract { common, variants } => {
                let options: Vec<BoxedStrategy<Map<String, Value>>> = variants
                    .iter()
                    .enumerate()
                    .map(|(index, variant)| {
                        let typename = variant_typename(key, index);
                        (arb_object(common), arb_object(variant))
                            .prop_map(move |(mut object, specific)| {
                                object.extend(specific);
                                object.insert(
                                    TYPENAME_KEY.to_string(),
                                    Value::String(typename.clone()),
                                );
                                object
                            })
                            .boxed()
                    })
                    .collect();
                Union::new(options).boxed()
            }
        }
    }

    fn assign_ids(schema: &ObjectSchema, object: &mut Map<String, Value>, next_id: &mut usize) {
        for (key, field) in schema {
            let FieldKind::Linked {
                identified, shape, ..
            } = &field.kind
            else {
                continue;
            };
            let children: Vec<&mut Value> = match object.get_mut(key) {
                Some(Value::Array(items)) => items.iter_mut().collect(),
                Some(value) => vec![value],
                None => Vec::new(),
            };
            for child in children {
                let Value::Object(child) = child else {
                    continue;
                };
                if *identified {
                    *next_id += 1;
                    child.insert(ID_FIELD.to_string(), Value::String(format!("node{next_id}")));
                }
                match shape {
                    LinkedShape::Concrete(fields) => assign_ids(fields, child, next_id),
                    LinkedShape::Abstract { common, variants } => {
                        assign_ids(common, child, next_id);
                        let typename = child
                            .get(TYPENAME_KEY)
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        let variant = variants
                            .iter()
                            .enumerate()
                            .find(|(index, _)| {
                                typename.as_deref() == Some(variant_typename(key, *index).as_str())
                            });
                        if let Some((_, variant)) = variant {
                            assign_ids(variant, child, next_id);
                        }
                    }
                }
            }
        }
    }

    /// Generate a small set of records unrelated to any generated operation.
    pub fn arb_garbage_records() -> impl Strategy<Value = Vec<Record>> {
        vec(("[a-z]{1,6}", arb_scalar()), 1..6).prop_map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(index, (field, value))| {
                    let mut record = Record::new(DataId::new(format!("garbage{index}")), "Garbage");
                    record.set(field, FieldValue::Scalar(value));
                    record
                })
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built selectors and payloads for a small user/friends graph.

    use super::*;
    use serde_json::{json, Value};
    use std::sync::Arc;

    /// `{ user { id name bestFriend { id name } } }` on the root.
    pub fn user_query() -> Selector {
        let node = ReaderNode::new(
            "UserQuery",
            "__Root",
            vec![Selection::linked(
                LinkedField::new(
                    "user",
                    vec![
                        Selection::scalar("id"),
                        Selection::scalar("name"),
                        Selection::linked(
                            LinkedField::new(
                                "bestFriend",
                                vec![Selection::scalar("id"), Selection::scalar("name")],
                            )
                            .with_concrete_type("User"),
                        ),
                    ],
                )
                .with_concrete_type("User"),
            )],
        );
        Selector::operation(Arc::new(node), Variables::new())
    }

    pub fn user_payload(id: &str, name: &str, best_friend: Option<(&str, &str)>) -> Value {
        let best_friend = match best_friend {
            Some((friend_id, friend_name)) => json!({ "id": friend_id, "name": friend_name }),
            None => Value::Null,
        };
        json!({
            "user": {
                "__typename": "User",
                "id": id,
                "name": name,
                "bestFriend": best_friend,
            }
        })
    }

    /// `{ id name }` on one user record.
    pub fn user_fragment(id: &str) -> Selector {
        let node = ReaderNode::new(
            "UserFragment",
            "User",
            vec![Selection::scalar("id"), Selection::scalar("name")],
        );
        Selector::new(DataId::new(id), Arc::new(node), Variables::new())
    }

    /// `{ id name friends { id name } }` on one user record.
    pub fn friends_fragment(id: &str) -> Selector {
        let node = ReaderNode::new(
            "FriendsFragment",
            "User",
            vec![
                Selection::scalar("id"),
                Selection::scalar("name"),
                Selection::linked(
                    LinkedField::new(
                        "friends",
                        vec![Selection::scalar("id"), Selection::scalar("name")],
                    )
                    .with_concrete_type("User")
                    .plural(),
                ),
            ],
        );
        Selector::new(DataId::new(id), Arc::new(node), Variables::new())
    }

    pub fn friends_payload(id: &str, name: &str, friends: &[(&str, &str)]) -> Value {
        let friends: Vec<Value> = friends
            .iter()
            .map(|(friend_id, friend_name)| json!({ "id": friend_id, "name": friend_name }))
            .collect();
        json!({ "__typename": "User", "id": id, "name": name, "friends": friends })
    }

    /// Root operation with a deferred `bio` and a streamed `feed` on `viewer`.
    pub fn feed_query() -> Selector {
        let node = ReaderNode::new(
            "FeedQuery",
            "__Root",
            vec![Selection::linked(
                LinkedField::new(
                    "viewer",
                    vec![
                        Selection::scalar("id"),
                        Selection::defer("ViewerBio", vec![Selection::scalar("bio")]),
                        Selection::linked(
                            LinkedField::new(
                                "feed",
                                vec![Selection::scalar("id"), Selection::scalar("title")],
                            )
                            .with_concrete_type("Post")
                            .with_stream("Feed"),
                        ),
                    ],
                )
                .with_concrete_type("User"),
            )],
        );
        Selector::operation(Arc::new(node), Variables::new())
    }

    /// Path of the streamed item at `index` in the feed.
    pub fn feed_item_path(index: usize) -> Vec<PathSegment> {
        vec![
            PathSegment::from("viewer"),
            PathSegment::from("feed"),
            PathSegment::Index(index),
        ]
    }

    pub fn viewer_path() -> Vec<PathSegment> {
        vec![PathSegment::from("viewer")]
    }

    /// A bare `User` record with a name.
    pub fn user_record(id: &str, name: &str) -> Record {
        let mut record = Record::new(DataId::new(id), "User");
        record.set("id", FieldValue::Scalar(json!(id)));
        record.set("name", FieldValue::Scalar(json!(name)));
        record
    }

    /// Store configuration with GC switched off.
    pub fn no_gc_config() -> StoreConfig {
        StoreConfig::new().with_gc(false)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion helpers for Tessera-specific validation.

    use super::*;
    use serde_json::Value;
    use std::fmt::Debug;

    /// Assert that a result is a NormalizationError.
    #[track_caller]
    pub fn assert_normalization_error<T: Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Normalization(_)) => {}
            other => panic!("Expected Normalization error, got: {:?}", other),
        }
    }

    /// Assert that a result is a StructuralMismatch at the given path.
    #[track_caller]
    pub fn assert_structural_mismatch<T: Debug>(result: &TesseraResult<T>, expected_path: &str) {
        match result {
            Err(TesseraError::Normalization(NormalizationError::StructuralMismatch {
                path, ..
            })) => {
                assert_eq!(path, expected_path, "StructuralMismatch path mismatch");
            }
            other => panic!("Expected StructuralMismatch error, got: {:?}", other),
        }
    }

    /// Assert that a result is an InvariantError.
    #[track_caller]
    pub fn assert_invariant_error<T: Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Invariant(_)) => {}
            other => panic!("Expected Invariant error, got: {:?}", other),
        }
    }

    /// Assert that a result is a ConfigError.
    #[track_caller]
    pub fn assert_config_error<T: Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a snapshot is complete and carries the expected data.
    #[track_caller]
    pub fn assert_snapshot_data(snapshot: &Snapshot, expected: &Value) {
        assert!(
            !snapshot.is_missing_data,
            "Snapshot for {} is missing data: {:?}",
            snapshot.selector.key(),
            snapshot.data
        );
        assert_eq!(
            snapshot.data.as_ref(),
            Some(expected),
            "Snapshot data mismatch for {}",
            snapshot.selector.key()
        );
    }

    /// Assert that a snapshot reports missing data.
    #[track_caller]
    pub fn assert_missing(snapshot: &Snapshot) {
        assert!(
            snapshot.is_missing_data,
            "Expected missing data for {}, got: {:?}",
            snapshot.selector.key(),
            snapshot.data
        );
    }

    /// Assert that a record is present in a source.
    #[track_caller]
    pub fn assert_present(source: &dyn RecordSourceView, id: &str) {
        let state = source.get(&DataId::new(id));
        assert!(state.is_present(), "Expected record {} to be present, got: {:?}", id, state);
    }

    /// Assert that a source knows nothing about a record.
    #[track_caller]
    pub fn assert_unknown(source: &dyn RecordSourceView, id: &str) {
        let state = source.get(&DataId::new(id));
        assert!(state.is_unknown(), "Expected record {} to be unknown, got: {:?}", id, state);
    }

    /// Assert that a StoreConfig is valid.
    #[track_caller]
    pub fn assert_config_valid(config: &StoreConfig) {
        match config.validate() {
            Ok(()) => {}
            Err(e) => panic!("Config validation failed: {:?}", e),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
