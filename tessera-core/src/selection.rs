//! Selection trees and selectors.
//!
//! Selection trees are produced ahead of time by the query compiler and are
//! treated here as immutable, pre-validated input. They deserialize from the
//! compiler's JSON artifacts:
//!
//! ```json
//! {
//!   "name": "UserQuery",
//!   "type_name": "__Root",
//!   "selections": [
//!     { "kind": "Linked", "name": "user",
//!       "args": [{ "name": "id", "value": { "Variable": "id" } }],
//!       "selections": [{ "kind": "Scalar", "name": "name" }] }
//!   ]
//! }
//! ```

use crate::identity::DataId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Variable bindings for one selector.
pub type Variables = serde_json::Map<String, Value>;

// ============================================================================
// ARGUMENTS AND STORAGE KEYS
// ============================================================================

/// Argument value: either inline or a reference into the variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgumentValue {
    Literal(Value),
    Variable(String),
}

impl ArgumentValue {
    /// Resolve against the variables. Unbound variables resolve to `null`.
    pub fn resolve(&self, variables: &Variables) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: ArgumentValue,
}

impl Argument {
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Literal(value),
        }
    }

    pub fn variable(name: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Variable(variable.into()),
        }
    }
}

/// Compute the key a field is stored under.
///
/// Fields without (non-null) arguments are stored under their name. Otherwise
/// arguments are sorted by name and rendered as compact JSON:
/// `friends(first:10,orderBy:"name")`.
pub fn storage_key(name: &str, args: &[Argument], variables: &Variables) -> String {
    let mut resolved: Vec<(&str, Value)> = args
        .iter()
        .map(|arg| (arg.name.as_str(), arg.value.resolve(variables)))
        .filter(|(_, value)| !value.is_null())
        .collect();
    if resolved.is_empty() {
        return name.to_string();
    }
    resolved.sort_by(|a, b| a.0.cmp(b.0));
    let rendered: Vec<String> = resolved
        .iter()
        .map(|(arg, value)| format!("{arg}:{value}"))
        .collect();
    format!("{}({})", name, rendered.join(","))
}

/// Evaluate a boolean variable. Anything other than `true` is false.
pub fn flag(variables: &Variables, name: &str) -> bool {
    matches!(variables.get(name), Some(Value::Bool(true)))
}

// ============================================================================
// SELECTIONS
// ============================================================================

/// Field holding a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarField {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub args: Vec<Argument>,
}

impl ScalarField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            args: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_args(mut self, args: Vec<Argument>) -> Self {
        self.args = args;
        self
    }

    /// Key of this field in payloads and snapshots.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn storage_key(&self, variables: &Variables) -> String {
        storage_key(&self.name, &self.args, variables)
    }
}

/// `@stream` on a plural linked field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDirective {
    pub label: String,
    #[serde(default)]
    pub if_variable: Option<String>,
}

/// Field referencing one or more records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedField {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub args: Vec<Argument>,
    /// Typename of the target when the field is not abstract.
    #[serde(default)]
    pub concrete_type: Option<String>,
    #[serde(default)]
    pub plural: bool,
    #[serde(default)]
    pub stream: Option<StreamDirective>,
    pub selections: Vec<Selection>,
}

impl LinkedField {
    pub fn new(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            args: Vec::new(),
            concrete_type: None,
            plural: false,
            stream: None,
            selections,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_args(mut self, args: Vec<Argument>) -> Self {
        self.args = args;
        self
    }

    pub fn with_concrete_type(mut self, typename: impl Into<String>) -> Self {
        self.concrete_type = Some(typename.into());
        self
    }

    pub fn plural(mut self) -> Self {
        self.plural = true;
        self
    }

    /// Stream the items of this plural field under `label`.
    pub fn with_stream(mut self, label: impl Into<String>) -> Self {
        self.plural = true;
        self.stream = Some(StreamDirective {
            label: label.into(),
            if_variable: None,
        });
        self
    }

    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn storage_key(&self, variables: &Variables) -> String {
        storage_key(&self.name, &self.args, variables)
    }

    /// Stream label when streaming is enabled for these variables.
    pub fn active_stream(&self, variables: &Variables) -> Option<&str> {
        let stream = self.stream.as_ref()?;
        match &stream.if_variable {
            Some(variable) if !flag(variables, variable) => None,
            _ => Some(stream.label.as_str()),
        }
    }
}

/// `@include` / `@skip` equivalent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub variable: String,
    /// `true` for include, `false` for skip.
    pub passing_value: bool,
    pub selections: Vec<Selection>,
}

impl Condition {
    pub fn passes(&self, variables: &Variables) -> bool {
        flag(variables, &self.variable) == self.passing_value
    }
}

/// Branch applied only when the record has the given concrete typename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineFragment {
    pub type_condition: String,
    pub selections: Vec<Selection>,
}

/// Selections delivered by a later `defer-patch` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defer {
    pub label: String,
    #[serde(default)]
    pub if_variable: Option<String>,
    pub selections: Vec<Selection>,
}

impl Defer {
    /// Whether the selections are split off into a separate payload.
    pub fn is_active(&self, variables: &Variables) -> bool {
        match &self.if_variable {
            Some(variable) => flag(variables, variable),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Selection {
    Scalar(ScalarField),
    Linked(LinkedField),
    Condition(Condition),
    InlineFragment(InlineFragment),
    Defer(Defer),
}

impl Selection {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::Scalar(ScalarField::new(name))
    }

    pub fn linked(field: LinkedField) -> Self {
        Self::Linked(field)
    }

    pub fn include_if(variable: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self::Condition(Condition {
            variable: variable.into(),
            passing_value: true,
            selections,
        })
    }

    pub fn skip_if(variable: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self::Condition(Condition {
            variable: variable.into(),
            passing_value: false,
            selections,
        })
    }

    pub fn on_type(type_condition: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self::InlineFragment(InlineFragment {
            type_condition: type_condition.into(),
            selections,
        })
    }

    pub fn defer(label: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self::Defer(Defer {
            label: label.into(),
            if_variable: None,
            selections,
        })
    }
}

/// Root of a selection tree: one named operation or fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderNode {
    pub name: String,
    pub type_name: String,
    pub selections: Vec<Selection>,
}

impl ReaderNode {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        selections: Vec<Selection>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            selections,
        }
    }
}

// ============================================================================
// SELECTOR
// ============================================================================

/// What to read or write, and where: (data ID, selection tree, variables).
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    data_id: DataId,
    node: Arc<ReaderNode>,
    variables: Variables,
}

impl Selector {
    pub fn new(data_id: DataId, node: Arc<ReaderNode>, variables: Variables) -> Self {
        Self {
            data_id,
            node,
            variables,
        }
    }

    /// Selector for an operation read from the root record.
    pub fn operation(node: Arc<ReaderNode>, variables: Variables) -> Self {
        Self::new(DataId::root(), node, variables)
    }

    pub fn data_id(&self) -> &DataId {
        &self.data_id
    }

    pub fn node(&self) -> &Arc<ReaderNode> {
        &self.node
    }

    pub fn selections(&self) -> &[Selection] {
        &self.node.selections
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Identity used to deduplicate retains of equal selectors.
    pub fn key(&self) -> SelectorKey {
        SelectorKey(format!(
            "{}|{}|{}",
            self.data_id,
            self.node.name,
            Value::Object(self.variables.clone())
        ))
    }
}

/// Hashable identity of a selector: data ID, node name and variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SelectorKey(String);

impl fmt::Display for SelectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        match value {
            Value::Object(map) => map,
            _ => Variables::new(),
        }
    }

    #[test]
    fn test_storage_key_without_args_is_name() {
        assert_eq!(storage_key("name", &[], &Variables::new()), "name");
    }

    #[test]
    fn test_storage_key_sorts_args_and_resolves_variables() {
        let args = vec![
            Argument::variable("orderBy", "order"),
            Argument::literal("first", json!(10)),
        ];
        let key = storage_key("friends", &args, &vars(json!({"order": "name"})));
        assert_eq!(key, r#"friends(first:10,orderBy:"name")"#);
    }

    #[test]
    fn test_storage_key_omits_null_args() {
        let args = vec![
            Argument::variable("after", "cursor"),
            Argument::literal("first", json!(2)),
        ];
        let key = storage_key("friends", &args, &Variables::new());
        assert_eq!(key, "friends(first:2)");
    }

    #[test]
    fn test_condition_include_and_skip() {
        let variables = vars(json!({"withAge": true}));
        let include = Condition {
            variable: "withAge".to_string(),
            passing_value: true,
            selections: vec![],
        };
        let skip = Condition {
            variable: "withAge".to_string(),
            passing_value: false,
            selections: vec![],
        };
        assert!(include.passes(&variables));
        assert!(!skip.passes(&variables));
        assert!(skip.passes(&Variables::new()));
    }

    #[test]
    fn test_selector_key_distinguishes_variables() {
        let node = Arc::new(ReaderNode::new("Q", "__Root", vec![]));
        let a = Selector::operation(Arc::clone(&node), vars(json!({"id": "1"})));
        let b = Selector::operation(Arc::clone(&node), vars(json!({"id": "2"})));
        let c = Selector::operation(node, vars(json!({"id": "1"})));
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), c.key());
    }

    #[test]
    fn test_reader_node_deserializes_from_artifact() {
        let artifact = json!({
            "name": "UserQuery",
            "type_name": "__Root",
            "selections": [
                {
                    "kind": "Linked",
                    "name": "user",
                    "args": [{ "name": "id", "value": { "Variable": "id" } }],
                    "concrete_type": "User",
                    "selections": [
                        { "kind": "Scalar", "name": "id" },
                        { "kind": "Scalar", "name": "name", "alias": "displayName" }
                    ]
                }
            ]
        });
        let node: ReaderNode = serde_json::from_value(artifact).unwrap();
        let Selection::Linked(user) = &node.selections[0] else {
            panic!("expected linked field");
        };
        assert_eq!(user.concrete_type.as_deref(), Some("User"));
        assert!(!user.plural);
        assert_eq!(
            user.storage_key(&vars(json!({"id": "4"}))),
            r#"user(id:"4")"#
        );
    }
}
