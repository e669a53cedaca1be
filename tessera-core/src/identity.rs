//! Identity types for normalized records

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Data ID of the root record that operations are read from.
pub const ROOT_ID: &str = "client:root";

/// Typename of the root record.
pub const ROOT_TYPE: &str = "__Root";

/// Reserved record key holding the data ID.
pub const ID_KEY: &str = "__id";

/// Reserved record key holding the concrete typename.
pub const TYPENAME_KEY: &str = "__typename";

/// Reserved record key naming the parent field a client ID was synthesized
/// for, as `[parent, storage_key, index]`.
pub const OWNER_KEY: &str = "__owner";

/// Prefix shared by every locally synthesized data ID.
pub const CLIENT_ID_PREFIX: &str = "client:";

// ============================================================================
// DATA ID
// ============================================================================

/// Stable identity of a normalized record.
///
/// Either a server-provided identity or a client ID synthesized from the
/// parent identity and field storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataId(String);

impl DataId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The root record identity.
    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Returns true for IDs synthesized on the client.
    pub fn is_client_id(&self) -> bool {
        self.0.starts_with(CLIENT_ID_PREFIX)
    }

    /// Synthesize the ID of an object without server identity.
    ///
    /// The result is a pure function of its inputs so that normalizing the
    /// same payload twice yields the same identity.
    pub fn client_id(parent: &DataId, storage_key: &str, index: Option<usize>) -> Self {
        let mut id = if parent.is_client_id() {
            format!("{}:{}", parent.0, storage_key)
        } else {
            format!("{}{}:{}", CLIENT_ID_PREFIX, parent.0, storage_key)
        };
        if let Some(index) = index {
            id.push(':');
            id.push_str(&index.to_string());
        }
        Self(id)
    }

    /// The `[parent, storage_key, index]` triple a client ID is derived from.
    ///
    /// Different triples can render to the same ID (`"4:a"` + `b` and
    /// `"client:4:a"` + `b`); the owner tells them apart.
    pub fn client_owner(parent: &DataId, storage_key: &str, index: Option<usize>) -> Value {
        Value::Array(vec![
            Value::String(parent.0.clone()),
            Value::String(storage_key.to_string()),
            index.map_or(Value::Null, Value::from),
        ])
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DataId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DataId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DataId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DataId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// OPTIMISTIC TOKEN
// ============================================================================

/// Token tagging one optimistic layer.
///
/// Minted by the caller before `apply_optimistic` and handed back to
/// `rollback` or `commit`. UUIDv7 keeps tokens sortable by creation time in
/// logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OptimisticToken(Uuid);

impl OptimisticToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OptimisticToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OptimisticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
