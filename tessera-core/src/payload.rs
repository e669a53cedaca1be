//! Payload chunks delivered by the transport layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One step of a response path: an object key or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        Self::Key(value.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

/// Render a path as `viewer.friends[2].name`.
pub fn format_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathSegment::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
        }
    }
    if out.is_empty() {
        out.push_str("<root>");
    }
    out
}

/// How a chunk merges into what was normalized before.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PayloadKind {
    /// The initial response for the operation.
    Complete,
    /// Data for a deferred fragment, applied at `path`.
    DeferPatch { label: String },
    /// One streamed list item; the last path segment is its index.
    StreamAppend { label: String },
}

impl PayloadKind {
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Complete => None,
            Self::DeferPatch { label } | Self::StreamAppend { label } => Some(label),
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => f.write_str("complete"),
            Self::DeferPatch { label } => write!(f, "defer-patch({label})"),
            Self::StreamAppend { label } => write!(f, "stream-append({label})"),
        }
    }
}

/// One response chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadChunk {
    pub kind: PayloadKind,
    #[serde(default)]
    pub path: Vec<PathSegment>,
    pub data: Value,
}

impl PayloadChunk {
    pub fn complete(data: Value) -> Self {
        Self {
            kind: PayloadKind::Complete,
            path: Vec::new(),
            data,
        }
    }

    pub fn defer_patch(label: impl Into<String>, path: Vec<PathSegment>, data: Value) -> Self {
        Self {
            kind: PayloadKind::DeferPatch {
                label: label.into(),
            },
            path,
            data,
        }
    }

    pub fn stream_append(label: impl Into<String>, path: Vec<PathSegment>, data: Value) -> Self {
        Self {
            kind: PayloadKind::StreamAppend {
                label: label.into(),
            },
            path,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_path() {
        let path = vec![
            PathSegment::from("viewer"),
            PathSegment::from("friends"),
            PathSegment::from(2),
            PathSegment::from("name"),
        ];
        assert_eq!(format_path(&path), "viewer.friends[2].name");
        assert_eq!(format_path(&[]), "<root>");
    }

    #[test]
    fn test_chunk_deserializes_from_transport_json() {
        let chunk: PayloadChunk = serde_json::from_value(json!({
            "kind": { "kind": "stream-append", "label": "feed" },
            "path": ["viewer", "feed", 3],
            "data": { "id": "p3" }
        }))
        .unwrap();
        assert_eq!(chunk.kind.label(), Some("feed"));
        assert_eq!(chunk.path[2], PathSegment::Index(3));
    }
}
