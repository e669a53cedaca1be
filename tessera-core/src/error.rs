//! Error and diagnostic types for Tessera operations

use crate::identity::{DataId, OptimisticToken};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Payload shape errors. Fatal for one normalize call only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Structural mismatch at {path}: expected {expected}, found {found}")]
    StructuralMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Missing __typename at {path} and no concrete type in the selection")]
    MissingTypename { path: String },

    #[error("Invalid identity at {path}: {reason}")]
    InvalidIdentity { path: String, reason: String },
}

/// Programmer errors in the calling layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("Optimistic token {token} was never applied")]
    UnknownOptimisticToken { token: OptimisticToken },

    #[error("Optimistic token {token} is already applied")]
    DuplicateOptimisticToken { token: OptimisticToken },

    #[error("Retain handle {handle_id} does not belong to this store or was already released")]
    UnknownRetainHandle { handle_id: u64 },

    #[error("Subscription {subscription_id} does not belong to this store or was already disposed")]
    UnknownSubscription { subscription_id: u64 },

    #[error("GC hold {hold_id} does not belong to this store or was already released")]
    UnknownGcHold { hold_id: u64 },

    #[error("Record {data_id} does not exist")]
    MissingRecord { data_id: DataId },

    #[error("Record {data_id} already exists")]
    RecordAlreadyExists { data_id: DataId },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Tessera errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TesseraError {
    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("Invariant violation: {0}")]
    Invariant(#[from] InvariantError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Tessera operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// Developer-facing report about suspicious but recoverable input.
///
/// Diagnostics never abort an operation; the store keeps them until the host
/// drains them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// A payload asserted a typename different from the recorded one. The
    /// asserted typename wins.
    IdentityConflict {
        data_id: DataId,
        previous_typename: String,
        asserted_typename: String,
    },
    /// Two different parent fields synthesized the same client ID, or a
    /// server identity named a synthesized record. Owners are rendered
    /// `[parent, storage_key, index]` triples; `None` is a server identity.
    /// The later write wins.
    ClientIdCollision {
        data_id: DataId,
        previous_owner: Option<String>,
        owner: Option<String>,
    },
    /// An incremental chunk was dropped because its placeholder could never
    /// be resolved.
    UnmatchedIncremental { label: String, path: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentityConflict {
                data_id,
                previous_typename,
                asserted_typename,
            } => write!(
                f,
                "Identity conflict on {data_id}: recorded as {previous_typename}, payload asserts {asserted_typename}"
            ),
            Self::ClientIdCollision {
                data_id,
                previous_owner,
                owner,
            } => {
                let describe = |owner: &Option<String>| {
                    owner.clone().unwrap_or_else(|| "server identity".to_string())
                };
                write!(
                    f,
                    "Client ID collision on {data_id}: owned by {}, claimed by {}",
                    describe(previous_owner),
                    describe(owner)
                )
            }
            Self::UnmatchedIncremental { label, path } => {
                write!(f, "Unmatched incremental payload {label} at {path}")
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
