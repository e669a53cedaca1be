//! Tessera Core - Graph Cache Types
//!
//! Pure data structures for the normalized graph cache: identities, records,
//! record sources, selection trees, snapshots and payload chunks. Behaviour
//! (reading, normalizing, collecting) lives in `tessera-store`.

use chrono::{DateTime, Utc};

pub mod config;
pub mod error;
pub mod identity;
pub mod mutator;
pub mod payload;
pub mod record;
pub mod selection;
pub mod snapshot;
pub mod source;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use config::{StoreConfig, DEFAULT_MAX_STREAM_GAP};
pub use error::{
    ConfigError, Diagnostic, InvariantError, NormalizationError, TesseraError, TesseraResult,
};
pub use identity::{
    DataId, OptimisticToken, CLIENT_ID_PREFIX, ID_KEY, OWNER_KEY, ROOT_ID, ROOT_TYPE, TYPENAME_KEY,
};
pub use mutator::SourceMutator;
pub use payload::{format_path, PathSegment, PayloadChunk, PayloadKind};
pub use record::{FieldValue, Record, RecordState};
pub use selection::{
    Argument, ArgumentValue, Condition, Defer, InlineFragment, LinkedField, ReaderNode,
    ScalarField, Selection, Selector, SelectorKey, StreamDirective, Variables,
};
pub use snapshot::{Availability, Snapshot};
pub use source::{layer_state, RecordSource, RecordSourceView};
