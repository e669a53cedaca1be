//! Configuration types

use crate::error::{ConfigError, TesseraError, TesseraResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Run a GC pass at the end of every notify cycle.
    pub gc_enabled: bool,
    /// Released selectors kept as GC roots until this many newer releases
    /// push them out. Zero drops them immediately.
    pub gc_release_buffer_size: usize,
    /// Age after which a retained operation is reported stale by `check`.
    pub query_cache_expiration: Option<Duration>,
    /// Write `null` for fields missing from a payload instead of skipping them.
    pub treat_missing_fields_as_null: bool,
    /// Payload key carrying a server-provided identity.
    pub id_field_name: String,
    /// How far past the end of a list a streamed item may land. Larger
    /// indices are rejected instead of padding the list with nulls.
    pub max_stream_gap: usize,
}

/// Default bound on the null padding a single streamed item may create.
pub const DEFAULT_MAX_STREAM_GAP: usize = 1024;

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gc_enabled: true,
            gc_release_buffer_size: 0,
            query_cache_expiration: None,
            treat_missing_fields_as_null: false,
            id_field_name: "id".to_string(),
            max_stream_gap: DEFAULT_MAX_STREAM_GAP,
        }
    }
}

impl StoreConfig {
    /// Create a new store config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable GC after notify.
    pub fn with_gc(mut self, enabled: bool) -> Self {
        self.gc_enabled = enabled;
        self
    }

    /// Set the release buffer size.
    pub fn with_release_buffer(mut self, size: usize) -> Self {
        self.gc_release_buffer_size = size;
        self
    }

    /// Set the query cache expiration.
    pub fn with_query_cache_expiration(mut self, expiration: Duration) -> Self {
        self.query_cache_expiration = Some(expiration);
        self
    }

    /// Treat fields missing from payloads as null.
    pub fn with_missing_fields_as_null(mut self, enabled: bool) -> Self {
        self.treat_missing_fields_as_null = enabled;
        self
    }

    /// Set the payload identity key.
    pub fn with_id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field_name = name.into();
        self
    }

    /// Set how far past the end of a list a streamed item may land.
    pub fn with_max_stream_gap(mut self, gap: usize) -> Self {
        self.max_stream_gap = gap;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - id_field_name is not empty
    /// - query_cache_expiration, when set, is positive
    pub fn validate(&self) -> TesseraResult<()> {
        if self.id_field_name.trim().is_empty() {
            return Err(TesseraError::Config(ConfigError::InvalidValue {
                field: "id_field_name".to_string(),
                value: self.id_field_name.clone(),
                reason: "id_field_name must not be empty".to_string(),
            }));
        }

        if let Some(expiration) = self.query_cache_expiration {
            if expiration.is_zero() {
                return Err(TesseraError::Config(ConfigError::InvalidValue {
                    field: "query_cache_expiration".to_string(),
                    value: format!("{:?}", expiration),
                    reason: "query_cache_expiration must be positive".to_string(),
                }));
            }
        }

        Ok(())
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TESSERA_GC_ENABLED`: Run GC after notify (default: true)
    /// - `TESSERA_GC_RELEASE_BUFFER_SIZE`: Released selectors kept as roots (default: 0)
    /// - `TESSERA_QUERY_CACHE_EXPIRATION_SECS`: Staleness horizon for `check` (default: unset)
    /// - `TESSERA_TREAT_MISSING_FIELDS_AS_NULL`: Normalize absent fields as null (default: false)
    /// - `TESSERA_ID_FIELD_NAME`: Payload identity key (default: "id")
    /// - `TESSERA_MAX_STREAM_GAP`: Null padding allowed per streamed item (default: 1024)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            gc_enabled: std::env::var("TESSERA_GC_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.gc_enabled),
            gc_release_buffer_size: std::env::var("TESSERA_GC_RELEASE_BUFFER_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.gc_release_buffer_size),
            query_cache_expiration: std::env::var("TESSERA_QUERY_CACHE_EXPIRATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .or(defaults.query_cache_expiration),
            treat_missing_fields_as_null: std::env::var("TESSERA_TREAT_MISSING_FIELDS_AS_NULL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.treat_missing_fields_as_null),
            id_field_name: std::env::var("TESSERA_ID_FIELD_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.id_field_name),
            max_stream_gap: std::env::var("TESSERA_MAX_STREAM_GAP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_stream_gap),
        }
    }
}
