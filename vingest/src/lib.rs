// VecIngest — lib.rs
// Public API, error types, pipeline configuration, re-exports.
// Author: d65v <https://github.com/d65v>

pub mod batch;
pub mod embedding;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod sink;
pub mod source;
pub mod transform;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub use crate::batch::{BatchIngestor, BatchOptions, IngestResult};
pub use crate::pipeline::{shared_ingestor, IngestionPipeline, Summary};
pub use crate::record::{FieldValue, RawRow, Record};
pub use crate::schema::{CollectionSchema, FieldKind, FieldSpec, SchemaRegistry};
pub use crate::sink::{CollectionSink, FileSink, MemorySink};
pub use crate::source::CsvRowSource;
pub use crate::transform::{RecordTransformer, TransformRules};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Fatal errors: setup problems, unreadable input, and failed submissions.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid schema '{schema}': {reason}")]
    InvalidSchema { schema: String, reason: String },

    #[error("Schema already registered: {name}")]
    DuplicateSchema { name: String },

    #[error("Unknown schema: {name}")]
    UnknownSchema { name: String },

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The records that never reached the sink travel with the error.
    #[error("Sink error on '{collection}' ({} record(s) pending): {source}", .pending.len())]
    Sink {
        collection: String,
        source: SinkError,
        pending: Vec<Record>,
    },

    /// The run stopped on `cause`, then flushing its buffered records failed.
    #[error(
        "{cause}; flushing '{collection}' afterwards also failed ({} record(s) pending): {source}",
        .pending.len()
    )]
    Unflushed {
        cause: Box<IngestError>,
        collection: String,
        source: SinkError,
        pending: Vec<Record>,
    },
}

impl IngestError {
    /// Records that were not delivered, if this error carries any.
    pub fn pending(&self) -> &[Record] {
        match self {
            IngestError::Sink { pending, .. } | IngestError::Unflushed { pending, .. } => pending,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised by a [`CollectionSink`] or while submitting to one.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Insert into '{collection}' timed out after {after:?}")]
    Timeout { collection: String, after: Duration },

    #[error("Collection '{collection}' has a stalled insert still in flight")]
    Stalled { collection: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("Schema encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a single row was skipped. Never aborts a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("line {line}: expected {expected} cells, got {got}")]
    ShortRow { line: u64, expected: usize, got: usize },

    #[error("line {line}: expected {expected} cells, got {got}")]
    WideRow { line: u64, expected: usize, got: usize },

    #[error("line {line}: field '{field}' has {len} chars, max {max}")]
    FieldTooLong {
        line: u64,
        field: String,
        len: usize,
        max: usize,
    },

    #[error("line {line}: field '{field}' is not a valid vector: {reason}")]
    MalformedVector {
        line: u64,
        field: String,
        reason: String,
    },

    #[error("line {line}: field '{field}' is not a valid int64")]
    InvalidInteger { line: u64, field: String },
}

impl Rejection {
    pub fn kind(&self) -> RejectKind {
        match self {
            Rejection::ShortRow { .. } => RejectKind::ShortRow,
            Rejection::WideRow { .. } => RejectKind::WideRow,
            Rejection::FieldTooLong { .. } => RejectKind::FieldTooLong,
            Rejection::MalformedVector { .. } => RejectKind::MalformedVector,
            Rejection::InvalidInteger { .. } => RejectKind::InvalidInteger,
        }
    }

    pub fn line(&self) -> u64 {
        match self {
            Rejection::ShortRow { line, .. }
            | Rejection::WideRow { line, .. }
            | Rejection::FieldTooLong { line, .. }
            | Rejection::MalformedVector { line, .. }
            | Rejection::InvalidInteger { line, .. } => *line,
        }
    }
}

/// Reason code used to tally rejections in a [`Summary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    ShortRow,
    WideRow,
    FieldTooLong,
    MalformedVector,
    InvalidInteger,
}

impl RejectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectKind::ShortRow => "short_row",
            RejectKind::WideRow => "wide_row",
            RejectKind::FieldTooLong => "field_too_long",
            RejectKind::MalformedVector => "malformed_vector",
            RejectKind::InvalidInteger => "invalid_integer",
        }
    }
}

impl std::fmt::Display for RejectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Config ────────────────────────────────────────────────────────────────────

pub const DEFAULT_LIMIT: usize = 20_000;
pub const DEFAULT_MAX_FIELD_LENGTH: usize = 10_000;

/// Settings for one ingestion run (one CSV file into one collection).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// CSV file to load
    pub csv_path: PathBuf,
    /// Registered schema (and target collection) name
    pub schema_name: String,
    /// Stop once more than this many rows were accepted
    pub limit: Option<usize>,
    /// Field positions eligible for int64 coercion; `None` = every Int64 field
    pub numeric_positions: Option<Vec<usize>>,
    /// Upper bound on any non-numeric cell, in characters
    pub max_field_length: usize,
    /// Records per sink insert
    pub batch_size: usize,
    /// Optional byte-estimate bound per batch
    pub max_batch_bytes: Option<usize>,
    /// Discard the leading row-index column of every row
    pub drop_index_column: bool,
    /// Upper bound on a single sink insert
    pub submit_timeout: Option<Duration>,
    /// Transform threads; 1 keeps the strictly sequential path
    pub workers: usize,
    /// Drop and create the collection before loading
    pub recreate_collection: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("data/input.csv"),
            schema_name: String::new(),
            limit: Some(DEFAULT_LIMIT),
            numeric_positions: None,
            max_field_length: DEFAULT_MAX_FIELD_LENGTH,
            batch_size: 1,
            max_batch_bytes: None,
            drop_index_column: true,
            submit_timeout: None,
            workers: 1,
            recreate_collection: true,
        }
    }
}

impl PipelineConfig {
    /// Job loading `data/movie_feature_calculated.csv`.
    pub fn movie_features() -> Self {
        Self {
            csv_path: PathBuf::from("data/movie_feature_calculated.csv"),
            schema_name: schema::MOVIE_FEATURE_COLLECTION.to_string(),
            numeric_positions: Some(schema::MOVIE_NUMERIC_POSITIONS.to_vec()),
            ..Self::default()
        }
    }

    /// Job loading `data/user_feature_calculated.csv`.
    pub fn user_features() -> Self {
        Self {
            csv_path: PathBuf::from("data/user_feature_calculated.csv"),
            schema_name: schema::USER_FEATURE_COLLECTION.to_string(),
            numeric_positions: Some(schema::USER_NUMERIC_POSITIONS.to_vec()),
            ..Self::default()
        }
    }

    /// Override `defaults` from environment variables.
    ///
    /// `VECINGEST_<JOB>_<KEY>` wins over `VECINGEST_<KEY>`. Unparsable values
    /// are logged and ignored. `VECINGEST_LIMIT=none` removes the cap.
    pub fn from_env(job: &str, defaults: Self) -> Self {
        let job = job.to_ascii_uppercase();
        let lookup = |key: &str| -> Option<String> {
            std::env::var(format!("VECINGEST_{}_{}", job, key))
                .or_else(|_| std::env::var(format!("VECINGEST_{}", key)))
                .ok()
        };
        let parsed = |key: &str| -> Option<usize> { parse_env(key, lookup(key)) };

        let mut cfg = defaults;

        if let Some(path) = lookup("CSV") {
            cfg.csv_path = PathBuf::from(path);
        }
        match lookup("LIMIT").as_deref() {
            Some("none") | Some("") => cfg.limit = None,
            Some(_) => {
                if let Some(limit) = parsed("LIMIT") {
                    cfg.limit = Some(limit);
                }
            }
            None => {}
        }
        if let Some(v) = parsed("BATCH_SIZE") {
            cfg.batch_size = v;
        }
        if let Some(v) = parsed("MAX_BATCH_BYTES") {
            cfg.max_batch_bytes = Some(v);
        }
        if let Some(v) = parsed("MAX_FIELD_LENGTH") {
            cfg.max_field_length = v;
        }
        if let Some(v) = parsed("WORKERS") {
            cfg.workers = v;
        }
        if let Some(ms) = parsed("TIMEOUT_MS") {
            cfg.submit_timeout = Some(Duration::from_millis(ms as u64));
        }

        cfg
    }

    /// Check the settings against the schema they will run with.
    pub fn validate(&self, schema: &CollectionSchema) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IngestError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.workers == 0 {
            return Err(IngestError::InvalidConfig("workers must be > 0".into()));
        }
        if self.max_field_length == 0 {
            return Err(IngestError::InvalidConfig(
                "max_field_length must be > 0".into(),
            ));
        }
        if self.max_batch_bytes == Some(0) {
            return Err(IngestError::InvalidConfig(
                "max_batch_bytes must be > 0".into(),
            ));
        }
        if self.submit_timeout == Some(Duration::ZERO) {
            return Err(IngestError::InvalidConfig(
                "submit_timeout must be > 0".into(),
            ));
        }
        if schema.name != self.schema_name {
            return Err(IngestError::InvalidConfig(format!(
                "config names schema '{}' but got '{}'",
                self.schema_name, schema.name
            )));
        }
        self.rules().numeric_mask(schema).map(|_| ())
    }

    pub fn rules(&self) -> TransformRules {
        TransformRules {
            numeric_positions: self.numeric_positions.clone(),
            max_field_length: self.max_field_length,
            drop_index_column: self.drop_index_column,
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            batch_size: self.batch_size,
            max_batch_bytes: self.max_batch_bytes,
            submit_timeout: self.submit_timeout,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring VECINGEST_{}={:?}: not a valid number", key, raw);
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_matches_loader_constants() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.limit, Some(20_000));
        assert_eq!(cfg.max_field_length, 10_000);
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.workers, 1);
        assert!(cfg.drop_index_column);
        assert!(cfg.submit_timeout.is_none());
    }

    #[test]
    fn test_builtin_jobs_validate() {
        let registry = SchemaRegistry::with_builtin().unwrap();
        for cfg in [PipelineConfig::movie_features(), PipelineConfig::user_features()] {
            let schema = registry.get(&cfg.schema_name).unwrap();
            cfg.validate(schema).unwrap();
        }
    }

    #[test]
    fn test_config_rejects_zero_batch() {
        let registry = SchemaRegistry::with_builtin().unwrap();
        let cfg = PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::user_features()
        };
        let err = cfg.validate(registry.get(&cfg.schema_name).unwrap()).unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));

        let cfg = PipelineConfig {
            submit_timeout: Some(Duration::ZERO),
            ..PipelineConfig::user_features()
        };
        let err = cfg.validate(registry.get(&cfg.schema_name).unwrap()).unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(ref m) if m.contains("submit_timeout")));

        let cfg = PipelineConfig {
            submit_timeout: Some(Duration::from_millis(1)),
            ..PipelineConfig::user_features()
        };
        assert!(cfg.validate(registry.get(&cfg.schema_name).unwrap()).is_ok());
    }

    #[test]
    fn test_config_from_env_job_overrides() {
        // Job name is unique to this test so parallel tests never see it.
        std::env::set_var("VECINGEST_ENVTEST_CSV", "/tmp/envtest.csv");
        std::env::set_var("VECINGEST_ENVTEST_BATCH_SIZE", "64");
        std::env::set_var("VECINGEST_ENVTEST_TIMEOUT_MS", "1500");
        std::env::set_var("VECINGEST_ENVTEST_WORKERS", "not-a-number");
        std::env::set_var("VECINGEST_ENVTEST_LIMIT", "none");

        let cfg = PipelineConfig::from_env("envtest", PipelineConfig::user_features());
        assert_eq!(cfg.csv_path, PathBuf::from("/tmp/envtest.csv"));
        assert_eq!(cfg.batch_size, 64);
        assert_eq!(cfg.submit_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.limit, None);
    }

    #[test]
    fn test_rejection_kind_and_line() {
        let r = Rejection::FieldTooLong {
            line: 7,
            field: "name".into(),
            len: 12,
            max: 5,
        };
        assert_eq!(r.kind(), RejectKind::FieldTooLong);
        assert_eq!(r.line(), 7);
        assert_eq!(r.kind().to_string(), "field_too_long");
    }
}
