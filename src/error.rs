use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy of the overwrite engine.
///
/// Planning-phase errors (`KeyExtraction`, `LayoutMismatch`, `SchemaMismatch`,
/// `EmptyBatchSet`) are local and non-destructive: they prevent any write.
/// `CommitAborted` guarantees the target table is byte-identical to its
/// pre-commit state. `ConcurrentCommitInProgress` is retriable after backoff.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A row carried a null (or non-hashable, e.g. float) key component.
    /// Aborts the whole ingest; no partial batches are handed downstream.
    #[error("cannot extract partition key: column '{column}' in input row {row} is {found}")]
    KeyExtraction {
        column: String,
        row: usize,
        found: String,
    },

    /// Key arity does not match the configured key columns.
    #[error("key arity {got} does not match configured key columns {expected:?}")]
    LayoutMismatch { expected: Vec<String>, got: usize },

    /// Row shape violates the fixed table schema.
    #[error("input row {row} does not match table schema: {detail}")]
    SchemaMismatch { row: usize, detail: String },

    /// The aggregator produced no batches. Whether an empty run is an error
    /// is the caller's call; the engine only surfaces it.
    #[error("no partition batches were produced from the input")]
    EmptyBatchSet,

    /// Commit failed before the atomic swap. The target table is unchanged
    /// and the same plan may be retried safely.
    #[error("commit aborted with target table unchanged: {reason} (units: {units:?})")]
    CommitAborted { reason: String, units: Vec<String> },

    /// Another commit currently holds the single-writer lock for this table.
    #[error("another commit is in progress for table at {table}")]
    ConcurrentCommitInProgress { table: PathBuf },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
