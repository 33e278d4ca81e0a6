//! Partition-aware incremental overwrite engine.
//!
//! Given a full recomputation of a derived table, the engine replaces only
//! the physical storage units (explicit partitions, or predicate regions of a
//! clustered store) whose keys are present in the newly computed data; every
//! other stored unit stays byte-for-byte untouched. Commits are atomic
//! (copy-on-write build, then a single pointer swap), idempotent under
//! repeated runs and recorded in an append-only commit log.

pub mod batch;
pub mod commit;
pub mod config;
pub mod error;
pub mod io;
pub mod log;
pub mod partition;
pub mod plan;
pub mod row;
pub mod runtime;
pub mod table;

pub use batch::{BatchAggregator, PartitionBatch};
pub use commit::{Committer, Failpoint};
pub use error::{EngineError, Result};
pub use log::{CommitLog, CommitRecord};
pub use partition::{KeyValue, LayoutKind, PartitionKey, PartitionModel, PhysicalUnit};
pub use plan::{OverwritePlan, Planner, ReplaceMode};
pub use table::{ColumnKind, ColumnSpec, TargetTable};
