use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::{EngineError, Result};
use crate::io;
use crate::log::CommitLog;
use crate::partition::PartitionModel;
use crate::row::{batch_to_rows, Row};

/// Pointer-map key for the shared clustered segment in Predicate layout.
pub const SEGMENT_POINTER: &str = "__segment__";

const META_FILE: &str = "table.json";
const POINTERS_FILE: &str = "pointers.json";
const LOG_FILE: &str = "commit_log.jsonl";
const LOCK_FILE: &str = ".commit.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    String,
    Int,
    Float,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn to_field(&self) -> Field {
        let data_type = match self.kind {
            ColumnKind::String => DataType::Utf8,
            ColumnKind::Int => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::Bool => DataType::Boolean,
        };
        Field::new(&self.name, data_type, self.nullable)
    }
}

/// Persisted table metadata: layout + key columns + fixed schema. Written at
/// creation, never changed afterwards (the engine assumes a fixed schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub model: PartitionModel,
    pub columns: Vec<ColumnSpec>,
}

/// Unit id -> current version number. Replaced wholesale by a single atomic
/// rename during the Swapping phase; this file IS the commit point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionMap {
    pub versions: BTreeMap<String, u64>,
}

/// Capability handle for one target table: a directory the caller resolved.
/// The engine holds no state across invocations beyond what lives under this
/// directory (the version pointers, the unit files and the commit log).
pub struct TargetTable {
    root: PathBuf,
    model: PartitionModel,
    columns: Vec<ColumnSpec>,
    schema: SchemaRef,
}

impl TargetTable {
    /// Create a new table directory with the given layout and schema.
    pub fn create(root: &Path, model: PartitionModel, columns: Vec<ColumnSpec>) -> Result<Self> {
        fs::create_dir_all(root)?;
        let meta = TableMeta {
            model: model.clone(),
            columns: columns.clone(),
        };
        fs::write(root.join(META_FILE), serde_json::to_string_pretty(&meta)?)?;
        Ok(Self::from_meta(root.to_path_buf(), model, columns))
    }

    /// Open an existing table directory.
    pub fn open(root: &Path) -> Result<Self> {
        let meta: TableMeta = serde_json::from_str(&fs::read_to_string(root.join(META_FILE))?)?;
        Ok(Self::from_meta(root.to_path_buf(), meta.model, meta.columns))
    }

    pub fn open_or_create(
        root: &Path,
        model: PartitionModel,
        columns: Vec<ColumnSpec>,
    ) -> Result<Self> {
        if root.join(META_FILE).exists() {
            Self::open(root)
        } else {
            Self::create(root, model, columns)
        }
    }

    fn from_meta(root: PathBuf, model: PartitionModel, columns: Vec<ColumnSpec>) -> Self {
        let schema = Arc::new(Schema::new(
            columns.iter().map(|c| c.to_field()).collect::<Vec<_>>(),
        ));
        Self {
            root,
            model,
            columns,
            schema,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model(&self) -> &PartitionModel {
        &self.model
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn commit_log(&self) -> CommitLog {
        CommitLog::new(self.root.join(LOG_FILE))
    }

    // ---- version pointers ----

    pub fn versions(&self) -> Result<VersionMap> {
        let path = self.root.join(POINTERS_FILE);
        if !path.exists() {
            return Ok(VersionMap::default());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// The atomic swap: write the new pointer map to a temp file and rename
    /// it over the current one. Readers observe either the old map or the
    /// new map for every unit at once, never a mix.
    pub fn swap_versions(&self, map: &VersionMap) -> Result<()> {
        let tmp = self.root.join(format!("{POINTERS_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(map)?)?;
        fs::rename(&tmp, self.root.join(POINTERS_FILE))?;
        Ok(())
    }

    // ---- unit files ----

    pub fn unit_path(&self, unit_id: &str, version: u64) -> PathBuf {
        self.root.join("units").join(format!("{unit_id}.v{version}.parquet"))
    }

    pub fn segment_path(&self, version: u64) -> PathBuf {
        self.root.join("segment").join(format!("segment.v{version}.parquet"))
    }

    /// Read the current rows of one explicit unit; empty if the unit has no
    /// committed version yet.
    pub fn read_unit_rows(&self, unit_id: &str) -> Result<Vec<Row>> {
        let versions = self.versions()?;
        match versions.versions.get(unit_id) {
            None => Ok(Vec::new()),
            Some(v) => self.read_rows_at(&self.unit_path(unit_id, *v)),
        }
    }

    /// Read the current rows of the clustered segment (Predicate layout);
    /// empty before the first commit.
    pub fn read_segment_rows(&self) -> Result<Vec<Row>> {
        let versions = self.versions()?;
        match versions.versions.get(SEGMENT_POINTER) {
            None => Ok(Vec::new()),
            Some(v) => self.read_rows_at(&self.segment_path(*v)),
        }
    }

    fn read_rows_at(&self, path: &Path) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for batch in io::read_parquet(path)? {
            rows.extend(batch_to_rows(&batch)?);
        }
        Ok(rows)
    }

    /// Remove version files that no pointer references: leftovers of a
    /// commit that crashed during Building, or superseded versions whose
    /// deletion after a swap did not finish. Never touches a referenced file.
    pub fn sweep_orphans(&self) -> Result<Vec<PathBuf>> {
        let versions = self.versions()?;
        let pattern = Regex::new(r"^(.+)\.v(\d+)\.parquet$").expect("static regex");
        let mut removed = Vec::new();

        for subdir in ["units", "segment"] {
            let dir = self.root.join(subdir);
            if !dir.exists() {
                continue;
            }
            for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
                let entry = entry.map_err(|e| {
                    EngineError::Io(e.into_io_error().unwrap_or_else(|| {
                        std::io::Error::other("walkdir loop without io error")
                    }))
                })?;
                let name = entry.file_name().to_string_lossy().to_string();
                let Some(caps) = pattern.captures(&name) else {
                    continue;
                };
                let stem = &caps[1];
                let version: u64 = caps[2].parse().unwrap_or(0);
                let pointer_key = if subdir == "segment" {
                    SEGMENT_POINTER
                } else {
                    stem
                };
                let live = versions.versions.get(pointer_key) == Some(&version);
                if !live {
                    fs::remove_file(entry.path())?;
                    removed.push(entry.path().to_path_buf());
                }
            }
        }
        Ok(removed)
    }

    // ---- single-writer lock ----

    /// Acquire the per-table commit lock. At most one commit may be in the
    /// Swapping-capable section per table; a second caller is rejected
    /// (retriable after backoff). Different tables never contend.
    pub fn acquire_commit_lock(&self) -> Result<CommitLock> {
        let path = self.root.join(LOCK_FILE);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(CommitLock { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(EngineError::ConcurrentCommitInProgress {
                    table: self.root.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a commit lock left behind by a crashed process. The lock file
    /// only outlives its owner when the owner died mid-commit, so this is
    /// safe exactly once per invocation: during startup recovery, before any
    /// commit of this invocation is issued. Returns whether a lock was
    /// cleared.
    pub fn clear_stale_lock(&self) -> Result<bool> {
        let path = self.root.join(LOCK_FILE);
        if path.exists() {
            fs::remove_file(&path)?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Advisory lock held for the duration of one commit; released on drop so an
/// aborted commit never wedges the table.
pub struct CommitLock {
    path: PathBuf,
}

impl Drop for CommitLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
