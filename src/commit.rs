use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use crate::error::{EngineError, Result};
use crate::io;
use crate::log::{now_ms, CommitLog, CommitRecord};
use crate::partition::{LayoutKind, PartitionKey};
use crate::plan::{OverwritePlan, ReplaceMode};
use crate::row::{rows_to_batch, Row};
use crate::table::{TargetTable, VersionMap, SEGMENT_POINTER};

/// Commit phases. `Swapping` is the only phase in which partial visibility
/// could occur, and it is a single atomic rename of the pointer file; any
/// failure in `Building` leaves zero external side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    Building,
    Swapping,
}

/// Test hook: force a failure at a chosen point of the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failpoint {
    /// Fail after replacement content is fully built, before the swap.
    AfterBuilding,
}

/// Content staged during Building: fully built version files plus the pointer
/// map that would make them visible. Nothing is visible until the swap.
struct Staged {
    /// None when every plan entry is a no-op (nothing to swap).
    new_versions: Option<VersionMap>,
    built: Vec<PathBuf>,
    superseded: Vec<PathBuf>,
}

impl Staged {
    fn discard(&self) {
        for path in &self.built {
            let _ = fs::remove_file(path);
        }
    }
}

/// Applies an overwrite plan with all-or-nothing visibility: build every
/// replacement unit copy-on-write, then swap the unit->version pointer file
/// in one atomic rename. Readers observe the fully-pre-commit or the
/// fully-post-commit state, never a unit mid-replacement.
pub struct Committer<'a> {
    table: &'a TargetTable,
    log: &'a CommitLog,
    failpoint: Option<Failpoint>,
}

impl<'a> Committer<'a> {
    pub fn new(table: &'a TargetTable, log: &'a CommitLog) -> Self {
        Self {
            table,
            log,
            failpoint: None,
        }
    }

    pub fn with_failpoint(mut self, failpoint: Failpoint) -> Self {
        self.failpoint = Some(failpoint);
        self
    }

    /// Apply the plan. On any failure before the swap the target table is
    /// byte-identical to its pre-commit state and the same plan may be
    /// retried. The commit log is appended after the swap; a crash in the
    /// gap is repaired by `CommitLog::reconcile`.
    pub fn commit(&self, plan: &OverwritePlan) -> Result<Vec<CommitRecord>> {
        let _lock = self.table.acquire_commit_lock()?;
        let sequence = self.log.next_sequence()?;

        let staged = match self.build(plan) {
            Ok(staged) => staged,
            Err(e) => return Err(self.abort(plan, CommitPhase::Building, e)),
        };

        if self.failpoint == Some(Failpoint::AfterBuilding) {
            staged.discard();
            return Err(EngineError::CommitAborted {
                reason: "injected failure after building".to_string(),
                units: plan.unit_ids(),
            });
        }

        if let Some(map) = &staged.new_versions {
            if let Err(e) = self.table.swap_versions(map) {
                staged.discard();
                return Err(self.abort(plan, CommitPhase::Swapping, e));
            }
            // Visible now; superseded versions are garbage. Removal failures
            // are swept up by the next reconcile pass.
            for path in &staged.superseded {
                let _ = fs::remove_file(path);
            }
        }

        let committed_at_ms = now_ms();
        let records: Vec<CommitRecord> = plan
            .entries
            .iter()
            .map(|entry| CommitRecord {
                unit_id: entry.unit.id().to_string(),
                key: entry.batch.key.render(&self.table.model().key_columns),
                row_count: entry.batch.row_count(),
                checksum: entry.batch.checksum,
                committed_at_ms,
                sequence,
                rewritten: entry.mode == ReplaceMode::Rewrite,
            })
            .collect();
        self.log.append(&records)?;
        Ok(records)
    }

    fn abort(&self, plan: &OverwritePlan, phase: CommitPhase, cause: EngineError) -> EngineError {
        EngineError::CommitAborted {
            reason: format!("failure during {phase:?}: {cause}"),
            units: plan.unit_ids(),
        }
    }

    fn build(&self, plan: &OverwritePlan) -> Result<Staged> {
        match self.table.model().layout_kind() {
            LayoutKind::Explicit => self.build_explicit(plan),
            LayoutKind::Predicate => self.build_predicate(plan),
        }
    }

    /// Versioned-pointer strategy: one fresh parquet file per rewritten unit
    /// under the next version number. Unit builds are independent and run in
    /// parallel; this phase dominates commit cost and is entirely off the
    /// readers' critical path.
    fn build_explicit(&self, plan: &OverwritePlan) -> Result<Staged> {
        let current = self.table.versions()?;
        let schema = self.table.schema();

        let outcomes: Vec<Result<(String, u64, PathBuf)>> = plan
            .entries
            .par_iter()
            .filter(|entry| entry.mode == ReplaceMode::Rewrite)
            .map(|entry| {
                let unit_id = entry.unit.id().to_string();
                let version = current.versions.get(&unit_id).copied().unwrap_or(0) + 1;
                let path = self.table.unit_path(&unit_id, version);
                let batch = rows_to_batch(&entry.batch.rows, schema)?;
                io::write_parquet(vec![batch], &path)?;
                Ok((unit_id, version, path))
            })
            .collect();

        let mut built = Vec::new();
        let mut rewrites = Vec::new();
        let mut first_err = None;
        for outcome in outcomes {
            match outcome {
                Ok((unit_id, version, path)) => {
                    built.push(path.clone());
                    rewrites.push((unit_id, version, path));
                }
                Err(e) => first_err = first_err.or(Some(e)),
            }
        }
        if let Some(e) = first_err {
            for path in &built {
                let _ = fs::remove_file(path);
            }
            return Err(e);
        }

        if rewrites.is_empty() {
            return Ok(Staged {
                new_versions: None,
                built,
                superseded: Vec::new(),
            });
        }

        let mut map = current.clone();
        let mut superseded = Vec::new();
        for (unit_id, version, _) in &rewrites {
            if let Some(old) = map.versions.insert(unit_id.clone(), *version) {
                superseded.push(self.table.unit_path(unit_id, old));
            }
        }

        Ok(Staged {
            new_versions: Some(map),
            built,
            superseded,
        })
    }

    /// Predicate-replace strategy: within one staged segment rewrite, drop
    /// every stored row matching a rewritten entry's key predicate and append
    /// that entry's batch rows. The swap of the segment pointer is the
    /// transaction commit; rows of keys outside the plan are carried over
    /// untouched.
    fn build_predicate(&self, plan: &OverwritePlan) -> Result<Staged> {
        if plan.rewrite_count() == 0 {
            return Ok(Staged {
                new_versions: None,
                built: Vec::new(),
                superseded: Vec::new(),
            });
        }

        let key_columns = &self.table.model().key_columns;
        let rewrite_keys: HashSet<&PartitionKey> = plan
            .entries
            .iter()
            .filter(|e| e.mode == ReplaceMode::Rewrite)
            .map(|e| &e.batch.key)
            .collect();

        let mut rows: Vec<Row> = Vec::new();
        for (idx, row) in self.table.read_segment_rows()?.into_iter().enumerate() {
            let key = PartitionKey::extract(&row, idx, key_columns)?;
            if !rewrite_keys.contains(&key) {
                rows.push(row);
            }
        }
        for entry in &plan.entries {
            if entry.mode == ReplaceMode::Rewrite {
                rows.extend(entry.batch.rows.iter().cloned());
            }
        }

        let current = self.table.versions()?;
        let version = current
            .versions
            .get(SEGMENT_POINTER)
            .copied()
            .unwrap_or(0)
            + 1;
        let path = self.table.segment_path(version);
        let batch = rows_to_batch(&rows, self.table.schema())?;
        io::write_parquet(vec![batch], &path)?;

        let mut map = current;
        let superseded = map
            .versions
            .insert(SEGMENT_POINTER.to_string(), version)
            .map(|old| self.table.segment_path(old))
            .into_iter()
            .collect();

        Ok(Staged {
            new_versions: Some(map),
            built: vec![path],
            superseded,
        })
    }
}
