use std::collections::HashMap;

use crate::batch::PartitionBatch;
use crate::error::{EngineError, Result};
use crate::log::CommitLog;
use crate::partition::{PartitionKey, PartitionModel, PhysicalUnit};

/// Replacement semantics for one plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    /// Build fresh content and swap it in.
    Rewrite,
    /// Content is already identical per the commit log; the unit stays in
    /// the plan but only its metadata (sequence, timestamp) is refreshed.
    NoOp,
}

#[derive(Debug)]
pub struct PlanEntry {
    pub unit: PhysicalUnit,
    pub batch: PartitionBatch,
    pub mode: ReplaceMode,
}

/// The minimal set of physical units to replace for one invocation, in key
/// order. All keys are distinct, and only keys present in the input batch set
/// appear — the plan never implies deletion of absent keys.
#[derive(Debug, Default)]
pub struct OverwritePlan {
    pub entries: Vec<PlanEntry>,
}

impl OverwritePlan {
    pub fn unit_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.unit.id().to_string()).collect()
    }

    pub fn rewrite_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.mode == ReplaceMode::Rewrite)
            .count()
    }
}

/// Computes an overwrite plan from the batch set, the table layout and the
/// commit log. The set of affected units is derived solely from what is
/// present in the new computation; units absent from the batch set are never
/// inspected or enumerated.
pub struct Planner<'a> {
    model: &'a PartitionModel,
    log: &'a CommitLog,
    /// When set, the idempotency/no-op shortcut is skipped: every unit in the
    /// batch set is rebuilt. The overwrite *scope* is unchanged.
    pub force_full_rebuild: bool,
}

impl<'a> Planner<'a> {
    pub fn new(model: &'a PartitionModel, log: &'a CommitLog) -> Self {
        Self {
            model,
            log,
            force_full_rebuild: false,
        }
    }

    pub fn plan(
        &self,
        batches: HashMap<PartitionKey, PartitionBatch>,
    ) -> Result<OverwritePlan> {
        if batches.is_empty() {
            return Err(EngineError::EmptyBatchSet);
        }

        let mut ordered: Vec<(PartitionKey, PartitionBatch)> = batches.into_iter().collect();
        ordered.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut entries = Vec::with_capacity(ordered.len());
        for (key, batch) in ordered {
            let unit = self.model.unit_for(&key)?;
            let mode = if self.force_full_rebuild {
                ReplaceMode::Rewrite
            } else {
                match self.log.lookup(unit.id())? {
                    Some(record)
                        if record.checksum == batch.checksum
                            && record.row_count == batch.row_count() =>
                    {
                        ReplaceMode::NoOp
                    }
                    _ => ReplaceMode::Rewrite,
                }
            };
            entries.push(PlanEntry { unit, batch, mode });
        }

        Ok(OverwritePlan { entries })
    }
}
