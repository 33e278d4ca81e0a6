use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::batch::content_checksum;
use crate::error::Result;
use crate::partition::{LayoutKind, PartitionKey};
use crate::row::Row;
use crate::table::TargetTable;

/// One committed (or recovered) replacement of a physical unit. Append-only;
/// never mutated or deleted by normal operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub unit_id: String,
    /// Human-readable `col=value` key rendering, for audit output.
    pub key: String,
    pub row_count: usize,
    pub checksum: u64,
    /// Wall-clock commit time, epoch milliseconds.
    pub committed_at_ms: u64,
    /// Monotonically increasing per-table commit sequence number; all records
    /// of one commit share it.
    pub sequence: u64,
    /// False for a no-op replacement (content already identical).
    pub rewritten: bool,
}

/// Durable append-only record of committed plans, stored as JSONL next to the
/// table data. `lookup` is the sole input to the planner's idempotency check.
pub struct CommitLog {
    path: PathBuf,
}

impl CommitLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append records and fsync before returning.
    pub fn append(&self, records: &[CommitRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
        Ok(())
    }

    /// All records in append order.
    pub fn records(&self) -> Result<Vec<CommitRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for line in fs::read_to_string(&self.path)?.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }

    /// Latest record for a unit, if any. Strongly consistent with the most
    /// recent successful commit.
    pub fn lookup(&self, unit_id: &str) -> Result<Option<CommitRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .rev()
            .find(|r| r.unit_id == unit_id))
    }

    /// Next commit sequence number.
    pub fn next_sequence(&self) -> Result<u64> {
        Ok(self
            .records()?
            .iter()
            .map(|r| r.sequence)
            .max()
            .unwrap_or(0)
            + 1)
    }

    /// Startup recovery: the pointer swap is the commit point and the log is
    /// appended after it, so a crash in between leaves swapped data with no
    /// record. Re-derive the missing records from actual unit content and
    /// append them. Never rewrites or second-guesses the data itself.
    pub fn reconcile(&self, table: &TargetTable) -> Result<Vec<CommitRecord>> {
        let model = table.model();
        let mut actual: Vec<(String, String, Vec<Row>)> = Vec::new();

        match model.layout_kind() {
            LayoutKind::Explicit => {
                for unit_id in table.versions()?.versions.keys() {
                    let rows = table.read_unit_rows(unit_id)?;
                    let key = rendered_key(&rows, &model.key_columns);
                    actual.push((unit_id.clone(), key, rows));
                }
            }
            LayoutKind::Predicate => {
                let mut grouped: HashMap<PartitionKey, Vec<Row>> = HashMap::new();
                for (idx, row) in table.read_segment_rows()?.into_iter().enumerate() {
                    let key = PartitionKey::extract(&row, idx, &model.key_columns)?;
                    grouped.entry(key).or_default().push(row);
                }
                for (key, rows) in grouped {
                    actual.push((
                        model.unit_id(&key),
                        key.render(&model.key_columns),
                        rows,
                    ));
                }
            }
        }

        let mut recovered = Vec::new();
        let sequence = self.next_sequence()?;
        for (unit_id, key, rows) in actual {
            let checksum = content_checksum(&rows);
            let known = self.lookup(&unit_id)?;
            let matches = known
                .as_ref()
                .is_some_and(|r| r.checksum == checksum && r.row_count == rows.len());
            if !matches {
                recovered.push(CommitRecord {
                    unit_id,
                    key,
                    row_count: rows.len(),
                    checksum,
                    committed_at_ms: now_ms(),
                    sequence,
                    rewritten: true,
                });
            }
        }
        self.append(&recovered)?;
        Ok(recovered)
    }
}

fn rendered_key(rows: &[Row], key_columns: &[String]) -> String {
    rows.first()
        .and_then(|row| PartitionKey::extract(row, 0, key_columns).ok())
        .map(|k| k.render(key_columns))
        .unwrap_or_default()
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
