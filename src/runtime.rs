use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::batch::BatchAggregator;
use crate::commit::Committer;
use crate::config::JobConfig;
use crate::error::EngineError;
use crate::io;
use crate::log::CommitRecord;
use crate::plan::Planner;
use crate::row::{batch_to_rows, Row};
use crate::table::TargetTable;

/// Outcome of one overwrite run, suitable for the caller to log or assert
/// against.
#[derive(Debug, Default)]
pub struct OverwriteReport {
    pub recovered: Vec<CommitRecord>,
    pub committed: Vec<CommitRecord>,
}

/// Run one overwrite job end to end: recover the commit log if a previous
/// run crashed mid-commit, read the newly computed rows, group them into
/// per-key batches, plan the minimal unit replacement and commit it.
pub fn run_overwrite(config: &JobConfig) -> Result<OverwriteReport> {
    println!("Running overwrite job: {}", config.name);

    let table = TargetTable::open_or_create(
        Path::new(&config.table.path),
        crate::partition::PartitionModel::new(
            config.table.layout,
            config.table.key_columns.clone(),
        ),
        config.table.columns.clone(),
    )?;
    ensure_config_matches(&table, config)?;

    let log = table.commit_log();

    // Startup recovery: clear a commit lock orphaned by a crashed run (no
    // commit of this invocation has been issued yet, so a present lock has
    // no live owner), repair the log from actual unit content, then drop
    // version files no pointer references.
    if table.clear_stale_lock()? {
        println!("  Cleared commit lock left by a crashed run");
    }
    let recovered = log.reconcile(&table)?;
    if !recovered.is_empty() {
        println!("  Recovered {} missing commit record(s)", recovered.len());
    }
    let swept = table.sweep_orphans()?;
    if !swept.is_empty() {
        println!("  Swept {} orphaned version file(s)", swept.len());
    }

    println!("  Reading input from: {}", config.input.path);
    let rows = read_input(config)?;
    println!("  Read {} rows", rows.len());

    let aggregator = BatchAggregator::new(
        table.schema().clone(),
        config.table.key_columns.clone(),
    );
    let batches = aggregator.ingest(rows)?;

    let mut planner = Planner::new(table.model(), &log);
    planner.force_full_rebuild = config.force_full_rebuild;
    let plan = match planner.plan(batches) {
        // An empty computation is a legitimate empty run for this caller:
        // nothing to replace, nothing touched.
        Err(EngineError::EmptyBatchSet) => {
            println!("  Input produced no batches; target table left untouched");
            return Ok(OverwriteReport {
                recovered,
                committed: Vec::new(),
            });
        }
        other => other?,
    };
    println!(
        "  Planned {} unit(s), {} to rewrite",
        plan.entries.len(),
        plan.rewrite_count()
    );

    let committer = Committer::new(&table, &log);
    let committed = committer.commit(&plan)?;

    for record in &committed {
        println!(
            "    {} [{}] rows={} checksum={:016x} seq={}{}",
            record.unit_id,
            record.key,
            record.row_count,
            record.checksum,
            record.sequence,
            if record.rewritten { "" } else { " (no-op)" }
        );
    }
    println!("✓ Commit {} applied to {} unit(s)",
        committed.first().map(|r| r.sequence).unwrap_or(0),
        committed.len()
    );

    Ok(OverwriteReport {
        recovered,
        committed,
    })
}

fn ensure_config_matches(table: &TargetTable, config: &JobConfig) -> Result<()> {
    if table.model().layout_kind() != config.table.layout {
        anyhow::bail!(
            "table at {} was created with layout {:?}; the layout is fixed at creation",
            config.table.path,
            table.model().layout_kind()
        );
    }
    if table.model().key_columns != config.table.key_columns {
        anyhow::bail!(
            "table at {} was created with key columns {:?}",
            config.table.path,
            table.model().key_columns
        );
    }
    if table.columns() != config.table.columns.as_slice() {
        anyhow::bail!(
            "table at {} has a different schema; the engine assumes a fixed schema",
            config.table.path
        );
    }
    Ok(())
}

fn read_input(config: &JobConfig) -> Result<Vec<Row>> {
    match config.input.kind.as_str() {
        "jsonl" => read_jsonl(&config.input.path),
        "parquet" => {
            let mut rows = Vec::new();
            for batch in io::read_parquet(Path::new(&config.input.path))? {
                rows.extend(batch_to_rows(&batch)?);
            }
            Ok(rows)
        }
        other => anyhow::bail!("unsupported input kind: {other}"),
    }
}

fn read_jsonl(path: &str) -> Result<Vec<Row>> {
    let file = File::open(path).with_context(|| format!("Failed to open input: {path}"))?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} rows")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let mut rows = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("Invalid JSON on input line {}", line_no + 1))?;
        // row numbers in engine errors count ingested rows, not file lines;
        // blank lines must not shift them
        rows.push(Row::from_json(rows.len(), &value)?);
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(rows)
}
