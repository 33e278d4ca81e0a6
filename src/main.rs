use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dynamic_partition_overwrite::config::JobConfig;
use dynamic_partition_overwrite::runtime;
use dynamic_partition_overwrite::table::TargetTable;

#[derive(Parser)]
#[command(name = "dpo")]
#[command(about = "Dynamic partition overwrite - replaces only the storage units present in a new computation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an overwrite job from YAML configuration
    Run {
        /// Path to job YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a job configuration
    Validate {
        /// Path to job YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the commit log of a target table
    Log {
        /// Path to the table directory
        #[arg(short, long)]
        table: PathBuf,
    },
    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let job = JobConfig::from_yaml_file(&config)?;
            runtime::run_overwrite(&job)?;
        }
        Commands::Validate { config } => {
            let _job = JobConfig::from_yaml_file(&config)?;
            println!("✓ Job configuration is valid");
        }
        Commands::Log { table } => {
            let table = TargetTable::open(&table)?;
            let records = table.commit_log().records()?;
            if records.is_empty() {
                println!("(commit log is empty)");
            }
            for r in records {
                println!(
                    "seq={} at={}ms unit={} key=[{}] rows={} checksum={:016x}{}",
                    r.sequence,
                    r.committed_at_ms,
                    r.unit_id,
                    r.key,
                    r.row_count,
                    r.checksum,
                    if r.rewritten { "" } else { " (no-op)" }
                );
            }
        }
        Commands::Version => {
            println!("dpo version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
