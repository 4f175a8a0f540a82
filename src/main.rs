use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use sales_etl::config::EtlConfig;
use sales_etl::pipeline::{Pipeline, RunReport};
use sales_etl::storage::{FsBlobStore, Lakehouse};

#[derive(Parser)]
#[command(name = "sales_etl")]
#[command(about = "Batch sales-transaction ETL: blob-store CSV to versioned lakehouse tables")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the four output tables
    Run {
        /// Path to the TOML configuration file
        #[arg(long, default_value = "etl.toml")]
        config: PathBuf,
    },
    /// Clean and aggregate without writing, to validate a source file
    Check {
        /// Path to the TOML configuration file
        #[arg(long, default_value = "etl.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = sales_etl::logging::init();
    let cli = Cli::parse();

    let (config_path, write) = match cli.command {
        Commands::Run { config } => (config, true),
        Commands::Check { config } => (config, false),
    };

    let config = EtlConfig::load(&config_path)?;
    let blob = Arc::new(FsBlobStore::new(&config.storage.mount_root));
    let lakehouse = Lakehouse::new(&config.lakehouse.root);
    let pipeline = Pipeline::new(config, blob, lakehouse);

    let result = if write {
        pipeline.run().await
    } else {
        pipeline.check().await
    };

    match result {
        Ok(report) => {
            print_report(&report, write);
            Ok(())
        }
        Err(e) => {
            error!("pipeline failed: {e}");
            Err(e.into())
        }
    }
}

fn print_report(report: &RunReport, wrote: bool) {
    println!("\n📊 Pipeline results:");
    println!("   Rows read: {}", report.rows_read);
    println!("   Rows cleaned: {}", report.rows_cleaned);
    println!("   Rows rejected: {}", report.rows_rejected);
    println!(
        "   Duplicate transaction IDs: {}",
        report.duplicate_transaction_ids
    );
    println!("   Unparsable dates: {}", report.unparsable_dates);
    println!("   Zero-quantity rows: {}", report.zero_quantity_rows);
    println!("   Duration: {:.2}s", report.duration_secs);

    if wrote {
        for write in &report.tables_written {
            println!(
                "   💾 {} v{} ({} rows)",
                write.table, write.version, write.rows
            );
        }
    } else {
        println!("   (check mode: nothing written)");
    }

    if !report.empty_cells.is_empty() {
        println!("\n⚠️  Empty cells by column:");
        for (column, count) in &report.empty_cells {
            println!("   - {column}: {count}");
        }
    }

    if !report.rejected_sample.is_empty() {
        println!("\n⚠️  Rejected rows (first {}):", report.rejected_sample.len());
        for rejection in &report.rejected_sample {
            println!(
                "   - line {}, column {}: {}",
                rejection.line, rejection.column, rejection.message
            );
        }
    }
}
