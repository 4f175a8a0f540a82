use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::EtlConfig;
use crate::domain::{EnrichedTransaction, MonthlySales, QuarterlySales, RegionPerformance};
use crate::error::{EtlError, Result};
use crate::storage::columnar;
use crate::storage::{BlobStore, Lakehouse};

pub mod aggregate;
pub mod enrich;
pub mod loader;
pub mod normalize;

use loader::RejectedRow;

/// How many rejected rows are carried verbatim in the run report.
const REJECTED_SAMPLE_SIZE: usize = 10;

/// One table committed by the sink.
#[derive(Debug, Clone, Serialize)]
pub struct TableWrite {
    pub table: String,
    pub version: u64,
    pub rows: usize,
}

/// Result of a complete pipeline run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub rows_read: usize,
    pub rows_cleaned: usize,
    pub rows_rejected: usize,
    pub rejected_sample: Vec<RejectedRow>,
    pub duplicate_transaction_ids: usize,
    pub empty_cells: BTreeMap<String, usize>,
    pub unparsable_dates: usize,
    pub zero_quantity_rows: usize,
    pub tables_written: Vec<TableWrite>,
    pub duration_secs: f64,
}

/// Everything the stages produce before the sink runs.
struct Prepared {
    cleaned: Vec<EnrichedTransaction>,
    monthly: Vec<MonthlySales>,
    quarterly: Vec<QuarterlySales>,
    regional: Vec<RegionPerformance>,
    report: RunReport,
}

/// The transformation-and-aggregation pipeline. Stages run strictly forward;
/// each consumes the previous stage's output and produces a new dataset.
pub struct Pipeline {
    config: EtlConfig,
    blob: Arc<dyn BlobStore>,
    lakehouse: Lakehouse,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: EtlConfig, blob: Arc<dyn BlobStore>, lakehouse: Lakehouse) -> Self {
        Self {
            config,
            blob,
            lakehouse,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag an external orchestrator can set to stop the run at the next
    /// stage boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn checkpoint(&self, stage: &'static str) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            warn!(stage, "run cancelled");
            return Err(EtlError::Cancelled { stage });
        }
        Ok(())
    }

    /// Run the full pipeline and write the four output tables.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        counter!("sales_etl_runs_total").increment(1);

        let prepared = self.prepare().await?;
        let Prepared {
            cleaned,
            monthly,
            quarterly,
            regional,
            mut report,
        } = prepared;

        self.checkpoint("sink")?;
        let tables = &self.config.lakehouse;
        let mut written: Vec<TableWrite> = Vec::new();
        for (table, batch) in [
            (&tables.transactions_table, columnar::transactions_batch(&cleaned)?),
            (&tables.monthly_table, columnar::monthly_batch(&monthly)?),
            (&tables.quarterly_table, columnar::quarterly_batch(&quarterly)?),
            (&tables.regional_table, columnar::regional_batch(&regional)?),
        ] {
            self.write_table(table, batch, &mut written).await?;
        }

        report.tables_written = written;
        report.duration_secs = started.elapsed().as_secs_f64();
        histogram!("sales_etl_run_duration_seconds").record(report.duration_secs);
        info!(
            rows = report.rows_cleaned,
            tables = report.tables_written.len(),
            "pipeline run complete"
        );
        Ok(report)
    }

    /// Run everything up to (not including) the sink. Used by the `check`
    /// command to validate a source file and configuration without writing.
    #[instrument(skip(self))]
    pub async fn check(&self) -> Result<RunReport> {
        let started = Instant::now();
        let mut report = self.prepare().await?.report;
        report.duration_secs = started.elapsed().as_secs_f64();
        Ok(report)
    }

    async fn prepare(&self) -> Result<Prepared> {
        self.checkpoint("load")?;
        let uri = self.config.storage.object_uri();
        info!(%uri, "fetching raw extract");
        let fetch_started = Instant::now();
        let bytes = self.blob.fetch(&self.config.storage.object_path).await?;
        histogram!("sales_etl_fetch_duration_seconds")
            .record(fetch_started.elapsed().as_secs_f64());

        let load = loader::load(&bytes, self.config.schema_mode)?;
        let rows_read = load.rows.len() + load.rejected.len();
        counter!("sales_etl_rows_read_total").increment(rows_read as u64);
        counter!("sales_etl_rows_rejected_total").increment(load.rejected.len() as u64);
        info!(
            rows = load.rows.len(),
            rejected = load.rejected.len(),
            duplicates = load.duplicate_transaction_ids,
            "loaded raw extract"
        );

        self.checkpoint("normalize")?;
        let normalized = normalize::normalize(load.rows, &self.config.rates)?;
        counter!("sales_etl_unparsable_dates_total").increment(normalized.unparsable_dates as u64);

        self.checkpoint("enrich")?;
        let enriched = enrich::enrich(normalized.rows, self.config.profit_margin.0);
        counter!("sales_etl_zero_quantity_rows_total").increment(enriched.zero_quantity_rows as u64);

        self.checkpoint("aggregate")?;
        let monthly = aggregate::monthly_sales(&enriched.rows);
        let quarterly = aggregate::quarterly_sales(&enriched.rows);
        let regional = aggregate::region_performance(&enriched.rows);
        info!(
            months = monthly.len(),
            quarters = quarterly.len(),
            regions = regional.len(),
            "computed summaries"
        );

        let mut rejected_sample = load.rejected;
        let rows_rejected = rejected_sample.len();
        rejected_sample.truncate(REJECTED_SAMPLE_SIZE);

        let report = RunReport {
            rows_read,
            rows_cleaned: enriched.rows.len(),
            rows_rejected,
            rejected_sample,
            duplicate_transaction_ids: load.duplicate_transaction_ids,
            empty_cells: load.empty_cells,
            unparsable_dates: normalized.unparsable_dates,
            zero_quantity_rows: enriched.zero_quantity_rows,
            tables_written: Vec::new(),
            duration_secs: 0.0,
        };

        Ok(Prepared {
            cleaned: enriched.rows,
            monthly,
            quarterly,
            regional,
            report,
        })
    }

    /// Write one output table, wrapping any failure with the table name and
    /// the tables already committed so the caller knows exactly which outputs
    /// succeeded.
    async fn write_table(
        &self,
        table: &str,
        batch: RecordBatch,
        written: &mut Vec<TableWrite>,
    ) -> Result<()> {
        match self.lakehouse.write_table(table, &batch).await {
            Ok(commit) => {
                written.push(TableWrite {
                    table: table.to_string(),
                    version: commit.version,
                    rows: commit.segment.row_count,
                });
                Ok(())
            }
            Err(source) => Err(EtlError::WriteFailure {
                table: table.to_string(),
                completed: written.iter().map(|w| w.table.clone()).collect(),
                source: Box::new(source),
            }),
        }
    }
}
