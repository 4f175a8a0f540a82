use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use arrow::array::{Array, Date32Array, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use tempfile::TempDir;

use sales_etl::config::{EtlConfig, SchemaMode};
use sales_etl::error::EtlError;
use sales_etl::pipeline::Pipeline;
use sales_etl::storage::{InMemoryBlobStore, Lakehouse};

const FIXTURE: &str = "\
Transaction_ID,Date,Region,Product,Quantity,Unit_Price,Total_Amount,Currency,Customer_ID
1,2024-01-15,UK,X,2,50.0,100.0,GBP,C1
2,2024-12-20,Germany,Y,1,200.0,200.0,EUR,C2
3,2025-01-05,UK,X,4,25.0,100.0,USD,C3
4,2024-06-30,India,Z,10,5.0,50.0,INR,C4
5,bad-date,Japan,W,1,1000.0,1000.0,JPY,C5
6,2024-03-03,Australia,V,0,0.0,80.0,AUD,C6
";

fn pipeline_for(csv: &str, lakehouse_root: &Path) -> Pipeline {
    let mut config = EtlConfig::default();
    config.lakehouse.root = lakehouse_root.to_path_buf();

    let blob = InMemoryBlobStore::new();
    blob.put(config.storage.object_path.clone(), csv.as_bytes().to_vec());

    let lakehouse = Lakehouse::new(lakehouse_root);
    Pipeline::new(config, Arc::new(blob), lakehouse)
}

async fn read_single_batch(lakehouse: &Lakehouse, table: &str) -> Result<RecordBatch> {
    let batches = lakehouse.read_table(table).await?;
    let schema = batches[0].schema();
    Ok(concat_batches(&schema, &batches)?)
}

fn str_col<'a>(batch: &'a RecordBatch, name: &str) -> &'a StringArray {
    let idx = batch.schema().index_of(name).unwrap();
    batch.column(idx).as_any().downcast_ref().unwrap()
}

fn f64_col<'a>(batch: &'a RecordBatch, name: &str) -> &'a Float64Array {
    let idx = batch.schema().index_of(name).unwrap();
    batch.column(idx).as_any().downcast_ref().unwrap()
}

fn i32_col<'a>(batch: &'a RecordBatch, name: &str) -> &'a Int32Array {
    let idx = batch.schema().index_of(name).unwrap();
    batch.column(idx).as_any().downcast_ref().unwrap()
}

fn i64_col<'a>(batch: &'a RecordBatch, name: &str) -> &'a Int64Array {
    let idx = batch.schema().index_of(name).unwrap();
    batch.column(idx).as_any().downcast_ref().unwrap()
}

#[tokio::test]
async fn full_run_writes_four_tables_and_enriches_the_example_row() -> Result<()> {
    let tmp = TempDir::new()?;
    let pipeline = pipeline_for(FIXTURE, tmp.path());

    let report = pipeline.run().await?;
    assert_eq!(report.rows_read, 6);
    assert_eq!(report.rows_cleaned, 6);
    assert_eq!(report.rows_rejected, 0);
    assert_eq!(report.unparsable_dates, 1);
    assert_eq!(report.zero_quantity_rows, 1);
    assert_eq!(report.tables_written.len(), 4);
    assert!(report.tables_written.iter().all(|w| w.version == 1));

    let lakehouse = Lakehouse::new(tmp.path());
    let batch = read_single_batch(&lakehouse, "sales_trans_tb").await?;
    assert_eq!(batch.num_rows(), 6);

    let ids = i32_col(&batch, "Transaction_ID");
    let row = (0..batch.num_rows()).find(|&i| ids.value(i) == 1).unwrap();

    assert_eq!(f64_col(&batch, "Total_Amount_USD").value(row), 125.0);
    assert_eq!(f64_col(&batch, "Profit_Amount_USD").value(row), 18.75);
    assert_eq!(f64_col(&batch, "Sales_Per_Unit").value(row), 62.5);
    assert_eq!(str_col(&batch, "Month").value(row), "Jan-24");
    assert_eq!(i32_col(&batch, "Quarter").value(row), 1);

    // The bad-date row keeps a null date and null calendar buckets.
    let bad = (0..batch.num_rows()).find(|&i| ids.value(i) == 5).unwrap();
    let dates: &Date32Array = {
        let idx = batch.schema().index_of("Date").unwrap();
        batch.column(idx).as_any().downcast_ref().unwrap()
    };
    assert!(dates.is_null(bad));
    assert!(str_col(&batch, "Month").is_null(bad));
    assert_eq!(f64_col(&batch, "Total_Amount_USD").value(bad), 7.5);

    // The zero-quantity row keeps a null per-unit value.
    let zero = (0..batch.num_rows()).find(|&i| ids.value(i) == 6).unwrap();
    assert!(f64_col(&batch, "Sales_Per_Unit").is_null(zero));

    Ok(())
}

#[tokio::test]
async fn monthly_summary_is_chronological_across_the_year_boundary() -> Result<()> {
    let tmp = TempDir::new()?;
    pipeline_for(FIXTURE, tmp.path()).run().await?;

    let lakehouse = Lakehouse::new(tmp.path());
    let batch = read_single_batch(&lakehouse, "monthly_sales").await?;

    let months = str_col(&batch, "Month");
    let labels: Vec<&str> = (0..batch.num_rows()).map(|i| months.value(i)).collect();
    assert_eq!(labels, ["Jan-24", "Mar-24", "Jun-24", "Dec-24", "Jan-25"]);

    let totals = f64_col(&batch, "Total_Sales_USD");
    assert_eq!(totals.value(0), 125.0);
    assert_eq!(totals.value(3), 220.0);

    let counts = i64_col(&batch, "Transaction_Count");
    assert!((0..batch.num_rows()).all(|i| counts.value(i) == 1));

    Ok(())
}

#[tokio::test]
async fn summary_totals_recover_the_grand_total() -> Result<()> {
    let tmp = TempDir::new()?;
    pipeline_for(FIXTURE, tmp.path()).run().await?;
    let lakehouse = Lakehouse::new(tmp.path());

    let transactions = read_single_batch(&lakehouse, "sales_trans_tb").await?;
    let usd = f64_col(&transactions, "Total_Amount_USD");
    let grand_total: f64 = (0..transactions.num_rows()).map(|i| usd.value(i)).sum();

    // Monthly and quarterly exclude the null-date row; regional includes it.
    let dated_total = grand_total - 7.5;

    for table in ["monthly_sales", "quarterly_sales"] {
        let batch = read_single_batch(&lakehouse, table).await?;
        let totals = f64_col(&batch, "Total_Sales_USD");
        let sum: f64 = (0..batch.num_rows()).map(|i| totals.value(i)).sum();
        assert!((sum - dated_total).abs() < 0.01, "{table} sums to {sum}");
    }

    let regional = read_single_batch(&lakehouse, "region_performance").await?;
    let totals = f64_col(&regional, "Total_Sales_USD");
    let sum: f64 = (0..regional.num_rows()).map(|i| totals.value(i)).sum();
    assert!((sum - grand_total).abs() < 0.01);

    Ok(())
}

#[tokio::test]
async fn regional_summary_orders_by_total_and_shares_sum_to_one_hundred() -> Result<()> {
    let tmp = TempDir::new()?;
    pipeline_for(FIXTURE, tmp.path()).run().await?;

    let lakehouse = Lakehouse::new(tmp.path());
    let batch = read_single_batch(&lakehouse, "region_performance").await?;

    let regions = str_col(&batch, "Region");
    let names: Vec<&str> = (0..batch.num_rows()).map(|i| regions.value(i)).collect();
    assert_eq!(names, ["UK", "Germany", "Australia", "Japan", "India"]);

    let totals = f64_col(&batch, "Total_Sales_USD");
    for i in 1..batch.num_rows() {
        assert!(totals.value(i) <= totals.value(i - 1));
    }

    let shares = f64_col(&batch, "%_of_Total");
    let share_sum: f64 = (0..batch.num_rows()).map(|i| shares.value(i)).sum();
    assert!(
        (share_sum - 100.0).abs() <= 0.1 * batch.num_rows() as f64,
        "shares sum to {share_sum}"
    );

    Ok(())
}

#[tokio::test]
async fn rerunning_identical_input_overwrites_with_identical_segments() -> Result<()> {
    let tmp = TempDir::new()?;
    pipeline_for(FIXTURE, tmp.path()).run().await?;
    let report = pipeline_for(FIXTURE, tmp.path()).run().await?;
    assert!(report.tables_written.iter().all(|w| w.version == 2));

    let lakehouse = Lakehouse::new(tmp.path());
    for table in [
        "sales_trans_tb",
        "monthly_sales",
        "quarterly_sales",
        "region_performance",
    ] {
        let first = lakehouse.read_commit(table, 1).await?;
        let second = lakehouse.read_commit(table, 2).await?;
        assert_eq!(
            first.segment.sha256, second.segment.sha256,
            "{table} segments differ between runs"
        );

        let first_bytes = std::fs::read(tmp.path().join(table).join(&first.segment.path))?;
        let second_bytes = std::fs::read(tmp.path().join(table).join(&second.segment.path))?;
        assert_eq!(first_bytes, second_bytes, "{table} bytes differ");
    }

    Ok(())
}

#[tokio::test]
async fn unknown_currency_aborts_before_anything_is_written() -> Result<()> {
    let csv = "\
Transaction_ID,Date,Region,Product,Quantity,Unit_Price,Total_Amount,Currency,Customer_ID
1,2024-01-15,UK,X,2,50.0,100.0,XYZ,C1
";
    let tmp = TempDir::new()?;
    let err = pipeline_for(csv, tmp.path()).run().await.unwrap_err();
    assert!(matches!(err, EtlError::UnknownCurrency { ref code } if code == "XYZ"));

    let lakehouse = Lakehouse::new(tmp.path());
    assert_eq!(lakehouse.current_version("sales_trans_tb").await?, None);
    Ok(())
}

#[tokio::test]
async fn check_mode_validates_without_writing() -> Result<()> {
    let tmp = TempDir::new()?;
    let report = pipeline_for(FIXTURE, tmp.path()).check().await?;
    assert_eq!(report.rows_cleaned, 6);
    assert!(report.tables_written.is_empty());

    let lakehouse = Lakehouse::new(tmp.path());
    assert_eq!(lakehouse.current_version("sales_trans_tb").await?, None);
    Ok(())
}

#[tokio::test]
async fn schema_violations_are_rejected_with_an_audit_trail() -> Result<()> {
    let csv = "\
Transaction_ID,Date,Region,Product,Quantity,Unit_Price,Total_Amount,Currency,Customer_ID
1,2024-01-15,UK,X,2,50.0,100.0,GBP,C1
2,2024-01-16,UK,X,two,50.0,100.0,GBP,C2
";
    let tmp = TempDir::new()?;
    let report = pipeline_for(csv, tmp.path()).run().await?;
    assert_eq!(report.rows_read, 2);
    assert_eq!(report.rows_cleaned, 1);
    assert_eq!(report.rows_rejected, 1);
    assert_eq!(report.rejected_sample[0].line, 3);
    assert_eq!(report.rejected_sample[0].column, "Quantity");
    Ok(())
}

#[tokio::test]
async fn strict_mode_aborts_on_the_first_violation() -> Result<()> {
    let csv = "\
Transaction_ID,Date,Region,Product,Quantity,Unit_Price,Total_Amount,Currency,Customer_ID
1,2024-01-15,UK,X,two,50.0,100.0,GBP,C1
";
    let tmp = TempDir::new()?;
    let mut config = EtlConfig::default();
    config.lakehouse.root = tmp.path().to_path_buf();
    config.schema_mode = SchemaMode::Strict;

    let blob = InMemoryBlobStore::new();
    blob.put(config.storage.object_path.clone(), csv.as_bytes().to_vec());
    let pipeline = Pipeline::new(config, Arc::new(blob), Lakehouse::new(tmp.path()));

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, EtlError::SchemaViolation { line: 2, .. }));
    Ok(())
}

#[tokio::test]
async fn a_set_cancel_flag_stops_the_run_at_the_next_stage_boundary() -> Result<()> {
    let tmp = TempDir::new()?;
    let pipeline = pipeline_for(FIXTURE, tmp.path());
    pipeline
        .cancel_flag()
        .store(true, std::sync::atomic::Ordering::Relaxed);

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, EtlError::Cancelled { stage: "load" }));

    let lakehouse = Lakehouse::new(tmp.path());
    assert_eq!(lakehouse.current_version("sales_trans_tb").await?, None);
    Ok(())
}
