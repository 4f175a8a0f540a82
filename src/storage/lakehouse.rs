//! Versioned columnar table storage.
//!
//! Each output table lives in its own directory under the lakehouse root and
//! carries a small Delta-inspired commit log:
//!
//! ```text
//! <root>/<table>/
//!   _sales_log/
//!     CURRENT                  # latest committed version (e.g. "2\n")
//!     0000000001.json          # commit 1
//!     0000000002.json          # commit 2
//!   data/
//!     part-00001-<uuid>.parquet
//!     part-00002-<uuid>.parquet
//! ```
//!
//! Every write is a full overwrite: the new commit's segment supersedes all
//! prior segments, and readers resolve `CURRENT` to find the live one. Commit
//! files are create-new (per-version unique); only the `CURRENT` pointer is
//! replaced, with a write-then-rename so readers never observe a torn
//! pointer. Data files of superseded versions are left in place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use crate::error::{EtlError, Result};

const LOG_DIR: &str = "_sales_log";
const CURRENT_FILE: &str = "CURRENT";

/// A single committed table version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub segment: SegmentMeta,
}

/// Kind of change a commit records. Overwrite is the only operation this
/// pipeline performs; there is no append or merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Overwrite,
}

/// The data segment a commit made live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Path of the Parquet file, relative to the table root.
    pub path: String,
    pub row_count: usize,
    /// Checksum of the segment bytes, verified on read-back.
    pub sha256: String,
}

/// Destination catalog for the pipeline's output tables.
pub struct Lakehouse {
    root: PathBuf,
}

impl Lakehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_root(&self, table: &str) -> PathBuf {
        self.root.join(table)
    }

    /// Write `batch` as the next version of `table`, fully replacing any
    /// prior contents.
    pub async fn write_table(&self, table: &str, batch: &RecordBatch) -> Result<Commit> {
        let mut buf = Vec::new();
        {
            let props = WriterProperties::builder().build();
            let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))?;
            writer.write(batch)?;
            writer.close()?;
        }
        let sha256 = hex::encode(Sha256::digest(&buf));

        let table_root = self.table_root(table);
        let version = self.current_version(table).await?.unwrap_or(0) + 1;
        let segment_path = format!("data/part-{version:05}-{}.parquet", Uuid::new_v4());
        write_new(&table_root.join(&segment_path), &buf).await?;

        let commit = Commit {
            version,
            timestamp: Utc::now(),
            operation: Operation::Overwrite,
            segment: SegmentMeta {
                path: segment_path,
                row_count: batch.num_rows(),
                sha256,
            },
        };
        let commit_path = table_root.join(LOG_DIR).join(format!("{version:010}.json"));
        write_new(&commit_path, &serde_json::to_vec_pretty(&commit)?).await?;

        // The pointer flip is what makes the new version visible.
        let current = table_root.join(LOG_DIR).join(CURRENT_FILE);
        write_atomic(&current, format!("{version}\n").as_bytes()).await?;

        info!(table, version, rows = batch.num_rows(), "committed table version");
        Ok(commit)
    }

    /// Latest committed version of `table`, or `None` if it has never been
    /// written.
    pub async fn current_version(&self, table: &str) -> Result<Option<u64>> {
        let current = self.table_root(table).join(LOG_DIR).join(CURRENT_FILE);
        let contents = match fs::read_to_string(&current).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let version = contents.trim().parse::<u64>().map_err(|_| EtlError::TableLog {
            table: table.to_string(),
            message: format!("corrupt CURRENT pointer: {contents:?}"),
        })?;
        Ok(Some(version))
    }

    /// Read the commit record for a specific version of `table`.
    pub async fn read_commit(&self, table: &str, version: u64) -> Result<Commit> {
        let path = self
            .table_root(table)
            .join(LOG_DIR)
            .join(format!("{version:010}.json"));
        let bytes = fs::read(&path).await.map_err(|e| EtlError::TableLog {
            table: table.to_string(),
            message: format!("missing commit {version}: {e}"),
        })?;
        serde_json::from_slice(&bytes).map_err(Into::into)
    }

    /// Read back the live contents of `table`, verifying the segment
    /// checksum recorded in its commit.
    pub async fn read_table(&self, table: &str) -> Result<Vec<RecordBatch>> {
        let version = self
            .current_version(table)
            .await?
            .ok_or_else(|| EtlError::TableLog {
                table: table.to_string(),
                message: "table has never been written".to_string(),
            })?;
        let commit = self.read_commit(table, version).await?;

        let segment = self.table_root(table).join(&commit.segment.path);
        let bytes = fs::read(&segment).await.map_err(|e| EtlError::TableLog {
            table: table.to_string(),
            message: format!("missing segment '{}': {e}", commit.segment.path),
        })?;
        if hex::encode(Sha256::digest(&bytes)) != commit.segment.sha256 {
            return Err(EtlError::TableLog {
                table: table.to_string(),
                message: format!("checksum mismatch for segment '{}'", commit.segment.path),
            });
        }

        let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))?.build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(batches)
    }
}

async fn create_parent_dir(abs: &Path) -> Result<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Create a new file, failing if it already exists. Commit files and data
/// segments are per-version unique.
async fn write_new(abs: &Path, contents: &[u8]) -> Result<()> {
    create_parent_dir(abs).await?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(abs)
        .await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

/// Write-then-rename so the target is replaced atomically.
async fn write_atomic(abs: &Path, contents: &[u8]) -> Result<()> {
    create_parent_dir(abs).await?;
    let tmp = abs.with_extension("tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    fs::rename(&tmp, abs).await?;
    Ok(())
}
