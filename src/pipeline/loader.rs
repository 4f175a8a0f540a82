//! Schema-enforced ingestion of the raw CSV extract.
//!
//! The header row is always enforced strictly: the nine expected columns
//! must appear, in order, under their expected names. Cell-level type
//! violations follow the configured [`SchemaMode`]: rejected into the side
//! channel (permissive) or run-aborting (strict). Malformed cells are never
//! coerced to plausible defaults.

use std::collections::{BTreeMap, HashSet};

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::SchemaMode;
use crate::domain::{RawTransaction, EXPECTED_COLUMNS};
use crate::error::{EtlError, Result};

/// A row the loader refused, kept for the rejected-rows side channel.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRow {
    /// 1-based line in the source file, counting the header as line 1.
    pub line: u64,
    pub column: String,
    pub message: String,
}

impl RejectedRow {
    fn into_violation(self) -> EtlError {
        EtlError::SchemaViolation {
            line: self.line,
            column: self.column,
            message: self.message,
        }
    }
}

/// Outcome of the schema-enforced load.
#[derive(Debug)]
pub struct LoadOutcome {
    pub rows: Vec<RawTransaction>,
    pub rejected: Vec<RejectedRow>,
    /// Number of rows whose `Transaction_ID` was already seen. Uniqueness is
    /// checked and reported, not enforced; the duplicates stay in `rows`.
    pub duplicate_transaction_ids: usize,
    /// Per-column count of empty cells among accepted and rejected rows.
    pub empty_cells: BTreeMap<String, usize>,
}

/// Parse the raw extract into typed rows.
pub fn load(bytes: &[u8], mode: SchemaMode) -> Result<LoadOutcome> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(bytes);

    verify_header(reader.headers()?)?;

    let mut rows = Vec::new();
    let mut rejected = Vec::new();
    let mut empty_cells: BTreeMap<String, usize> = BTreeMap::new();
    let mut seen_ids = HashSet::new();
    let mut duplicates = 0;

    for (idx, record) in reader.records().enumerate() {
        // The header occupies line 1; fall back to counting records when the
        // reader has no position (e.g. quoted fields spanning lines).
        let fallback_line = idx as u64 + 2;
        let result = match record {
            Ok(record) => {
                let line = record
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(fallback_line);
                audit_empty_cells(&record, &mut empty_cells);
                parse_record(line, &record)
            }
            Err(e) => Err(RejectedRow {
                line: e.position().map(|p| p.line()).unwrap_or(fallback_line),
                column: "*".to_string(),
                message: format!("malformed record: {e}"),
            }),
        };
        match result {
            Ok(raw) => {
                if !seen_ids.insert(raw.transaction_id) {
                    duplicates += 1;
                }
                rows.push(raw);
            }
            Err(rejection) => match mode {
                SchemaMode::Strict => return Err(rejection.into_violation()),
                SchemaMode::Permissive => {
                    debug!(
                        line = rejection.line,
                        column = %rejection.column,
                        "rejecting row: {}",
                        rejection.message
                    );
                    rejected.push(rejection);
                }
            },
        }
    }

    if duplicates > 0 {
        warn!(count = duplicates, "duplicate transaction ids in source");
    }
    for (column, count) in &empty_cells {
        warn!(column = %column, count, "empty cells in a column declared non-nullable");
    }

    Ok(LoadOutcome {
        rows,
        rejected,
        duplicate_transaction_ids: duplicates,
        empty_cells,
    })
}

fn verify_header(headers: &StringRecord) -> Result<()> {
    let actual: Vec<&str> = headers.iter().collect();
    if actual != EXPECTED_COLUMNS {
        return Err(EtlError::SchemaViolation {
            line: 1,
            column: "*".to_string(),
            message: format!(
                "header mismatch: expected {EXPECTED_COLUMNS:?}, got {actual:?}"
            ),
        });
    }
    Ok(())
}

fn audit_empty_cells(record: &StringRecord, empty_cells: &mut BTreeMap<String, usize>) {
    for (name, value) in EXPECTED_COLUMNS.iter().zip(record.iter()) {
        if value.is_empty() {
            *empty_cells.entry(name.to_string()).or_insert(0) += 1;
        }
    }
}

fn parse_record(line: u64, record: &StringRecord) -> std::result::Result<RawTransaction, RejectedRow> {
    if record.len() != EXPECTED_COLUMNS.len() {
        return Err(RejectedRow {
            line,
            column: "*".to_string(),
            message: format!(
                "expected {} fields, got {}",
                EXPECTED_COLUMNS.len(),
                record.len()
            ),
        });
    }

    let field = |idx: usize| record.get(idx).unwrap_or("");

    Ok(RawTransaction {
        transaction_id: parse_i32(line, "Transaction_ID", field(0))?,
        date: field(1).to_string(),
        region: field(2).to_string(),
        product: field(3).to_string(),
        quantity: parse_i32(line, "Quantity", field(4))?,
        unit_price: parse_f64(line, "Unit_Price", field(5))?,
        total_amount: parse_f64(line, "Total_Amount", field(6))?,
        currency: field(7).to_string(),
        customer_id: field(8).to_string(),
    })
}

fn parse_i32(line: u64, column: &str, value: &str) -> std::result::Result<i32, RejectedRow> {
    value.parse().map_err(|_| RejectedRow {
        line,
        column: column.to_string(),
        message: format!("expected an integer, got '{value}'"),
    })
}

fn parse_f64(line: u64, column: &str, value: &str) -> std::result::Result<f64, RejectedRow> {
    value.parse().map_err(|_| RejectedRow {
        line,
        column: column.to_string(),
        message: format!("expected a number, got '{value}'"),
    })
}
