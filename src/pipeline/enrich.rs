//! Derived-column computation. Pure, no I/O.
//!
//! Profit depends on the USD amount; per-unit sales depend on the USD amount
//! and quantity; the calendar buckets depend only on the date.

use chrono::{Datelike, NaiveDate};
use tracing::warn;

use crate::domain::{EnrichedTransaction, NormalizedTransaction};
use crate::error::{EtlError, Result};
use crate::pipeline::normalize::round2;

/// Calendar bucket label for the monthly summary, e.g. `Jan-24`.
pub fn month_label(date: NaiveDate) -> String {
    date.format("%b-%y").to_string()
}

/// Calendar quarter, 1 through 4.
pub fn quarter_of(date: NaiveDate) -> i32 {
    (date.month0() / 3 + 1) as i32
}

/// Per-unit sales for a row. A zero quantity is a row-level error the caller
/// captures as a null and counts; letting the division through would
/// propagate an infinity into the cleaned table.
pub fn sales_per_unit(total_amount_usd: f64, quantity: i32, transaction_id: i32) -> Result<f64> {
    if quantity == 0 {
        return Err(EtlError::DivisionByZero { transaction_id });
    }
    Ok(round2(total_amount_usd / f64::from(quantity)))
}

/// Outcome of the enrichment stage.
#[derive(Debug)]
pub struct EnrichOutcome {
    pub rows: Vec<EnrichedTransaction>,
    /// Rows whose quantity was zero. They remain in `rows` with a null
    /// per-unit value.
    pub zero_quantity_rows: usize,
}

pub fn enrich(rows: Vec<NormalizedTransaction>, profit_margin: f64) -> EnrichOutcome {
    let mut out = Vec::with_capacity(rows.len());
    let mut zero_quantity_rows = 0;

    for tx in rows {
        let profit_amount_usd = round2(tx.total_amount_usd * profit_margin);
        let per_unit = match sales_per_unit(tx.total_amount_usd, tx.quantity, tx.transaction_id) {
            Ok(value) => Some(value),
            Err(_) => {
                zero_quantity_rows += 1;
                None
            }
        };
        let month = tx.date.map(month_label);
        let quarter = tx.date.map(quarter_of);

        out.push(EnrichedTransaction {
            transaction_id: tx.transaction_id,
            date: tx.date,
            region: tx.region,
            product: tx.product,
            quantity: tx.quantity,
            unit_price: tx.unit_price,
            total_amount: tx.total_amount,
            currency: tx.currency,
            customer_id: tx.customer_id,
            total_amount_usd: tx.total_amount_usd,
            profit_margin,
            profit_amount_usd,
            sales_per_unit: per_unit,
            month,
            quarter,
        });
    }

    if zero_quantity_rows > 0 {
        warn!(count = zero_quantity_rows, "zero-quantity rows have no per-unit value");
    }

    EnrichOutcome {
        rows: out,
        zero_quantity_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(
        quantity: i32,
        total_amount_usd: f64,
        date: Option<NaiveDate>,
    ) -> NormalizedTransaction {
        NormalizedTransaction {
            transaction_id: 1,
            date,
            region: "UK".to_string(),
            product: "X".to_string(),
            quantity,
            unit_price: 50.0,
            total_amount: 100.0,
            currency: "GBP".to_string(),
            customer_id: "C1".to_string(),
            total_amount_usd,
        }
    }

    #[test]
    fn worked_example_row_enriches_exactly() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15);
        let outcome = enrich(vec![normalized(2, 125.0, date)], 0.15);
        let tx = &outcome.rows[0];

        assert_eq!(tx.total_amount_usd, 125.0);
        assert_eq!(tx.profit_margin, 0.15);
        assert_eq!(tx.profit_amount_usd, 18.75);
        assert_eq!(tx.sales_per_unit, Some(62.5));
        assert_eq!(tx.month.as_deref(), Some("Jan-24"));
        assert_eq!(tx.quarter, Some(1));
    }

    #[test]
    fn per_unit_recovers_the_total_within_rounding() {
        for (usd, quantity) in [(125.0, 2), (99.99, 3), (10.0, 7)] {
            let per_unit = sales_per_unit(usd, quantity, 1).unwrap();
            assert!(
                (per_unit * f64::from(quantity) - usd).abs() <= 0.01 * f64::from(quantity),
                "{per_unit} * {quantity} does not recover {usd}"
            );
        }
    }

    #[test]
    fn zero_quantity_is_a_division_error() {
        let err = sales_per_unit(125.0, 0, 7).unwrap_err();
        assert!(matches!(err, EtlError::DivisionByZero { transaction_id: 7 }));
    }

    #[test]
    fn zero_quantity_row_is_kept_with_a_null_per_unit() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15);
        let outcome = enrich(vec![normalized(0, 125.0, date)], 0.15);
        assert_eq!(outcome.zero_quantity_rows, 1);
        assert_eq!(outcome.rows.len(), 1);
        assert!(outcome.rows[0].sales_per_unit.is_none());
        assert!(outcome.rows[0].profit_amount_usd > 0.0);
    }

    #[test]
    fn null_date_yields_null_calendar_buckets() {
        let outcome = enrich(vec![normalized(2, 125.0, None)], 0.15);
        assert!(outcome.rows[0].month.is_none());
        assert!(outcome.rows[0].quarter.is_none());
    }

    #[test]
    fn quarters_cover_the_year() {
        let cases = [(1, 1), (3, 1), (4, 2), (6, 2), (7, 3), (9, 3), (10, 4), (12, 4)];
        for (month, quarter) in cases {
            let date = NaiveDate::from_ymd_opt(2024, month, 1).unwrap();
            assert_eq!(quarter_of(date), quarter, "month {month}");
        }
    }

    #[test]
    fn month_label_uses_two_digit_year() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert_eq!(month_label(date), "Dec-24");
    }
}
