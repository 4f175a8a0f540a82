//! Date parsing and currency normalization.

use chrono::NaiveDate;
use tracing::warn;

use crate::domain::{NormalizedTransaction, RateTable, RawTransaction};
use crate::error::{EtlError, Result};

/// Text format of the `Date` column in the raw extract.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a raw date cell. Callers capture the failure as a null value rather
/// than dropping the row.
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|_| EtlError::DateParse {
        value: text.to_string(),
    })
}

/// Convert an original-currency amount to USD. The rounding to two decimal
/// places happens once, after the multiplication.
///
/// A currency code absent from the rate table is a hard error: treating it as
/// rate 1.0 would silently corrupt every downstream total.
pub fn convert_currency(amount: f64, currency: &str, rates: &RateTable) -> Result<f64> {
    let rate = rates.usd_rate(currency)?;
    Ok(round2(amount * rate))
}

/// Round half-up to two decimal places. Monetary amounts here are
/// non-negative, so rounding half away from zero and half-up agree.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round half-up to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Outcome of normalizing the loaded rows.
#[derive(Debug)]
pub struct NormalizeOutcome {
    pub rows: Vec<NormalizedTransaction>,
    /// Rows whose date did not parse. They remain in `rows` with a null date.
    pub unparsable_dates: usize,
}

pub fn normalize(raw: Vec<RawTransaction>, rates: &RateTable) -> Result<NormalizeOutcome> {
    let mut rows = Vec::with_capacity(raw.len());
    let mut unparsable_dates = 0;

    for tx in raw {
        let date = match parse_date(&tx.date) {
            Ok(date) => Some(date),
            Err(_) => {
                unparsable_dates += 1;
                None
            }
        };
        let total_amount_usd = convert_currency(tx.total_amount, &tx.currency, rates)?;
        rows.push(NormalizedTransaction {
            transaction_id: tx.transaction_id,
            date,
            region: tx.region,
            product: tx.product,
            quantity: tx.quantity,
            unit_price: tx.unit_price,
            total_amount: tx.total_amount,
            currency: tx.currency,
            customer_id: tx.customer_id,
            total_amount_usd,
        });
    }

    if unparsable_dates > 0 {
        warn!(count = unparsable_dates, "dates that did not match YYYY-MM-DD were nulled");
    }

    Ok(NormalizeOutcome {
        rows,
        unparsable_dates,
    })
}
