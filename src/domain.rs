use std::collections::HashMap;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{EtlError, Result};

/// Column names of the raw sales extract, in the order the header row must
/// declare them.
pub const EXPECTED_COLUMNS: [&str; 9] = [
    "Transaction_ID",
    "Date",
    "Region",
    "Product",
    "Quantity",
    "Unit_Price",
    "Total_Amount",
    "Currency",
    "Customer_ID",
];

/// Conversion rates shipped with the upstream extract. Used when no rate
/// table is configured.
pub static DEFAULT_RATES: Lazy<RateTable> = Lazy::new(|| {
    RateTable::from_iter([
        ("GBP", 1.25),
        ("EUR", 1.10),
        ("AUD", 0.68),
        ("JPY", 0.0075),
        ("INR", 0.012),
        ("USD", 1.0),
    ])
});

/// Currency-to-USD conversion table. The set of valid currency codes is
/// exactly the key set of this table; codes outside it are a hard error at
/// conversion time rather than a silent rate of 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable(HashMap<String, f64>);

impl RateTable {
    /// USD rate for a currency code.
    pub fn usd_rate(&self, code: &str) -> Result<f64> {
        self.0
            .get(code)
            .copied()
            .ok_or_else(|| EtlError::UnknownCurrency {
                code: code.to_string(),
            })
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(code, rate)| (code.as_str(), *rate))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for RateTable {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        RateTable(iter.into_iter().map(|(c, r)| (c.into(), r)).collect())
    }
}

impl Default for RateTable {
    fn default() -> Self {
        DEFAULT_RATES.clone()
    }
}

/// A transaction row as it arrives from the blob store: types enforced by the
/// loader, nothing normalized yet. The date stays text until the normalizer
/// parses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub transaction_id: i32,
    pub date: String,
    pub region: String,
    pub product: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub total_amount: f64,
    pub currency: String,
    pub customer_id: String,
}

/// A transaction with its date parsed and its amount converted to USD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedTransaction {
    pub transaction_id: i32,
    /// `None` when the source text did not match `YYYY-MM-DD`. The row is
    /// kept; dropping it would hide the failure from the run report.
    pub date: Option<NaiveDate>,
    pub region: String,
    pub product: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub total_amount: f64,
    pub currency: String,
    pub customer_id: String,
    pub total_amount_usd: f64,
}

/// A fully cleaned and enriched transaction, immutable once produced. This is
/// the shape written to the cleaned-transactions table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedTransaction {
    pub transaction_id: i32,
    pub date: Option<NaiveDate>,
    pub region: String,
    pub product: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub total_amount: f64,
    pub currency: String,
    pub customer_id: String,
    pub total_amount_usd: f64,
    pub profit_margin: f64,
    pub profit_amount_usd: f64,
    /// `None` when quantity is zero.
    pub sales_per_unit: Option<f64>,
    /// Calendar bucket label, e.g. `Jan-24`. `None` when the date is null.
    pub month: Option<String>,
    /// 1 through 4. `None` when the date is null.
    pub quarter: Option<i32>,
}

/// One row of the monthly sales summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySales {
    pub month: String,
    pub total_sales_usd: f64,
    pub transaction_count: u64,
    pub avg_sale_amount: f64,
}

/// One row of the quarterly sales summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterlySales {
    pub quarter: i32,
    pub total_sales_usd: f64,
    pub transaction_count: u64,
    pub avg_sale_amount: f64,
}

/// One row of the regional performance summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPerformance {
    pub region: String,
    pub total_sales_usd: f64,
    pub transaction_count: u64,
    pub pct_of_total: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_table_covers_the_six_source_currencies() {
        let rates = RateTable::default();
        for code in ["GBP", "EUR", "AUD", "JPY", "INR", "USD"] {
            assert!(rates.usd_rate(code).is_ok(), "missing rate for {code}");
        }
        assert_eq!(rates.usd_rate("USD").unwrap(), 1.0);
    }

    #[test]
    fn unknown_code_is_an_unknown_currency_error() {
        let rates = RateTable::default();
        let err = rates.usd_rate("XYZ").unwrap_err();
        assert!(matches!(err, EtlError::UnknownCurrency { code } if code == "XYZ"));
    }
}
