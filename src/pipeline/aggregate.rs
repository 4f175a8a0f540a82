//! The three grouped summaries over the enriched dataset.
//!
//! Each pass is independent and reads the same immutable slice. Ordering is
//! deterministic: chronological for months, numeric for quarters, descending
//! total with the region name as tie-break for regions.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};

use crate::domain::{EnrichedTransaction, MonthlySales, QuarterlySales, RegionPerformance};
use crate::pipeline::enrich::month_label;
use crate::pipeline::normalize::{round1, round2};

/// Monthly sales summary, in chronological order.
///
/// Grouping and ordering use the underlying `(year, month)` pair, not the
/// formatted `MMM-yy` label: sorting the label lexicographically would put
/// `Jan-25` before `Dec-24`. Rows with a null date have no bucket and are
/// skipped.
pub fn monthly_sales(rows: &[EnrichedTransaction]) -> Vec<MonthlySales> {
    let mut buckets: BTreeMap<(i32, u32), (f64, u64)> = BTreeMap::new();
    for tx in rows {
        if let Some(date) = tx.date {
            let bucket = buckets.entry((date.year(), date.month())).or_insert((0.0, 0));
            bucket.0 += tx.total_amount_usd;
            bucket.1 += 1;
        }
    }

    buckets
        .into_iter()
        .map(|((year, month), (sum, count))| {
            let first_of_month = NaiveDate::from_ymd_opt(year, month, 1)
                .expect("bucket keys come from valid dates");
            MonthlySales {
                month: month_label(first_of_month),
                total_sales_usd: round2(sum),
                transaction_count: count,
                avg_sale_amount: round2(sum / count as f64),
            }
        })
        .collect()
}

/// Quarterly sales summary, ascending by quarter number. Rows with a null
/// date have no quarter and are skipped.
pub fn quarterly_sales(rows: &[EnrichedTransaction]) -> Vec<QuarterlySales> {
    let mut buckets: BTreeMap<i32, (f64, u64)> = BTreeMap::new();
    for tx in rows {
        if let Some(quarter) = tx.quarter {
            let bucket = buckets.entry(quarter).or_insert((0.0, 0));
            bucket.0 += tx.total_amount_usd;
            bucket.1 += 1;
        }
    }

    buckets
        .into_iter()
        .map(|(quarter, (sum, count))| QuarterlySales {
            quarter,
            total_sales_usd: round2(sum),
            transaction_count: count,
            avg_sale_amount: round2(sum / count as f64),
        })
        .collect()
}

/// Regional performance with percentage share of the grand total, descending
/// by total sales.
///
/// The grand total is computed once over the full dataset and reused as the
/// denominator for every region; null-date rows count here even though they
/// have no calendar bucket. A zero grand total (every amount zero) yields
/// zero shares rather than a division error.
pub fn region_performance(rows: &[EnrichedTransaction]) -> Vec<RegionPerformance> {
    let grand_total: f64 = rows.iter().map(|tx| tx.total_amount_usd).sum();

    let mut buckets: HashMap<&str, (f64, u64)> = HashMap::new();
    for tx in rows {
        let bucket = buckets.entry(tx.region.as_str()).or_insert((0.0, 0));
        bucket.0 += tx.total_amount_usd;
        bucket.1 += 1;
    }

    let mut out: Vec<RegionPerformance> = buckets
        .into_iter()
        .map(|(region, (sum, count))| RegionPerformance {
            region: region.to_string(),
            total_sales_usd: round2(sum),
            transaction_count: count,
            pct_of_total: if grand_total == 0.0 {
                0.0
            } else {
                round1(sum / grand_total * 100.0)
            },
        })
        .collect();

    out.sort_by(|a, b| {
        b.total_sales_usd
            .partial_cmp(&a.total_sales_usd)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.region.cmp(&b.region))
    });
    out
}
