//! Arrow conversions for the four output table shapes.
//!
//! Output columns keep the names of the upstream extract
//! (`Transaction_ID`, `Total_Amount_USD`, `%_of_Total`, ...) so downstream
//! consumers see the same wire format regardless of which engine produced the
//! tables.

use std::sync::Arc;

use arrow::array::{ArrayRef, Date32Builder, Float64Builder, Int32Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Date32Type, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::domain::{EnrichedTransaction, MonthlySales, QuarterlySales, RegionPerformance};
use crate::error::Result;

/// Schema of the cleaned-transactions table.
///
/// The raw extract declares every column non-nullable, but `Date`, `Month`,
/// `Quarter` and `Sales_Per_Unit` are nullable here: unparsable dates and
/// zero quantities surface as nulls instead of dropped rows.
pub fn transactions_schema() -> Schema {
    Schema::new(vec![
        Field::new("Transaction_ID", DataType::Int32, false),
        Field::new("Date", DataType::Date32, true),
        Field::new("Region", DataType::Utf8, false),
        Field::new("Product", DataType::Utf8, false),
        Field::new("Quantity", DataType::Int32, false),
        Field::new("Unit_Price", DataType::Float64, false),
        Field::new("Total_Amount", DataType::Float64, false),
        Field::new("Currency", DataType::Utf8, false),
        Field::new("Customer_ID", DataType::Utf8, false),
        Field::new("Total_Amount_USD", DataType::Float64, false),
        Field::new("Profit_Margin", DataType::Float64, false),
        Field::new("Profit_Amount_USD", DataType::Float64, false),
        Field::new("Sales_Per_Unit", DataType::Float64, true),
        Field::new("Month", DataType::Utf8, true),
        Field::new("Quarter", DataType::Int32, true),
    ])
}

pub fn monthly_schema() -> Schema {
    Schema::new(vec![
        Field::new("Month", DataType::Utf8, false),
        Field::new("Total_Sales_USD", DataType::Float64, false),
        Field::new("Transaction_Count", DataType::Int64, false),
        Field::new("Avg_Sale_Amount", DataType::Float64, false),
    ])
}

pub fn quarterly_schema() -> Schema {
    Schema::new(vec![
        Field::new("Quarter", DataType::Int32, false),
        Field::new("Total_Sales_USD", DataType::Float64, false),
        Field::new("Transaction_Count", DataType::Int64, false),
        Field::new("Avg_Sale_Amount", DataType::Float64, false),
    ])
}

pub fn regional_schema() -> Schema {
    Schema::new(vec![
        Field::new("Region", DataType::Utf8, false),
        Field::new("Total_Sales_USD", DataType::Float64, false),
        Field::new("Transaction_Count", DataType::Int64, false),
        Field::new("%_of_Total", DataType::Float64, false),
    ])
}

pub fn transactions_batch(rows: &[EnrichedTransaction]) -> Result<RecordBatch> {
    let mut transaction_id = Int32Builder::with_capacity(rows.len());
    let mut date = Date32Builder::with_capacity(rows.len());
    let mut region = StringBuilder::new();
    let mut product = StringBuilder::new();
    let mut quantity = Int32Builder::with_capacity(rows.len());
    let mut unit_price = Float64Builder::with_capacity(rows.len());
    let mut total_amount = Float64Builder::with_capacity(rows.len());
    let mut currency = StringBuilder::new();
    let mut customer_id = StringBuilder::new();
    let mut total_amount_usd = Float64Builder::with_capacity(rows.len());
    let mut profit_margin = Float64Builder::with_capacity(rows.len());
    let mut profit_amount_usd = Float64Builder::with_capacity(rows.len());
    let mut sales_per_unit = Float64Builder::with_capacity(rows.len());
    let mut month = StringBuilder::new();
    let mut quarter = Int32Builder::with_capacity(rows.len());

    for tx in rows {
        transaction_id.append_value(tx.transaction_id);
        date.append_option(tx.date.map(Date32Type::from_naive_date));
        region.append_value(&tx.region);
        product.append_value(&tx.product);
        quantity.append_value(tx.quantity);
        unit_price.append_value(tx.unit_price);
        total_amount.append_value(tx.total_amount);
        currency.append_value(&tx.currency);
        customer_id.append_value(&tx.customer_id);
        total_amount_usd.append_value(tx.total_amount_usd);
        profit_margin.append_value(tx.profit_margin);
        profit_amount_usd.append_value(tx.profit_amount_usd);
        sales_per_unit.append_option(tx.sales_per_unit);
        month.append_option(tx.month.as_deref());
        quarter.append_option(tx.quarter);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(transaction_id.finish()),
        Arc::new(date.finish()),
        Arc::new(region.finish()),
        Arc::new(product.finish()),
        Arc::new(quantity.finish()),
        Arc::new(unit_price.finish()),
        Arc::new(total_amount.finish()),
        Arc::new(currency.finish()),
        Arc::new(customer_id.finish()),
        Arc::new(total_amount_usd.finish()),
        Arc::new(profit_margin.finish()),
        Arc::new(profit_amount_usd.finish()),
        Arc::new(sales_per_unit.finish()),
        Arc::new(month.finish()),
        Arc::new(quarter.finish()),
    ];

    RecordBatch::try_new(Arc::new(transactions_schema()), columns).map_err(Into::into)
}

pub fn monthly_batch(rows: &[MonthlySales]) -> Result<RecordBatch> {
    let mut month = StringBuilder::new();
    let mut total = Float64Builder::with_capacity(rows.len());
    let mut count = Int64Builder::with_capacity(rows.len());
    let mut avg = Float64Builder::with_capacity(rows.len());

    for row in rows {
        month.append_value(&row.month);
        total.append_value(row.total_sales_usd);
        count.append_value(row.transaction_count as i64);
        avg.append_value(row.avg_sale_amount);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(month.finish()),
        Arc::new(total.finish()),
        Arc::new(count.finish()),
        Arc::new(avg.finish()),
    ];
    RecordBatch::try_new(Arc::new(monthly_schema()), columns).map_err(Into::into)
}

pub fn quarterly_batch(rows: &[QuarterlySales]) -> Result<RecordBatch> {
    let mut quarter = Int32Builder::with_capacity(rows.len());
    let mut total = Float64Builder::with_capacity(rows.len());
    let mut count = Int64Builder::with_capacity(rows.len());
    let mut avg = Float64Builder::with_capacity(rows.len());

    for row in rows {
        quarter.append_value(row.quarter);
        total.append_value(row.total_sales_usd);
        count.append_value(row.transaction_count as i64);
        avg.append_value(row.avg_sale_amount);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(quarter.finish()),
        Arc::new(total.finish()),
        Arc::new(count.finish()),
        Arc::new(avg.finish()),
    ];
    RecordBatch::try_new(Arc::new(quarterly_schema()), columns).map_err(Into::into)
}

pub fn regional_batch(rows: &[RegionPerformance]) -> Result<RecordBatch> {
    let mut region = StringBuilder::new();
    let mut total = Float64Builder::with_capacity(rows.len());
    let mut count = Int64Builder::with_capacity(rows.len());
    let mut pct = Float64Builder::with_capacity(rows.len());

    for row in rows {
        region.append_value(&row.region);
        total.append_value(row.total_sales_usd);
        count.append_value(row.transaction_count as i64);
        pct.append_value(row.pct_of_total);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(region.finish()),
        Arc::new(total.finish()),
        Arc::new(count.finish()),
        Arc::new(pct.finish()),
    ];
    RecordBatch::try_new(Arc::new(regional_schema()), columns).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Date32Array, Float64Array, StringArray};
    use chrono::NaiveDate;

    fn sample_transaction(date: Option<NaiveDate>) -> EnrichedTransaction {
        EnrichedTransaction {
            transaction_id: 1,
            date,
            region: "UK".to_string(),
            product: "X".to_string(),
            quantity: 2,
            unit_price: 50.0,
            total_amount: 100.0,
            currency: "GBP".to_string(),
            customer_id: "C1".to_string(),
            total_amount_usd: 125.0,
            profit_margin: 0.15,
            profit_amount_usd: 18.75,
            sales_per_unit: Some(62.5),
            month: date.map(|d| d.format("%b-%y").to_string()),
            quarter: date.map(|_| 1),
        }
    }

    #[test]
    fn transactions_batch_has_fifteen_columns() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15);
        let batch = transactions_batch(&[sample_transaction(date)]).unwrap();
        assert_eq!(batch.num_columns(), 15);
        assert_eq!(batch.num_rows(), 1);

        let usd_idx = batch.schema().index_of("Total_Amount_USD").unwrap();
        let usd = batch
            .column(usd_idx)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(usd.value(0), 125.0);
    }

    #[test]
    fn null_date_propagates_to_date_month_and_quarter() {
        let batch = transactions_batch(&[sample_transaction(None)]).unwrap();
        let schema = batch.schema();

        let date_idx = schema.index_of("Date").unwrap();
        let dates = batch
            .column(date_idx)
            .as_any()
            .downcast_ref::<Date32Array>()
            .unwrap();
        assert!(dates.is_null(0));

        let month_idx = schema.index_of("Month").unwrap();
        let months = batch
            .column(month_idx)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert!(months.is_null(0));
    }

    #[test]
    fn regional_batch_carries_the_share_column() {
        let rows = vec![RegionPerformance {
            region: "UK".to_string(),
            total_sales_usd: 125.0,
            transaction_count: 1,
            pct_of_total: 100.0,
        }];
        let batch = regional_batch(&rows).unwrap();
        assert!(batch.schema().index_of("%_of_Total").is_ok());
    }
}
