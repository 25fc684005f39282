// Transform Stage - derived measures, date normalization, incomplete-row drop
//
// Pure: takes the raw sheets, returns clean rows plus per-collection counts.
// A transaction whose product has no known unit cost has no total cost, so it
// is incomplete and dropped like any other row with a missing field. It is
// never costed at zero.

use crate::model::{CustomerRow, ExpenseRow, ProductRow, TransactionRow};
use crate::source::{RawCustomer, RawExpense, RawProduct, RawTransaction, SourceData};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashMap;

// ============================================================================
// DATE NORMALIZATION
// ============================================================================

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse a spreadsheet date cell down to day granularity.
///
/// Time-of-day is discarded so comparisons against warehouse watermarks are
/// exact. Returns None for anything unrecognised.
pub fn normalize_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    // Month-first, as the banks' exports
    NaiveDate::parse_from_str(value, "%m/%d/%Y").ok()
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionCount {
    pub kept: usize,
    pub dropped: usize,
}

impl CollectionCount {
    fn tally(kept: usize, total: usize) -> Self {
        CollectionCount {
            kept,
            dropped: total - kept,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransformReport {
    pub transactions: CollectionCount,
    pub customers: CollectionCount,
    pub products: CollectionCount,
    pub expenses: CollectionCount,
}

impl TransformReport {
    pub fn dropped(&self) -> usize {
        self.transactions.dropped
            + self.customers.dropped
            + self.products.dropped
            + self.expenses.dropped
    }
}

#[derive(Debug, Clone, Default)]
pub struct Transformed {
    pub transactions: Vec<TransactionRow>,
    pub customers: Vec<CustomerRow>,
    pub products: Vec<ProductRow>,
    pub expenses: Vec<ExpenseRow>,
    pub report: TransformReport,
}

// ============================================================================
// TRANSFORM
// ============================================================================

pub fn transform(source: &SourceData) -> Transformed {
    let customers: Vec<CustomerRow> = source.customers.iter().filter_map(clean_customer).collect();
    let products: Vec<ProductRow> = source.products.iter().filter_map(clean_product).collect();

    // Later rows win, matching the upsert order
    let cost_map: HashMap<&str, f64> = products
        .iter()
        .map(|p| (p.product_id.as_str(), p.unit_cost))
        .collect();

    let transactions: Vec<TransactionRow> = source
        .transactions
        .iter()
        .filter_map(|raw| clean_transaction(raw, &cost_map))
        .collect();
    let expenses: Vec<ExpenseRow> = source.expenses.iter().filter_map(clean_expense).collect();

    let report = TransformReport {
        transactions: CollectionCount::tally(transactions.len(), source.transactions.len()),
        customers: CollectionCount::tally(customers.len(), source.customers.len()),
        products: CollectionCount::tally(products.len(), source.products.len()),
        expenses: CollectionCount::tally(expenses.len(), source.expenses.len()),
    };

    if report.dropped() > 0 {
        tracing::debug!(?report, "incomplete rows dropped");
    }

    Transformed {
        transactions,
        customers,
        products,
        expenses,
        report,
    }
}

fn text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn whole(value: Option<f64>) -> Option<i64> {
    number(value)
        .filter(|v| v.fract() == 0.0)
        .map(|v| v as i64)
}

fn date(value: &Option<String>) -> Option<NaiveDate> {
    value.as_deref().and_then(normalize_date)
}

fn clean_transaction(raw: &RawTransaction, cost_map: &HashMap<&str, f64>) -> Option<TransactionRow> {
    let product_id = text(&raw.product_id)?;
    let unit_cost = *cost_map.get(product_id.as_str())?;

    Some(TransactionRow::with_measures(
        date(&raw.date)?,
        text(&raw.customer_id)?,
        product_id,
        whole(raw.quantity)?,
        number(raw.unit_price)?,
        text(&raw.status)?,
        unit_cost,
    ))
}

fn clean_customer(raw: &RawCustomer) -> Option<CustomerRow> {
    Some(CustomerRow {
        customer_id: text(&raw.customer_id)?,
        name: text(&raw.name)?,
        segment: text(&raw.segment)?,
        region: text(&raw.region)?,
        registration_date: date(&raw.registration_date)?,
    })
}

fn clean_product(raw: &RawProduct) -> Option<ProductRow> {
    Some(ProductRow {
        product_id: text(&raw.product_id)?,
        category: text(&raw.category)?,
        subcategory: text(&raw.subcategory)?,
        unit_cost: number(raw.unit_cost)?,
        margin_pct: number(raw.margin_pct)?,
    })
}

fn clean_expense(raw: &RawExpense) -> Option<ExpenseRow> {
    Some(ExpenseRow {
        expense_id: text(&raw.expense_id)?,
        date: date(&raw.date)?,
        amount: number(raw.amount)?,
        expense_category: text(&raw.expense_category)?,
    })
}
