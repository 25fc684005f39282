// Star-schema row types
// Rows as they look after the Transform Stage: every required field present,
// dates at day granularity, sales measures computed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// FACT STREAMS
// ============================================================================

/// The two fact streams. Each has its own independent watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactStream {
    Sales,
    Expenses,
}

impl FactStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactStream::Sales => "sales",
            FactStream::Expenses => "expenses",
        }
    }

    /// Warehouse table holding this stream
    pub fn table(&self) -> &'static str {
        match self {
            FactStream::Sales => "FactVentas",
            FactStream::Expenses => "FactGastos",
        }
    }
}

impl fmt::Display for FactStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything carrying a business date the incremental filter can compare.
pub trait Dated {
    fn business_date(&self) -> NaiveDate;
}

// ============================================================================
// FACT ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub date: NaiveDate,
    pub customer_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub status: String,

    // Derived at transform time
    pub gross_revenue: f64,
    pub total_cost: f64,
    pub profit: f64,
}

impl TransactionRow {
    /// Builds the row and its measures from the product's unit cost.
    pub fn with_measures(
        date: NaiveDate,
        customer_id: String,
        product_id: String,
        quantity: i64,
        unit_price: f64,
        status: String,
        unit_cost: f64,
    ) -> Self {
        let gross_revenue = quantity as f64 * unit_price;
        let total_cost = quantity as f64 * unit_cost;
        TransactionRow {
            date,
            customer_id,
            product_id,
            quantity,
            unit_price,
            status,
            gross_revenue,
            total_cost,
            profit: gross_revenue - total_cost,
        }
    }

    /// Identity of a sale inside one calendar day, used when reconciling
    /// rows that sit exactly on the watermark. Revenue is compared in cents.
    pub fn boundary_key(&self) -> SaleKey {
        SaleKey {
            customer_id: self.customer_id.clone(),
            product_id: self.product_id.clone(),
            quantity: self.quantity,
            status: self.status.clone(),
            gross_cents: to_cents(self.gross_revenue),
        }
    }
}

impl Dated for TransactionRow {
    fn business_date(&self) -> NaiveDate {
        self.date
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SaleKey {
    pub customer_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub status: String,
    pub gross_cents: i64,
}

pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRow {
    pub expense_id: String,
    pub date: NaiveDate,
    pub amount: f64,
    pub expense_category: String,
}

impl Dated for ExpenseRow {
    fn business_date(&self) -> NaiveDate {
        self.date
    }
}

// ============================================================================
// DIMENSION ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRow {
    pub customer_id: String,
    pub name: String,
    pub segment: String,
    pub region: String,
    pub registration_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRow {
    pub product_id: String,
    pub category: String,
    pub subcategory: String,
    pub unit_cost: f64,
    pub margin_pct: f64,
}

impl ProductRow {
    /// List price implied by cost and margin
    pub fn list_price(&self) -> f64 {
        self.unit_cost * (1.0 + self.margin_pct / 100.0)
    }
}
