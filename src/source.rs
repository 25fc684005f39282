// Source Extractor - spreadsheet sheets as CSV files
//
// The workbook is laid out as one CSV file per sheet inside a source
// directory. Headers keep the workbook's names; accent-free spellings are
// accepted as aliases. Every field is optional here: an empty or
// unparseable cell becomes None and the Transform Stage drops the row.

use crate::error::{EtlError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const TRANSACTIONS_SHEET: &str = "Transacciones";
pub const CUSTOMERS_SHEET: &str = "Clientes";
pub const PRODUCTS_SHEET: &str = "Productos";
pub const EXPENSES_SHEET: &str = "Gastos";

/// Sheet order used for loading and fingerprinting
pub const SHEETS: [&str; 4] = [
    TRANSACTIONS_SHEET,
    CUSTOMERS_SHEET,
    PRODUCTS_SHEET,
    EXPENSES_SHEET,
];

pub fn sheet_path(dir: &Path, sheet: &str) -> PathBuf {
    dir.join(format!("{sheet}.csv"))
}

// ============================================================================
// RAW ROWS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawTransaction {
    #[serde(rename = "Fecha", default, deserialize_with = "csv::invalid_option")]
    pub date: Option<String>,

    #[serde(rename = "ID_Cliente", default, deserialize_with = "csv::invalid_option")]
    pub customer_id: Option<String>,

    #[serde(rename = "ID_Producto", default, deserialize_with = "csv::invalid_option")]
    pub product_id: Option<String>,

    /// Spreadsheets often hand integers over as `2.0`; whole-ness is checked in transform
    #[serde(rename = "Cantidad", default, deserialize_with = "csv::invalid_option")]
    pub quantity: Option<f64>,

    #[serde(rename = "Precio_Unitario", default, deserialize_with = "csv::invalid_option")]
    pub unit_price: Option<f64>,

    #[serde(rename = "Estado", default, deserialize_with = "csv::invalid_option")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawCustomer {
    #[serde(rename = "ID_Cliente", default, deserialize_with = "csv::invalid_option")]
    pub customer_id: Option<String>,

    #[serde(rename = "Nombre", default, deserialize_with = "csv::invalid_option")]
    pub name: Option<String>,

    #[serde(rename = "Segmento", default, deserialize_with = "csv::invalid_option")]
    pub segment: Option<String>,

    #[serde(
        rename = "Región",
        alias = "Region",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    pub region: Option<String>,

    #[serde(rename = "Fecha_Registro", default, deserialize_with = "csv::invalid_option")]
    pub registration_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawProduct {
    #[serde(rename = "ID_Producto", default, deserialize_with = "csv::invalid_option")]
    pub product_id: Option<String>,

    #[serde(
        rename = "Categoría",
        alias = "Categoria",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    pub category: Option<String>,

    #[serde(
        rename = "Subcategoría",
        alias = "Subcategoria",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    pub subcategory: Option<String>,

    #[serde(rename = "Costo_Unitario", default, deserialize_with = "csv::invalid_option")]
    pub unit_cost: Option<f64>,

    #[serde(rename = "Margen_Beneficio", default, deserialize_with = "csv::invalid_option")]
    pub margin_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawExpense {
    #[serde(rename = "ID_Gasto", default, deserialize_with = "csv::invalid_option")]
    pub expense_id: Option<String>,

    #[serde(rename = "Fecha", default, deserialize_with = "csv::invalid_option")]
    pub date: Option<String>,

    #[serde(rename = "Monto", default, deserialize_with = "csv::invalid_option")]
    pub amount: Option<f64>,

    #[serde(
        rename = "Categoría_Gasto",
        alias = "Categoria_Gasto",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    pub expense_category: Option<String>,
}

// ============================================================================
// EXTRACT
// ============================================================================

/// The four datasets of one run, read once.
#[derive(Debug, Clone, Default)]
pub struct SourceData {
    pub transactions: Vec<RawTransaction>,
    pub customers: Vec<RawCustomer>,
    pub products: Vec<RawProduct>,
    pub expenses: Vec<RawExpense>,
    /// SHA-256 over the sheet files, in sheet order
    pub fingerprint: String,
}

impl SourceData {
    pub fn row_count(&self) -> usize {
        self.transactions.len() + self.customers.len() + self.products.len() + self.expenses.len()
    }
}

pub fn load_source(dir: &Path) -> Result<SourceData> {
    Ok(SourceData {
        transactions: read_sheet(dir, TRANSACTIONS_SHEET)?,
        customers: read_sheet(dir, CUSTOMERS_SHEET)?,
        products: read_sheet(dir, PRODUCTS_SHEET)?,
        expenses: read_sheet(dir, EXPENSES_SHEET)?,
        fingerprint: fingerprint(dir)?,
    })
}

fn read_sheet<T>(dir: &Path, sheet: &'static str) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let path = sheet_path(dir, sheet);
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(&path)
        .map_err(|source| EtlError::Source { sheet, source })?;

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: T = result.map_err(|source| EtlError::Source { sheet, source })?;
        rows.push(row);
    }

    tracing::debug!(sheet, rows = rows.len(), "sheet read");
    Ok(rows)
}

/// Hash of the sheet files, recorded with each run so reruns over the same
/// input can be recognised.
pub fn fingerprint(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for sheet in SHEETS {
        let bytes = std::fs::read(sheet_path(dir, sheet))?;
        hasher.update(sheet.as_bytes());
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// WRITE (used by export)
// ============================================================================

pub fn write_sheet<T: Serialize>(dir: &Path, sheet: &'static str, rows: &[T]) -> Result<usize> {
    let path = sheet_path(dir, sheet);
    let mut wtr = csv::Writer::from_path(&path).map_err(|source| EtlError::Source { sheet, source })?;
    for row in rows {
        wtr.serialize(row)
            .map_err(|source| EtlError::Source { sheet, source })?;
    }
    wtr.flush()?;
    Ok(rows.len())
}
