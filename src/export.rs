// Warehouse export - star schema back to workbook sheets
//
// Writes the four sheets with the source headers, so an export can be fed
// straight back into a load. Unit price is not stored in FactVentas; it is
// rebuilt from the product's cost and margin.

use crate::db::Warehouse;
use crate::error::Result;
use crate::source::{
    write_sheet, RawCustomer, RawExpense, RawProduct, RawTransaction, CUSTOMERS_SHEET,
    EXPENSES_SHEET, PRODUCTS_SHEET, TRANSACTIONS_SHEET,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportCounts {
    pub transactions: usize,
    pub customers: usize,
    pub products: usize,
    pub expenses: usize,
}

pub fn export_warehouse(wh: &Warehouse, out_dir: &Path) -> Result<ExportCounts> {
    std::fs::create_dir_all(out_dir)?;
    let conn = wh.conn();

    Ok(ExportCounts {
        transactions: write_sheet(out_dir, TRANSACTIONS_SHEET, &read_transactions(conn)?)?,
        customers: write_sheet(out_dir, CUSTOMERS_SHEET, &read_customers(conn)?)?,
        products: write_sheet(out_dir, PRODUCTS_SHEET, &read_products(conn)?)?,
        expenses: write_sheet(out_dir, EXPENSES_SHEET, &read_expenses(conn)?)?,
    })
}

fn read_transactions(conn: &Connection) -> Result<Vec<RawTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT T.Fecha, F.IdCliente, F.IdProducto, F.Cantidad,
                P.CostoUnitario * (1 + P.MargenBeneficio / 100.0),
                F.Estado
         FROM FactVentas F
         JOIN DimTiempo T ON F.IdTiempo = T.IdTiempo
         JOIN DimProducto P ON F.IdProducto = P.IdProducto
         ORDER BY T.Fecha, F.rowid",
    )?;

    let rows = stmt
        .query_map([], |row| {
            let date: NaiveDate = row.get(0)?;
            let quantity: i64 = row.get(3)?;
            Ok(RawTransaction {
                date: Some(date.to_string()),
                customer_id: row.get(1)?,
                product_id: row.get(2)?,
                quantity: Some(quantity as f64),
                unit_price: row.get(4)?,
                status: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn read_customers(conn: &Connection) -> Result<Vec<RawCustomer>> {
    let mut stmt = conn.prepare(
        "SELECT IdCliente, Nombre, Segmento, Region, FechaRegistro
         FROM DimCliente
         ORDER BY IdCliente",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(RawCustomer {
                customer_id: row.get(0)?,
                name: row.get(1)?,
                segment: row.get(2)?,
                region: row.get(3)?,
                registration_date: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn read_products(conn: &Connection) -> Result<Vec<RawProduct>> {
    let mut stmt = conn.prepare(
        "SELECT IdProducto, Categoria, Subcategoria, CostoUnitario, MargenBeneficio
         FROM DimProducto
         ORDER BY IdProducto",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(RawProduct {
                product_id: row.get(0)?,
                category: row.get(1)?,
                subcategory: row.get(2)?,
                unit_cost: row.get(3)?,
                margin_pct: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn read_expenses(conn: &Connection) -> Result<Vec<RawExpense>> {
    let mut stmt = conn.prepare(
        "SELECT F.IdGasto, T.Fecha, F.Monto, F.TipoGasto
         FROM FactGastos F
         JOIN DimTiempo T ON F.IdTiempo = T.IdTiempo
         ORDER BY T.Fecha, F.rowid",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(RawExpense {
                expense_id: row.get(0)?,
                date: row.get(1)?,
                amount: row.get(2)?,
                expense_category: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
