// Fact Loader - append-only sales and expense facts
//
// Each row's business date is resolved to the DimTiempo surrogate key by
// exact match. The time dimension is owned by the warehouse: a date with no
// entry is a fatal error for the step, never an auto-create and never a
// silent skip. Existing fact rows are never updated or deleted.

use crate::error::{EtlError, Result};
use crate::model::{to_cents, ExpenseRow, FactStream, SaleKey, TransactionRow};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

// ============================================================================
// TIME KEY RESOLUTION
// ============================================================================

/// Per-step cache of date -> IdTiempo lookups
pub struct TimeKeys<'c> {
    conn: &'c Connection,
    stream: FactStream,
    cache: HashMap<NaiveDate, i64>,
}

impl<'c> TimeKeys<'c> {
    pub fn new(conn: &'c Connection, stream: FactStream) -> Self {
        TimeKeys {
            conn,
            stream,
            cache: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, date: NaiveDate) -> Result<i64> {
        if let Some(id) = self.cache.get(&date) {
            return Ok(*id);
        }

        let id: Option<i64> = self
            .conn
            .prepare_cached("SELECT IdTiempo FROM DimTiempo WHERE Fecha = ?1")?
            .query_row([date], |row| row.get(0))
            .optional()?;

        match id {
            Some(id) => {
                self.cache.insert(date, id);
                Ok(id)
            }
            None => Err(EtlError::MissingTimeKey {
                stream: self.stream,
                date,
            }),
        }
    }
}

// ============================================================================
// LOADERS
// ============================================================================

pub fn load_sales(conn: &Connection, rows: &[TransactionRow]) -> Result<usize> {
    let mut keys = TimeKeys::new(conn, FactStream::Sales);
    let mut insert = conn.prepare_cached(
        "INSERT INTO FactVentas (IdTiempo, IdCliente, IdProducto,
            Cantidad, IngresoBruto, CostoTotal, Utilidad, Estado)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;

    let mut inserted = 0;
    for row in rows {
        let time_id = keys.resolve(row.date)?;
        inserted += insert.execute(params![
            time_id,
            row.customer_id,
            row.product_id,
            row.quantity,
            row.gross_revenue,
            row.total_cost,
            row.profit,
            row.status,
        ])?;
    }

    Ok(inserted)
}

pub fn load_expenses(conn: &Connection, rows: &[ExpenseRow]) -> Result<usize> {
    let mut keys = TimeKeys::new(conn, FactStream::Expenses);
    let mut insert = conn.prepare_cached(
        "INSERT INTO FactGastos (IdGasto, IdTiempo, Monto, TipoGasto)
         VALUES (?1, ?2, ?3, ?4)",
    )?;

    let mut inserted = 0;
    for row in rows {
        let time_id = keys.resolve(row.date)?;
        inserted += insert.execute(params![
            row.expense_id,
            time_id,
            row.amount,
            row.expense_category,
        ])?;
    }

    Ok(inserted)
}

// ============================================================================
// BOUNDARY LOOKUPS
// ============================================================================

/// Sales already stored for one calendar day, as comparable keys
pub fn loaded_sale_keys(conn: &Connection, date: NaiveDate) -> Result<Vec<SaleKey>> {
    let mut stmt = conn.prepare(
        "SELECT F.IdCliente, F.IdProducto, F.Cantidad, F.Estado, F.IngresoBruto
         FROM FactVentas F
         JOIN DimTiempo T ON F.IdTiempo = T.IdTiempo
         WHERE T.Fecha = ?1",
    )?;

    let keys = stmt
        .query_map([date], |row| {
            let gross: f64 = row.get(4)?;
            Ok(SaleKey {
                customer_id: row.get(0)?,
                product_id: row.get(1)?,
                quantity: row.get(2)?,
                status: row.get(3)?,
                gross_cents: to_cents(gross),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(keys)
}

/// Expense ids already stored for one calendar day
pub fn loaded_expense_ids(conn: &Connection, date: NaiveDate) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT F.IdGasto
         FROM FactGastos F
         JOIN DimTiempo T ON F.IdTiempo = T.IdTiempo
         WHERE T.Fecha = ?1",
    )?;

    let ids = stmt
        .query_map([date], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    Ok(ids)
}
