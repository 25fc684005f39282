// ⚖️ Dimension Reconciler - Type-1 upsert by natural key
//
// For each source row:
//   UPDATE <dim> SET <attributes> WHERE <natural key> = ?
//   if no row matched -> INSERT
//
// Prior attribute values are overwritten, never versioned. The natural key is
// the row identity; the reconciler never generates or changes it. Rows are
// applied in source order, so a key repeated in the source ends up with its
// last values.

use crate::error::Result;
use crate::model::{CustomerRow, ProductRow};
use rusqlite::types::ToSql;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};

// ============================================================================
// DIMENSION DESCRIPTION
// ============================================================================

/// A row of a natural-keyed dimension table.
pub trait DimensionRow {
    const TABLE: &'static str;
    const KEY_COLUMN: &'static str;
    /// Non-key columns, in the order `attribute_values` binds them
    const ATTRIBUTE_COLUMNS: &'static [&'static str];

    fn natural_key(&self) -> &str;
    fn attribute_values(&self) -> Vec<&dyn ToSql>;
}

impl DimensionRow for CustomerRow {
    const TABLE: &'static str = "DimCliente";
    const KEY_COLUMN: &'static str = "IdCliente";
    const ATTRIBUTE_COLUMNS: &'static [&'static str] =
        &["Nombre", "Segmento", "Region", "FechaRegistro"];

    fn natural_key(&self) -> &str {
        &self.customer_id
    }

    fn attribute_values(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.name as &dyn ToSql,
            &self.segment,
            &self.region,
            &self.registration_date,
        ]
    }
}

impl DimensionRow for ProductRow {
    const TABLE: &'static str = "DimProducto";
    const KEY_COLUMN: &'static str = "IdProducto";
    const ATTRIBUTE_COLUMNS: &'static [&'static str] =
        &["Categoria", "Subcategoria", "CostoUnitario", "MargenBeneficio"];

    fn natural_key(&self) -> &str {
        &self.product_id
    }

    fn attribute_values(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.category as &dyn ToSql,
            &self.subcategory,
            &self.unit_cost,
            &self.margin_pct,
        ]
    }
}

/// `UPDATE t SET a = ?1, b = ?2 WHERE key = ?3`
fn update_sql<R: DimensionRow>() -> String {
    let assignments = R::ATTRIBUTE_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        R::TABLE,
        assignments,
        R::KEY_COLUMN,
        R::ATTRIBUTE_COLUMNS.len() + 1
    )
}

/// `INSERT INTO t (key, a, b) VALUES (?1, ?2, ?3)`
fn insert_sql<R: DimensionRow>() -> String {
    let columns = std::iter::once(R::KEY_COLUMN)
        .chain(R::ATTRIBUTE_COLUMNS.iter().copied())
        .collect::<Vec<_>>();
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        R::TABLE,
        columns.join(", "),
        placeholders
    )
}

// ============================================================================
// RECONCILE
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertStats {
    pub updated: usize,
    pub inserted: usize,
}

impl UpsertStats {
    pub fn total(&self) -> usize {
        self.updated + self.inserted
    }
}

/// Upsert every row. Statements are prepared once and reused for the batch.
pub fn reconcile_dimension<R: DimensionRow>(conn: &Connection, rows: &[R]) -> Result<UpsertStats> {
    let mut update = conn.prepare_cached(&update_sql::<R>())?;
    let mut insert = conn.prepare_cached(&insert_sql::<R>())?;
    let mut stats = UpsertStats::default();

    for row in rows {
        let key = row.natural_key();
        let attributes = row.attribute_values();

        let matched = update.execute(params_from_iter(
            attributes.iter().chain(std::iter::once(&(&key as &dyn ToSql))),
        ))?;

        if matched == 0 {
            insert.execute(params_from_iter(
                std::iter::once(&(&key as &dyn ToSql)).chain(attributes.iter()),
            ))?;
            stats.inserted += 1;
        } else {
            stats.updated += 1;
        }
    }

    tracing::debug!(
        table = R::TABLE,
        updated = stats.updated,
        inserted = stats.inserted,
        "dimension reconciled"
    );
    Ok(stats)
}

/// Plain insert for full reload, where the table has just been cleared.
pub fn insert_dimension<R: DimensionRow>(conn: &Connection, rows: &[R]) -> Result<usize> {
    let mut insert = conn.prepare_cached(&insert_sql::<R>())?;
    for row in rows {
        let key = row.natural_key();
        let attributes = row.attribute_values();
        insert.execute(params_from_iter(
            std::iter::once(&(&key as &dyn ToSql)).chain(attributes.iter()),
        ))?;
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Warehouse;
    use chrono::NaiveDate;

    fn customer(id: &str, name: &str, region: &str) -> CustomerRow {
        CustomerRow {
            customer_id: id.to_string(),
            name: name.to_string(),
            segment: "Retail".to_string(),
            region: region.to_string(),
            registration_date: NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(),
        }
    }

    fn product(id: &str, cost: f64) -> ProductRow {
        ProductRow {
            product_id: id.to_string(),
            category: "Hogar".to_string(),
            subcategory: "Cocina".to_string(),
            unit_cost: cost,
            margin_pct: 20.0,
        }
    }

    fn customers_in(wh: &Warehouse) -> Vec<(String, String, String, String)> {
        let mut stmt = wh
            .conn()
            .prepare("SELECT IdCliente, Nombre, Region, FechaRegistro FROM DimCliente ORDER BY IdCliente")
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_generated_sql() {
        assert_eq!(
            update_sql::<CustomerRow>(),
            "UPDATE DimCliente SET Nombre = ?1, Segmento = ?2, Region = ?3, FechaRegistro = ?4 WHERE IdCliente = ?5"
        );
        assert_eq!(
            insert_sql::<ProductRow>(),
            "INSERT INTO DimProducto (IdProducto, Categoria, Subcategoria, CostoUnitario, MargenBeneficio) VALUES (?1, ?2, ?3, ?4, ?5)"
        );
    }

    #[test]
    fn test_inserts_then_overwrites() {
        let mut wh = Warehouse::open_in_memory().unwrap();

        let first = wh
            .step(|conn| reconcile_dimension(conn, &[customer("C1", "Ana", "Norte"), customer("C2", "Luis", "Sur")]))
            .unwrap();
        assert_eq!(first, UpsertStats { updated: 0, inserted: 2 });

        let second = wh
            .step(|conn| reconcile_dimension(conn, &[customer("C1", "Ana María", "Centro"), customer("C3", "Eva", "Este")]))
            .unwrap();
        assert_eq!(second, UpsertStats { updated: 1, inserted: 1 });

        let rows = customers_in(&wh);
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            (
                "C1".to_string(),
                "Ana María".to_string(),
                "Centro".to_string(),
                "2023-05-01".to_string()
            )
        );
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let batch = vec![customer("C1", "Ana", "Norte"), customer("C2", "Luis", "Sur")];

        wh.step(|conn| reconcile_dimension(conn, &batch)).unwrap();
        let after_first = customers_in(&wh);
        let stats = wh.step(|conn| reconcile_dimension(conn, &batch)).unwrap();

        assert_eq!(stats, UpsertStats { updated: 2, inserted: 0 });
        assert_eq!(customers_in(&wh), after_first);
    }

    #[test]
    fn test_repeated_key_keeps_last_values() {
        let mut wh = Warehouse::open_in_memory().unwrap();

        let stats = wh
            .step(|conn| reconcile_dimension(conn, &[product("P1", 10.0), product("P1", 12.5)]))
            .unwrap();

        assert_eq!(stats.total(), 2);
        let (count, cost): (i64, f64) = wh
            .conn()
            .query_row("SELECT COUNT(*), MAX(CostoUnitario) FROM DimProducto", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(cost, 12.5);
    }

    #[test]
    fn test_plain_insert_rejects_existing_key() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        wh.step(|conn| insert_dimension(conn, &[product("P1", 10.0)])).unwrap();

        let result = wh.step(|conn| insert_dimension(conn, &[product("P1", 11.0)]));

        assert!(result.is_err());
        assert_eq!(wh.table_counts().unwrap().dim_producto, 1);
    }
}
