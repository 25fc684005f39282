// Warehouse session - SQLite star schema
//
// One session per run, owned by the run and passed explicitly. The
// connection closes when the session is dropped, on every exit path.
// Each logical step runs in its own transaction: a failing step rolls back
// alone, steps already committed stay committed.

use crate::error::{EtlError, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub struct Warehouse {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Warehouse {
    /// Open (or create) a warehouse file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| EtlError::Connectivity {
            path: path.to_path_buf(),
            source,
        })?;
        // WAL for crash recovery between committed steps
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let wh = Warehouse {
            conn,
            path: Some(path.to_path_buf()),
        };
        wh.configure()?;
        Ok(wh)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| EtlError::Connectivity {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        let wh = Warehouse { conn, path: None };
        wh.configure()?;
        Ok(wh)
    }

    fn configure(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", true)?;
        setup_schema(&self.conn)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` as one committed step. Errors roll the step back and propagate.
    pub fn step<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Full-reload clear: fact tables (children) before dimensions (parents).
    /// DimTiempo is owned by the warehouse and is left alone.
    pub fn clear_for_reload(&mut self) -> Result<usize> {
        self.step(|conn| {
            let mut deleted = 0;
            for table in ["FactGastos", "FactVentas", "DimCliente", "DimProducto"] {
                deleted += conn.execute(&format!("DELETE FROM {table}"), [])?;
            }
            Ok(deleted)
        })
    }

    /// Populate DimTiempo with every day in `[from, to]`. Existing dates keep
    /// their surrogate keys. Returns the number of new entries.
    pub fn seed_calendar(&mut self, from: NaiveDate, to: NaiveDate) -> Result<usize> {
        if from > to {
            return Err(EtlError::InvalidArgument(format!(
                "calendar range is reversed: {from} > {to}"
            )));
        }

        self.step(|conn| {
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO DimTiempo (Fecha, Anio, Trimestre, Mes)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut inserted = 0;
            for day in from.iter_days().take_while(|d| *d <= to) {
                inserted += stmt.execute(params![
                    day,
                    day.year(),
                    (day.month() - 1) / 3 + 1,
                    day.month()
                ])?;
            }
            Ok(inserted)
        })
    }

    pub fn table_counts(&self) -> Result<TableCounts> {
        let count = |table: &str| -> Result<i64> {
            let n = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n)
        };

        Ok(TableCounts {
            dim_tiempo: count("DimTiempo")?,
            dim_cliente: count("DimCliente")?,
            dim_producto: count("DimProducto")?,
            fact_ventas: count("FactVentas")?,
            fact_gastos: count("FactGastos")?,
        })
    }

    // ========================================================================
    // RUN AUDIT
    // ========================================================================

    pub fn begin_run(&self, run: &RunRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO etl_runs (run_id, mode, started_at, status, source_fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.run_id,
                run.mode,
                run.started_at.to_rfc3339(),
                RunStatus::Running.as_str(),
                run.source_fingerprint,
            ],
        )?;
        Ok(())
    }

    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        summary: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<()> {
        let summary_json = summary.map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "UPDATE etl_runs
             SET finished_at = ?1, status = ?2, summary = ?3, error = ?4
             WHERE run_id = ?5",
            params![
                Utc::now().to_rfc3339(),
                status.as_str(),
                summary_json,
                error,
                run_id
            ],
        )?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, mode, started_at, source_fingerprint, status
             FROM etl_runs
             ORDER BY started_at DESC
             LIMIT ?1",
        )?;

        let runs = stmt
            .query_map([limit as i64], |row| {
                let started_at: String = row.get(2)?;
                Ok(RunRecord {
                    run_id: row.get(0)?,
                    mode: row.get(1)?,
                    started_at: DateTime::parse_from_rfc3339(&started_at)
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                2,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?
                        .with_timezone(&Utc),
                    source_fingerprint: row.get(3)?,
                    status: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    /// Explicit close, surfacing any error SQLite reports on shutdown.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| EtlError::Warehouse(e))
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS DimTiempo (
            IdTiempo INTEGER PRIMARY KEY AUTOINCREMENT,
            Fecha TEXT NOT NULL UNIQUE,
            Anio INTEGER NOT NULL,
            Trimestre INTEGER NOT NULL,
            Mes INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS DimCliente (
            IdCliente TEXT PRIMARY KEY,
            Nombre TEXT NOT NULL,
            Segmento TEXT NOT NULL,
            Region TEXT NOT NULL,
            FechaRegistro TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS DimProducto (
            IdProducto TEXT PRIMARY KEY,
            Categoria TEXT NOT NULL,
            Subcategoria TEXT NOT NULL,
            CostoUnitario REAL NOT NULL,
            MargenBeneficio REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS FactVentas (
            IdTiempo INTEGER NOT NULL REFERENCES DimTiempo(IdTiempo),
            IdCliente TEXT NOT NULL REFERENCES DimCliente(IdCliente),
            IdProducto TEXT NOT NULL REFERENCES DimProducto(IdProducto),
            Cantidad INTEGER NOT NULL,
            IngresoBruto REAL NOT NULL,
            CostoTotal REAL NOT NULL,
            Utilidad REAL NOT NULL,
            Estado TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS FactGastos (
            IdGasto TEXT NOT NULL,
            IdTiempo INTEGER NOT NULL REFERENCES DimTiempo(IdTiempo),
            Monto REAL NOT NULL,
            TipoGasto TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS etl_runs (
            run_id TEXT PRIMARY KEY,
            mode TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL,
            source_fingerprint TEXT,
            summary TEXT,
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_factventas_tiempo ON FactVentas(IdTiempo);
        CREATE INDEX IF NOT EXISTS idx_factgastos_tiempo ON FactGastos(IdTiempo);
        CREATE INDEX IF NOT EXISTS idx_etl_runs_started ON etl_runs(started_at);",
    )?;

    Ok(())
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub dim_tiempo: i64,
    pub dim_cliente: i64,
    pub dim_producto: i64,
    pub fact_ventas: i64,
    pub fact_gastos: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

/// One row of the `etl_runs` audit table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub source_fingerprint: String,
    pub status: String,
}

impl RunRecord {
    pub fn new(mode: &str, source_fingerprint: &str) -> Self {
        RunRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            mode: mode.to_string(),
            started_at: Utc::now(),
            source_fingerprint: source_fingerprint.to_string(),
            status: RunStatus::Running.as_str().to_string(),
        }
    }
}
