// Watermark Reader
// Highest business date already loaded, per fact stream.

use crate::error::Result;
use crate::model::FactStream;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "date", rename_all = "snake_case")]
pub enum Watermark {
    /// The fact table holds no rows yet
    Empty,
    At(NaiveDate),
}

impl Watermark {
    pub fn from_max(max: Option<NaiveDate>) -> Self {
        match max {
            Some(date) => Watermark::At(date),
            None => Watermark::Empty,
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Watermark::Empty => None,
            Watermark::At(date) => Some(*date),
        }
    }

    /// True when a row dated `date` is past the watermark.
    pub fn admits(&self, date: NaiveDate) -> bool {
        match self {
            Watermark::Empty => true,
            Watermark::At(mark) => date > *mark,
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Empty => f.write_str("none"),
            Watermark::At(date) => write!(f, "{date}"),
        }
    }
}

/// Per-stream watermarks read at the start of an incremental run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermarks {
    pub sales: Watermark,
    pub expenses: Watermark,
}

pub fn read_watermark(conn: &Connection, stream: FactStream) -> Result<Watermark> {
    let sql = format!(
        "SELECT MAX(T.Fecha)
         FROM {} F
         JOIN DimTiempo T ON F.IdTiempo = T.IdTiempo",
        stream.table()
    );
    let max: Option<NaiveDate> = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(Watermark::from_max(max))
}

pub fn read_watermarks(conn: &Connection) -> Result<Watermarks> {
    Ok(Watermarks {
        sales: read_watermark(conn, FactStream::Sales)?,
        expenses: read_watermark(conn, FactStream::Expenses)?,
    })
}
