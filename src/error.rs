use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

use crate::model::FactStream;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("cannot open warehouse at {path}: {source}")]
    Connectivity {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("warehouse operation failed: {0}")]
    Warehouse(#[from] rusqlite::Error),

    /// A fact row's date has no DimTiempo entry. Fatal for the step.
    #[error("no DimTiempo entry for {date} while loading {stream}")]
    MissingTimeKey { stream: FactStream, date: NaiveDate },

    #[error("source read failed for {sheet}: {source}")]
    Source {
        sheet: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;
