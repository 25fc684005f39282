use crate::error::{EtlError, Result};
use crate::incremental::BoundaryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Clear facts and dimensions, then load everything
    Full,
    /// Upsert dimensions, append facts past the watermarks
    Incremental,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Full => "full",
            LoadMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(LoadMode::Full),
            "incremental" | "delta" => Ok(LoadMode::Incremental),
            other => Err(EtlError::Config(format!("unknown load mode '{other}'"))),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct EtlConfig {
    /// Directory holding one CSV per workbook sheet
    pub source_dir: PathBuf,
    /// SQLite warehouse file
    pub warehouse_path: PathBuf,
    /// Optional append-only run log file
    #[serde(default)]
    pub run_log_path: Option<PathBuf>,
    #[serde(default)]
    pub boundary_policy: BoundaryPolicy,
}

impl EtlConfig {
    pub fn new(source_dir: impl Into<PathBuf>, warehouse_path: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            warehouse_path: warehouse_path.into(),
            run_log_path: None,
            boundary_policy: BoundaryPolicy::default(),
        }
    }

    /// Read a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EtlError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: EtlConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(EtlError::Config("source_dir is empty".to_string()));
        }
        if self.warehouse_path.as_os_str().is_empty() {
            return Err(EtlError::Config("warehouse_path is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_mode_parsing() {
        assert_eq!("full".parse::<LoadMode>().unwrap(), LoadMode::Full);
        assert_eq!(" Incremental ".parse::<LoadMode>().unwrap(), LoadMode::Incremental);
        assert_eq!("delta".parse::<LoadMode>().unwrap(), LoadMode::Incremental);
        assert!("weekly".parse::<LoadMode>().is_err());
        assert_eq!(LoadMode::Full.to_string(), "full");
    }

    #[test]
    fn test_config_from_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etl.json");
        std::fs::write(
            &path,
            r#"{"source_dir": "data", "warehouse_path": "dw.sqlite"}"#,
        )
        .unwrap();

        let config = EtlConfig::from_file(&path).unwrap();

        assert_eq!(config, EtlConfig::new("data", "dw.sqlite"));
        assert_eq!(config.boundary_policy, BoundaryPolicy::Strict);
    }

    #[test]
    fn test_config_boundary_policy_and_log() {
        let config: EtlConfig = serde_json::from_str(
            r#"{
                "source_dir": "data",
                "warehouse_path": "dw.sqlite",
                "run_log_path": "logs/etl.log",
                "boundary_policy": "reconcile"
            }"#,
        )
        .unwrap();

        assert_eq!(config.boundary_policy, BoundaryPolicy::Reconcile);
        assert_eq!(config.run_log_path, Some(PathBuf::from("logs/etl.log")));
    }

    #[test]
    fn test_validate_rejects_empty_paths() {
        let config = EtlConfig::new("", "dw.sqlite");
        assert!(matches!(config.validate(), Err(EtlError::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etl.json");
        std::fs::write(&path, r#"{"source_dir": "data", "warehouse_path": ""}"#).unwrap();
        assert!(EtlConfig::from_file(&path).is_err());
    }
}
