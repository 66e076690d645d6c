//! Loader configuration.
//!
//! Defaults describe the standard target schema; a JSON file can replace
//! them and environment variables (optionally from a `.env` file) override
//! individual settings:
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `XMLMIGRATE_BATCH_SIZE` | rows per fast-path sub-batch |
//! | `XMLMIGRATE_DIAGNOSTICS_DIR` | where failure diagnostics are written |
//! | `XMLMIGRATE_DIAGNOSTIC_SAMPLE_ROWS` | parameter rows kept per diagnostic |
//! | `XMLMIGRATE_TARGET_SCHEMA` | overrides the contract's `target_schema` |

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;
use crate::logs::log_warning;

/// Default rows per sub-batch
const DEFAULT_BATCH_SIZE: usize = 500;

/// Default number of parameter rows kept in a diagnostic
const DEFAULT_SAMPLE_ROWS: usize = 5;

/// Default diagnostics directory (relative to current dir)
pub const DEFAULT_DIAGNOSTICS_DIR: &str = ".xmlmigrate/diagnostics";

/// A key-value shaped table: duplicate inserts become updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValueTable {
    pub table: String,
    /// Natural key columns.
    pub key_columns: Vec<String>,
    /// Columns the compensating update sets.
    pub value_columns: Vec<String>,
}

impl KeyValueTable {
    pub fn new(table: &str, key_columns: &[&str], value_columns: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            key_columns: key_columns.iter().map(|s| s.to_string()).collect(),
            value_columns: value_columns.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Settings for the bulk load executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Overrides the contract's target schema when set.
    pub target_schema: Option<String>,
    /// Tables always loaded row by row.
    pub force_fallback_tables: Vec<String>,
    pub key_value_tables: Vec<KeyValueTable>,
    /// Tables where a duplicate primary key is skipped.
    pub first_write_wins_tables: Vec<String>,
    /// Tables loaded with `IDENTITY_INSERT` enabled.
    pub identity_insert_tables: Vec<String>,
    pub diagnostics_dir: PathBuf,
    pub diagnostic_sample_rows: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            target_schema: None,
            force_fallback_tables: vec!["app_historical_lookup".to_string()],
            key_value_tables: vec![
                KeyValueTable::new("scores", &["app_id", "score_identifier"], &["score"]),
                KeyValueTable::new("indicators", &["app_id", "indicator"], &["value"]),
                KeyValueTable::new("app_historical_lookup", &["app_id", "name"], &["value"]),
                KeyValueTable::new("app_report_results_lookup", &["app_id", "name"], &["value"]),
            ],
            first_write_wins_tables: vec!["contact_base".to_string()],
            identity_insert_tables: vec!["app_base".to_string(), "contact_base".to_string()],
            diagnostics_dir: PathBuf::from(DEFAULT_DIAGNOSTICS_DIR),
            diagnostic_sample_rows: DEFAULT_SAMPLE_ROWS,
        }
    }
}

impl LoaderConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::default().with_env_overrides()
    }

    /// Load a JSON config file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let _ = dotenvy::dotenv();
        let content = std::fs::read_to_string(path)?;
        let config: LoaderConfig = serde_json::from_str(&content)?;
        Ok(config.with_env_overrides())
    }

    /// Apply `XMLMIGRATE_*` variables on top of the current values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = env_usize("XMLMIGRATE_BATCH_SIZE") {
            self.batch_size = n;
        }
        if let Some(n) = env_usize("XMLMIGRATE_DIAGNOSTIC_SAMPLE_ROWS") {
            self.diagnostic_sample_rows = n;
        }
        if let Ok(dir) = env::var("XMLMIGRATE_DIAGNOSTICS_DIR") {
            if !dir.trim().is_empty() {
                self.diagnostics_dir = PathBuf::from(dir);
            }
        }
        if let Ok(schema) = env::var("XMLMIGRATE_TARGET_SCHEMA") {
            if !schema.trim().is_empty() {
                self.target_schema = Some(schema.trim().to_string());
            }
        }
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = dir.into();
        self
    }

    /// Effective sub-batch size (never zero).
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub fn forces_fallback(&self, table: &str) -> bool {
        self.force_fallback_tables.iter().any(|t| t == table)
    }

    pub fn key_value_table(&self, table: &str) -> Option<&KeyValueTable> {
        self.key_value_tables.iter().find(|t| t.table == table)
    }

    pub fn is_first_write_wins(&self, table: &str) -> bool {
        self.first_write_wins_tables.iter().any(|t| t == table)
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(n) => Some(n),
        Err(_) => {
            log_warning(format!("ignoring {}: '{}' is not a number", name, raw));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.batch_size, 500);
        assert!(config.is_first_write_wins("contact_base"));
        assert!(config.forces_fallback("app_historical_lookup"));
        let scores = config.key_value_table("scores").unwrap();
        assert_eq!(scores.key_columns, vec!["app_id", "score_identifier"]);
        assert_eq!(scores.value_columns, vec!["score"]);
        assert!(config.key_value_table("app_base").is_none());
    }

    #[test]
    fn test_from_file_with_partial_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "batch_size": 50, "first_write_wins_tables": [] }}"#).unwrap();

        let config = LoaderConfig::from_file(file.path()).unwrap();
        assert!(!config.is_first_write_wins("contact_base"));
        assert_eq!(config.key_value_tables.len(), 4);
    }

    #[test]
    fn test_batch_size_never_zero() {
        assert_eq!(LoaderConfig::default().with_batch_size(0).effective_batch_size(), 1);
    }
}
