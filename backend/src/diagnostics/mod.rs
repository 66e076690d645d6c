//! Load diagnostics - durable records of failed batches
//!
//! Every load failure is written to disk as one JSON file holding the
//! failing statement, a bounded sample of its parameter rows and the
//! classified error, so it can be inspected without reproducing the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::DEFAULT_DIAGNOSTICS_DIR;
use crate::error::{LoadError, LoadErrorKind};
use crate::models::SqlValue;

/// One failed load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadDiagnostic {
    /// Unique identifier
    pub id: String,
    pub table: String,
    /// Failing SQL text
    pub statement: String,
    /// Column order of the parameter rows
    #[serde(default)]
    pub columns: Vec<String>,
    /// Leading parameter rows (or the failing row)
    pub sample_params: Vec<Vec<Value>>,
    /// Index of the failing row within the batch, if known
    #[serde(default)]
    pub row: Option<usize>,
    pub error_kind: LoadErrorKind,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

impl LoadDiagnostic {
    /// Build a diagnostic from a load error, keeping at most `sample_rows` rows.
    pub fn from_error(
        error: &LoadError,
        statement: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
        sample_rows: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table: error.table.clone(),
            statement: statement.to_string(),
            columns: columns.to_vec(),
            sample_params: rows
                .iter()
                .take(sample_rows)
                .map(|row| row.iter().map(SqlValue::to_json).collect())
                .collect(),
            row: error.row,
            error_kind: error.kind,
            error_message: error.message.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Directory-backed store of diagnostics
///
/// Nothing is kept in memory: every call reads or writes the directory, so
/// a long-running loader does not accumulate failures.
pub struct DiagnosticStore {
    /// Directory where diagnostics are stored
    dir: PathBuf,
}

impl DiagnosticStore {
    /// Store in the default directory
    pub fn new() -> Self {
        Self::with_dir(DEFAULT_DIAGNOSTICS_DIR)
    }

    /// Store in a custom directory
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: PathBuf::from(dir.as_ref()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        valid.then(|| self.dir.join(format!("{}.json", id)))
    }

    fn files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|e| e == "json"))
            .collect()
    }

    fn read(path: &Path) -> Option<LoadDiagnostic> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// All diagnostics, newest first
    pub fn list(&self) -> Vec<LoadDiagnostic> {
        let mut all: Vec<LoadDiagnostic> = self.files().iter().filter_map(|p| Self::read(p)).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Get a diagnostic by ID
    pub fn get(&self, id: &str) -> Option<LoadDiagnostic> {
        self.path_for(id).and_then(|path| Self::read(&path))
    }

    /// Persist a diagnostic and return its ID
    pub fn save(&self, diagnostic: LoadDiagnostic) -> Result<String, std::io::Error> {
        let path = self.path_for(&diagnostic.id).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid diagnostic id '{}'", diagnostic.id))
        })?;
        fs::create_dir_all(&self.dir)?;

        let content = serde_json::to_string_pretty(&diagnostic)?;
        fs::write(&path, content)?;
        Ok(diagnostic.id)
    }

    /// Delete a diagnostic
    pub fn delete(&self, id: &str) -> Result<(), String> {
        match self.path_for(id) {
            Some(path) if path.exists() => {
                fs::remove_file(&path).map_err(|e| format!("Failed to delete file: {}", e))
            }
            _ => Err(format!("Diagnostic not found: {}", id)),
        }
    }

    pub fn len(&self) -> usize {
        self.files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DiagnosticStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn diagnostic(sample_rows: usize) -> LoadDiagnostic {
        let error = LoadError::new(LoadErrorKind::ForeignKeyViolation, "contact_base", "FOREIGN KEY constraint").at_row(2);
        let rows = vec![
            vec![SqlValue::Int(1), SqlValue::from("A")],
            vec![SqlValue::Int(2), SqlValue::Null],
            vec![SqlValue::Int(3), SqlValue::from("C")],
        ];
        LoadDiagnostic::from_error(
            &error,
            "INSERT INTO [dbo].[contact_base] ([con_id], [first_name]) VALUES (?, ?)",
            &["con_id".to_string(), "first_name".to_string()],
            &rows,
            sample_rows,
        )
    }

    #[test]
    fn test_sample_is_bounded() {
        let d = diagnostic(2);
        assert_eq!(d.sample_params.len(), 2);
        assert_eq!(d.sample_params[1], vec![Value::from(2), Value::Null]);
        assert_eq!(d.row, Some(2));
        assert_eq!(d.error_kind, LoadErrorKind::ForeignKeyViolation);
    }

    #[test]
    fn test_save_reload_delete() {
        let dir = tempdir().unwrap();
        let store = DiagnosticStore::with_dir(dir.path());
        assert!(store.is_empty());

        let id = store.save(diagnostic(5)).unwrap();
        assert!(dir.path().join(format!("{}.json", id)).exists());

        let reopened = DiagnosticStore::with_dir(dir.path());
        let loaded = reopened.get(&id).unwrap();
        assert_eq!(loaded.table, "contact_base");
        assert_eq!(loaded.sample_params.len(), 3);
        assert_eq!(reopened.list().len(), 1);

        store.delete(&id).unwrap();
        assert!(store.get(&id).is_none());
        assert!(store.delete(&id).is_err());
    }

    #[test]
    fn test_store_reads_directory_on_demand() {
        let dir = tempdir().unwrap();
        let reader = DiagnosticStore::with_dir(dir.path());
        let writer = DiagnosticStore::with_dir(dir.path());

        let id = writer.save(diagnostic(1)).unwrap();
        // saved by another handle after the reader was opened
        assert_eq!(reader.len(), 1);
        assert_eq!(reader.get(&id).map(|d| d.id), Some(id.clone()));

        fs::remove_file(dir.path().join(format!("{}.json", id))).unwrap();
        assert!(reader.list().is_empty());
        assert!(reader.get(&id).is_none());
        assert!(reader.get("../escape").is_none());
    }
}
