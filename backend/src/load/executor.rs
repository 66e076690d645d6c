//! Bulk load executor.
//!
//! # Strategy
//!
//! ```text
//! batch ──▶ sub-batches of `batch_size`
//!             │
//!             ├─ fast path: one execute_many per sub-batch
//!             │     └─ type coercion / duplicate key on upsert tables ─┐
//!             │                                                        ▼
//!             └─ fallback: one execute per row ◀────────────────────────┘
//!                   ├─ duplicate on key-value table  → compensating UPDATE
//!                   ├─ duplicate on first-write-wins → logged skip
//!                   └─ anything else                 → diagnostic + error
//! ```
//!
//! Single-row sub-batches and forced-fallback tables go straight to the
//! fallback path. With `identity_insert` set the whole load is bracketed by
//! `SET IDENTITY_INSERT ... ON/OFF`; OFF is attempted on every exit path.

use crate::config::{KeyValueTable, LoaderConfig};
use crate::diagnostics::{DiagnosticStore, LoadDiagnostic};
use crate::error::{LoadError, LoadErrorKind, LoadResult};
use crate::load::classify::classify;
use crate::load::cursor::Cursor;
use crate::load::sql::{identity_insert_sql, update_sql, InsertStatement, StatementCache};
use crate::logs::{log_info, log_table_error, log_table_warning};
use crate::models::SqlValue;
use crate::transform::grouper::InsertBatch;

/// Loads insert batches through a [`Cursor`].
///
/// Holds the statement cache, so one loader should be reused across
/// batches. Not meant to be shared between threads using one cursor.
pub struct BulkLoader {
    config: LoaderConfig,
    cache: StatementCache,
    diagnostics: Option<DiagnosticStore>,
}

impl BulkLoader {
    /// Loader without diagnostics persistence.
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            cache: StatementCache::new(),
            diagnostics: None,
        }
    }

    /// Loader persisting diagnostics under `config.diagnostics_dir`.
    pub fn from_config(config: LoaderConfig) -> Self {
        let store = DiagnosticStore::with_dir(&config.diagnostics_dir);
        Self::new(config).with_diagnostics(store)
    }

    pub fn with_diagnostics(mut self, store: DiagnosticStore) -> Self {
        self.diagnostics = Some(store);
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn cache(&self) -> &StatementCache {
        &self.cache
    }

    pub fn diagnostics(&self) -> Option<&DiagnosticStore> {
        self.diagnostics.as_ref()
    }

    /// Load one batch, returning the number of rows inserted or updated.
    pub fn load<C: Cursor + ?Sized>(&mut self, cursor: &mut C, batch: &InsertBatch) -> LoadResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let columns = batch.columns();
        let statement = self.cache.insert_statement(&batch.qualified_table, &columns);
        let rows: Vec<Vec<SqlValue>> = batch
            .records
            .iter()
            .map(|record| {
                statement
                    .columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(SqlValue::Null))
                    .collect()
            })
            .collect();

        if batch.identity_insert {
            let sql = identity_insert_sql(&batch.qualified_table, true);
            if let Err(e) = cursor.execute(&sql, &[]) {
                let error = LoadError::new(classify(&e), &batch.table, e.message);
                self.record_failure(&error, &sql, &[], &[]);
                return Err(error);
            }
        }

        let result = self.load_rows(cursor, batch, &statement, &rows);

        let result = if batch.identity_insert {
            let sql = identity_insert_sql(&batch.qualified_table, false);
            match (result, cursor.execute(&sql, &[])) {
                (result, Ok(_)) => result,
                (Ok(_), Err(e)) => {
                    let error = LoadError::new(
                        LoadErrorKind::System,
                        &batch.table,
                        format!("failed to disable IDENTITY_INSERT: {}", e.message),
                    );
                    self.record_failure(&error, &sql, &[], &[]);
                    Err(error)
                }
                (Err(original), Err(e)) => {
                    log_table_error(&batch.table, format!("failed to disable IDENTITY_INSERT after error: {}", e));
                    Err(original)
                }
            }
        } else {
            result
        };

        let applied = result?.min(batch.len());
        log_info(format!("{}: {}/{} rows applied", batch.qualified_table, applied, batch.len()));
        Ok(applied)
    }

    fn load_rows<C: Cursor + ?Sized>(
        &mut self,
        cursor: &mut C,
        batch: &InsertBatch,
        statement: &InsertStatement,
        rows: &[Vec<SqlValue>],
    ) -> LoadResult<usize> {
        let table = batch.table.as_str();
        let size = self.config.effective_batch_size();
        let forced = self.config.forces_fallback(table);
        let mut applied = 0;

        for (n, chunk) in rows.chunks(size).enumerate() {
            let offset = n * size;

            if chunk.len() > 1 && !forced {
                cursor.set_fast_executemany(true);
                match cursor.execute_many(&statement.sql, chunk) {
                    Ok(()) => {
                        applied += chunk.len();
                        continue;
                    }
                    Err(e) => {
                        let kind = classify(&e);
                        if !self.falls_back_on(kind, table) {
                            let error = LoadError::new(kind, table, e.message);
                            self.record_failure(&error, &statement.sql, &statement.columns, chunk);
                            return Err(error);
                        }
                        log_table_warning(
                            table,
                            format!("fast path failed ({}), retrying {} rows one by one", kind, chunk.len()),
                        );
                    }
                }
            }

            cursor.set_fast_executemany(false);
            applied += self.insert_each(cursor, batch, statement, chunk, offset)?;
        }

        Ok(applied)
    }

    /// Whether a fast-path failure of this kind is retried row by row.
    fn falls_back_on(&self, kind: LoadErrorKind, table: &str) -> bool {
        match kind {
            LoadErrorKind::TypeCoercion => true,
            LoadErrorKind::PrimaryKeyViolation => {
                self.config.key_value_table(table).is_some() || self.config.is_first_write_wins(table)
            }
            _ => false,
        }
    }

    fn insert_each<C: Cursor + ?Sized>(
        &mut self,
        cursor: &mut C,
        batch: &InsertBatch,
        statement: &InsertStatement,
        chunk: &[Vec<SqlValue>],
        offset: usize,
    ) -> LoadResult<usize> {
        let table = batch.table.as_str();
        let mut applied = 0;

        for (i, row) in chunk.iter().enumerate() {
            let e = match cursor.execute(&statement.sql, row) {
                Ok(_) => {
                    applied += 1;
                    continue;
                }
                Err(e) => e,
            };

            let kind = classify(&e);
            if kind == LoadErrorKind::PrimaryKeyViolation {
                if let Some(kv) = self.config.key_value_table(table).cloned() {
                    applied += self.upsert(cursor, batch, statement, &kv, row, offset + i)?;
                    continue;
                }
                if self.config.is_first_write_wins(table) {
                    log_table_warning(
                        table,
                        format!("row {} duplicates an existing key, first write kept", offset + i),
                    );
                    continue;
                }
            }

            let error = LoadError::new(kind, table, e.message).at_row(offset + i);
            self.record_failure(&error, &statement.sql, &statement.columns, std::slice::from_ref(row));
            return Err(error);
        }

        Ok(applied)
    }

    /// Turn a duplicate key-value insert into an update of its value columns.
    fn upsert<C: Cursor + ?Sized>(
        &mut self,
        cursor: &mut C,
        batch: &InsertBatch,
        statement: &InsertStatement,
        kv: &KeyValueTable,
        row: &[SqlValue],
        index: usize,
    ) -> LoadResult<usize> {
        let value_of = |column: &str| {
            statement
                .columns
                .iter()
                .position(|c| c == column)
                .map(|i| row[i].clone())
        };

        let values: Vec<(&str, SqlValue)> = kv
            .value_columns
            .iter()
            .filter_map(|c| value_of(c.as_str()).map(|v| (c.as_str(), v)))
            .collect();
        if values.is_empty() {
            log_table_warning(&batch.table, format!("row {} duplicates a key but carries no value column", index));
            return Ok(0);
        }
        let keys: Vec<(&str, SqlValue)> = kv
            .key_columns
            .iter()
            .map(|c| (c.as_str(), value_of(c.as_str()).unwrap_or(SqlValue::Null)))
            .collect();

        let (sql, params) = update_sql(&batch.qualified_table, &values, &keys);
        match cursor.execute(&sql, &params) {
            Ok(affected) => Ok(affected.min(1) as usize),
            Err(e) => {
                let error = LoadError::new(classify(&e), &batch.table, e.message).at_row(index);
                let columns: Vec<String> = values.iter().chain(keys.iter()).map(|(c, _)| c.to_string()).collect();
                self.record_failure(&error, &sql, &columns, &[params]);
                Err(error)
            }
        }
    }

    /// Log the failure and persist a diagnostic before the error is returned.
    fn record_failure(&self, error: &LoadError, sql: &str, columns: &[String], rows: &[Vec<SqlValue>]) {
        log_table_error(&error.table, error.to_string());
        let sample_rows = self.config.diagnostic_sample_rows;
        if let Some(store) = self.diagnostics.as_ref() {
            let diagnostic = LoadDiagnostic::from_error(error, sql, columns, rows, sample_rows);
            match store.save(diagnostic) {
                Ok(id) => log_table_warning(&error.table, format!("diagnostic saved as {}", id)),
                Err(e) => log_table_error(&error.table, format!("could not save diagnostic: {}", e)),
            }
        }
    }
}
