//! In-memory cursor for loader tests.
//!
//! Understands exactly the statements the loader generates, enforces
//! primary keys and identity-insert mode, and can simulate driver failures.

use std::collections::{HashMap, HashSet};

use crate::load::cursor::{Cursor, DbError};
use crate::models::SqlValue;

type Row = Vec<(String, SqlValue)>;

#[derive(Debug, Default)]
pub(crate) struct MemoryCursor {
    /// Rows per qualified table.
    pub tables: HashMap<String, Vec<Row>>,
    primary_keys: HashMap<String, Vec<String>>,
    identity_columns: HashMap<String, String>,
    identity_on: HashSet<String>,
    /// Every statement received, in order.
    pub log: Vec<String>,
    pub execute_many_calls: usize,
    fast: bool,
    /// Error returned by every `execute_many` call.
    pub fail_execute_many: Option<DbError>,
    /// Rows holding this value fail with the given error.
    pub reject_value: Option<(SqlValue, DbError)>,
    pub fail_identity_off: bool,
}

pub(crate) fn cast_error() -> DbError {
    DbError::new("[22018] [Microsoft][ODBC Driver 18 for SQL Server]Invalid character value for cast specification (0)")
}

impl MemoryCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary_key(mut self, table: &str, columns: &[&str]) -> Self {
        self.primary_keys
            .insert(table.to_string(), columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_identity(mut self, table: &str, column: &str) -> Self {
        self.identity_columns.insert(table.to_string(), column.to_string());
        self
    }

    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn value(row: &Row, column: &str) -> SqlValue {
        row.iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.clone())
            .unwrap_or(SqlValue::Null)
    }

    fn check_insert(&self, table: &str, row: &Row, pending: &[Row]) -> Result<(), DbError> {
        if let Some((bad, error)) = &self.reject_value {
            if row.iter().any(|(_, v)| v == bad) {
                return Err(error.clone());
            }
        }
        if let Some(identity) = self.identity_columns.get(table) {
            if row.iter().any(|(c, _)| c == identity) && !self.identity_on.contains(table) {
                return Err(DbError::new(format!(
                    "Cannot insert explicit value for identity column in table '{}' when IDENTITY_INSERT is set to OFF.",
                    table
                ))
                .with_code(544));
            }
        }
        if let Some(pk) = self.primary_keys.get(table) {
            let key: Vec<SqlValue> = pk.iter().map(|c| Self::value(row, c)).collect();
            let clash = self
                .rows(table)
                .iter()
                .chain(pending.iter())
                .any(|existing| pk.iter().map(|c| Self::value(existing, c)).collect::<Vec<_>>() == key);
            if clash {
                return Err(DbError::new(format!(
                    "Violation of PRIMARY KEY constraint 'PK_{0}'. Cannot insert duplicate key in object '{0}'.",
                    table
                ))
                .with_code(2627));
            }
        }
        Ok(())
    }

    fn insert(&mut self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<u64, DbError> {
        let (table, columns) = parse_insert(sql)?;
        let mut pending: Vec<Row> = Vec::new();
        for values in rows {
            let row: Row = columns.iter().cloned().zip(values.iter().cloned()).collect();
            self.check_insert(&table, &row, &pending)?;
            pending.push(row);
        }
        let count = pending.len() as u64;
        self.tables.entry(table).or_default().extend(pending);
        Ok(count)
    }

    fn update(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let rest = sql.strip_prefix("UPDATE ").ok_or_else(|| DbError::new("bad update"))?;
        let (table, rest) = rest.split_once(" SET ").ok_or_else(|| DbError::new("bad update"))?;
        let (assignments, predicates) = rest.split_once(" WHERE ").ok_or_else(|| DbError::new("bad update"))?;

        let mut params = params.iter().cloned();
        let sets: Vec<(String, SqlValue)> = assignments
            .split(", ")
            .map(|a| (unquote(a.trim_end_matches(" = ?")), params.next().unwrap_or(SqlValue::Null)))
            .collect();
        let filters: Vec<(String, SqlValue)> = predicates
            .split(" AND ")
            .map(|p| match p.strip_suffix(" IS NULL") {
                Some(column) => (unquote(column), SqlValue::Null),
                None => (unquote(p.trim_end_matches(" = ?")), params.next().unwrap_or(SqlValue::Null)),
            })
            .collect();

        let mut affected = 0;
        if let Some(rows) = self.tables.get_mut(table) {
            for row in rows.iter_mut() {
                if filters.iter().all(|(c, v)| Self::value(row, c) == *v) {
                    for (column, value) in &sets {
                        match row.iter_mut().find(|(c, _)| c == column) {
                            Some(slot) => slot.1 = value.clone(),
                            None => row.push((column.clone(), value.clone())),
                        }
                    }
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }
}

impl Cursor for MemoryCursor {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        self.log.push(sql.to_string());
        if let Some(rest) = sql.strip_prefix("SET IDENTITY_INSERT ") {
            let (table, mode) = rest.rsplit_once(' ').ok_or_else(|| DbError::new("bad identity statement"))?;
            if mode == "ON" {
                self.identity_on.insert(table.to_string());
            } else {
                if self.fail_identity_off {
                    return Err(DbError::new("Communication link failure"));
                }
                self.identity_on.remove(table);
            }
            return Ok(0);
        }
        if sql.starts_with("UPDATE ") {
            return self.update(sql, params);
        }
        self.insert(sql, &[params.to_vec()])
    }

    fn execute_many(&mut self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<(), DbError> {
        self.log.push(sql.to_string());
        self.execute_many_calls += 1;
        if let Some(error) = &self.fail_execute_many {
            if self.fast {
                return Err(error.clone());
            }
        }
        self.insert(sql, rows).map(|_| ())
    }

    fn set_fast_executemany(&mut self, enabled: bool) {
        self.fast = enabled;
    }
}

fn unquote(ident: &str) -> String {
    ident.trim().trim_start_matches('[').trim_end_matches(']').to_string()
}

fn parse_insert(sql: &str) -> Result<(String, Vec<String>), DbError> {
    let rest = sql
        .strip_prefix("INSERT INTO ")
        .ok_or_else(|| DbError::new(format!("unsupported statement: {}", sql)))?;
    let (table, rest) = rest.split_once(" (").ok_or_else(|| DbError::new("bad insert"))?;
    let (columns, _) = rest.split_once(") VALUES").ok_or_else(|| DbError::new("bad insert"))?;
    Ok((table.to_string(), columns.split(", ").map(unquote).collect()))
}
