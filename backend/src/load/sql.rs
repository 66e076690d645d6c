//! SQL text generation and the insert statement cache.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::SqlValue;

/// Quote an identifier as `[name]`.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// `INSERT INTO [schema].[table] ([c1], [c2]) VALUES (?, ?)`
pub fn insert_sql(qualified_table: &str, columns: &[String]) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified_table,
        column_list.join(", "),
        placeholders
    )
}

/// `SET IDENTITY_INSERT [schema].[table] ON|OFF`
pub fn identity_insert_sql(qualified_table: &str, enabled: bool) -> String {
    format!(
        "SET IDENTITY_INSERT {} {}",
        qualified_table,
        if enabled { "ON" } else { "OFF" }
    )
}

/// Compensating update for a duplicate key-value row.
///
/// Returns the statement and its parameters: the value columns first, then
/// every non-null key. Null keys become `IS NULL` predicates.
pub fn update_sql(
    qualified_table: &str,
    values: &[(&str, SqlValue)],
    keys: &[(&str, SqlValue)],
) -> (String, Vec<SqlValue>) {
    let mut params = Vec::with_capacity(values.len() + keys.len());

    let assignments: Vec<String> = values
        .iter()
        .map(|(column, value)| {
            params.push(value.clone());
            format!("{} = ?", quote_ident(column))
        })
        .collect();

    let predicates: Vec<String> = keys
        .iter()
        .map(|(column, value)| {
            if value.is_null() {
                format!("{} IS NULL", quote_ident(column))
            } else {
                params.push(value.clone());
                format!("{} = ?", quote_ident(column))
            }
        })
        .collect();

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        qualified_table,
        assignments.join(", "),
        predicates.join(" AND ")
    );
    (sql, params)
}

/// A cached insert statement and the column order its placeholders follow.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub sql: String,
    pub columns: Vec<String>,
}

/// Insert statements cached by (qualified table, sorted columns).
#[derive(Debug, Default)]
pub struct StatementCache {
    entries: HashMap<(String, Vec<String>), Arc<InsertStatement>>,
    hits: u64,
    misses: u64,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert statement for this table and column set.
    ///
    /// A cached statement keeps the column order it was first built with;
    /// callers bind parameters in `InsertStatement::columns` order.
    pub fn insert_statement(&mut self, qualified_table: &str, columns: &[String]) -> Arc<InsertStatement> {
        let mut sorted = columns.to_vec();
        sorted.sort();
        let key = (qualified_table.to_string(), sorted);

        if let Some(statement) = self.entries.get(&key) {
            self.hits += 1;
            return Arc::clone(statement);
        }

        self.misses += 1;
        let statement = Arc::new(InsertStatement {
            sql: insert_sql(qualified_table, columns),
            columns: columns.to_vec(),
        });
        self.entries.insert(key, Arc::clone(&statement));
        statement
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
