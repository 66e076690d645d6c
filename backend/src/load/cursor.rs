//! Database cursor boundary.
//!
//! The connection layer lives outside this crate; the executor only needs
//! single and set-oriented execution plus the fast-executemany toggle.

use thiserror::Error;

use crate::models::SqlValue;

/// Error surfaced by a cursor.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct DbError {
    pub message: String,
    /// Native error number (SQL Server `msg` number), when available.
    pub code: Option<i32>,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }
}

/// A database cursor with `?` positional parameters.
pub trait Cursor {
    /// Execute one statement, returning the affected row count.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError>;

    /// Execute one statement for every parameter row as a single operation.
    fn execute_many(&mut self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<(), DbError>;

    /// Toggle the driver's set-oriented parameter binding.
    fn set_fast_executemany(&mut self, enabled: bool);
}

/// Dry-run cursor that renders statements into a T-SQL script.
#[derive(Debug, Default)]
pub struct ScriptCursor {
    statements: Vec<String>,
}

impl ScriptCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// The whole script, one statement per line.
    pub fn script(&self) -> String {
        let mut out = String::new();
        for statement in &self.statements {
            out.push_str(statement);
            out.push_str(";\n");
        }
        out
    }
}

impl Cursor for ScriptCursor {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        self.statements.push(render(sql, params)?);
        Ok(1)
    }

    fn execute_many(&mut self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<(), DbError> {
        for row in rows {
            self.statements.push(render(sql, row)?);
        }
        Ok(())
    }

    fn set_fast_executemany(&mut self, _enabled: bool) {}
}

/// Substitute `?` placeholders (outside brackets and quotes) with literals.
pub fn render(sql: &str, params: &[SqlValue]) -> Result<String, DbError> {
    let mut out = String::with_capacity(sql.len());
    let mut values = params.iter();
    let mut in_brackets = false;
    let mut in_quotes = false;

    for c in sql.chars() {
        match c {
            '[' if !in_quotes => in_brackets = true,
            ']' if !in_quotes => in_brackets = false,
            '\'' if !in_brackets => in_quotes = !in_quotes,
            '?' if !in_brackets && !in_quotes => {
                let value = values
                    .next()
                    .ok_or_else(|| DbError::new(format!("not enough parameters for: {}", sql)))?;
                out.push_str(&value.to_sql_literal());
                continue;
            }
            _ => {}
        }
        out.push(c);
    }

    if values.next().is_some() {
        return Err(DbError::new(format!("too many parameters for: {}", sql)));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_literals() {
        let sql = "INSERT INTO [dbo].[t?] ([a], [b]) VALUES (?, ?)";
        let rendered = render(sql, &[SqlValue::Int(1), SqlValue::from("it's")]).unwrap();
        assert_eq!(rendered, "INSERT INTO [dbo].[t?] ([a], [b]) VALUES (1, N'it''s')");
    }

    #[test]
    fn test_render_parameter_mismatch() {
        assert!(render("VALUES (?, ?)", &[SqlValue::Int(1)]).is_err());
        assert!(render("VALUES (?)", &[SqlValue::Int(1), SqlValue::Int(2)]).is_err());
    }

    #[test]
    fn test_script_cursor_collects_statements() {
        let mut cursor = ScriptCursor::new();
        cursor.execute("SET IDENTITY_INSERT [dbo].[t] ON", &[]).unwrap();
        cursor
            .execute_many("INSERT INTO [dbo].[t] ([a]) VALUES (?)", &[vec![SqlValue::Int(1)], vec![SqlValue::Null]])
            .unwrap();
        assert_eq!(cursor.statements().len(), 3);
        assert!(cursor.script().ends_with("VALUES (NULL);\n"));
    }
}
