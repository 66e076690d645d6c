//! Domain models shared by the transformation and load stages.
//!
//! - [`SqlValue`] - a typed, nullable column value
//! - [`ResolvedRecord`] - one row destined for one target table
//! - [`KeyValueRow`] - output of a row-creating mapping (scores, indicators, ...)

use std::fmt;

use chrono::NaiveDateTime;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::contract::RowVerb;

/// Format used when rendering datetimes as text.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// SqlValue
// =============================================================================

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Decimal(Decimal),
    String(String),
    DateTime(NaiveDateTime),
    Bit(bool),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Null, or a string that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            SqlValue::Null => true,
            SqlValue::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// String form of the value, `None` for null.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Null => None,
            SqlValue::Int(i) => Some(*i as f64),
            SqlValue::Decimal(d) => d.to_f64(),
            SqlValue::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            SqlValue::DateTime(_) => None,
            SqlValue::Bit(b) => Some(if *b { 1.0 } else { 0.0 }),
        }
    }

    /// Convert a JSON value (contract defaults, document dumps) into a value.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bit(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    n.as_f64()
                        .and_then(Decimal::from_f64)
                        .map(|d| SqlValue::Decimal(d.normalize()))
                        .unwrap_or(SqlValue::Null)
                }
            }
            Value::String(s) => SqlValue::String(s.clone()),
            other => SqlValue::String(other.to_string()),
        }
    }

    /// Convert into a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Int(i) => Value::from(*i),
            SqlValue::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(d.to_string())),
            SqlValue::String(s) => Value::String(s.clone()),
            SqlValue::DateTime(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
            SqlValue::Bit(b) => Value::Bool(*b),
        }
    }

    /// Render as a T-SQL literal (used by script output only, never for execution).
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::String(s) => format!("N'{}'", s.replace('\'', "''")),
            SqlValue::DateTime(dt) => format!("'{}'", dt.format(DATETIME_FORMAT)),
            SqlValue::Bit(b) => if *b { "1" } else { "0" }.to_string(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Decimal(d) => write!(f, "{}", d),
            SqlValue::String(s) => f.write_str(s),
            SqlValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            SqlValue::Bit(b) => f.write_str(if *b { "1" } else { "0" }),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::String(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::String(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Int(i)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(s: Option<String>) -> Self {
        s.map(SqlValue::String).unwrap_or(SqlValue::Null)
    }
}

// =============================================================================
// ResolvedRecord
// =============================================================================

/// Column values for one target table and one source entity.
///
/// Columns keep the order in which they were first set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRecord {
    pub table: String,
    #[serde(serialize_with = "serialize_columns")]
    columns: Vec<(String, SqlValue)>,
}

fn serialize_columns<S: Serializer>(columns: &[(String, SqlValue)], serializer: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(columns.len()))?;
    for (name, value) in columns {
        map.serialize_entry(name, value)?;
    }
    map.end()
}

impl ResolvedRecord {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    /// Set a column, replacing an earlier value for the same column.
    pub fn set(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: SqlValue) -> Self {
        self.set(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|(name, _)| name == column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// =============================================================================
// KeyValueRow
// =============================================================================

/// A row produced by a row-creating mapping type.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValueRow {
    pub table: String,
    pub verb: RowVerb,
    /// Semantic key of the row (score identifier, indicator name, ...).
    pub key: String,
    pub value: SqlValue,
}

impl KeyValueRow {
    /// Build the record for this row, prefixed with the owning entity's keys.
    pub fn into_record(self, parent_keys: &[(String, SqlValue)]) -> ResolvedRecord {
        let mut record = ResolvedRecord::new(self.table);
        for (column, value) in parent_keys {
            record.set(column.clone(), value.clone());
        }
        record.set(self.verb.key_column(), SqlValue::String(self.key));
        record.set(self.verb.value_column(), self.value);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_forms() {
        assert_eq!(SqlValue::Int(42).to_string(), "42");
        assert_eq!(SqlValue::Bit(true).to_string(), "1");
        assert_eq!(SqlValue::from("abc").to_string(), "abc");
        assert_eq!(SqlValue::Null.as_text(), None);
    }

    #[test]
    fn test_from_json() {
        assert_eq!(SqlValue::from_json(&json!(5)), SqlValue::Int(5));
        assert_eq!(SqlValue::from_json(&json!("N")), SqlValue::from("N"));
        assert_eq!(SqlValue::from_json(&json!(null)), SqlValue::Null);
        assert_eq!(SqlValue::from_json(&json!(true)), SqlValue::Bit(true));
    }

    #[test]
    fn test_sql_literal_escapes_quotes() {
        assert_eq!(SqlValue::from("O'Brien").to_sql_literal(), "N'O''Brien'");
        assert_eq!(SqlValue::Null.to_sql_literal(), "NULL");
    }

    #[test]
    fn test_record_keeps_first_seen_order() {
        let mut record = ResolvedRecord::new("app_base");
        record.set("app_id", SqlValue::Int(1));
        record.set("status", SqlValue::from("A"));
        record.set("app_id", SqlValue::Int(2));

        let columns: Vec<&str> = record.columns().collect();
        assert_eq!(columns, vec!["app_id", "status"]);
        assert_eq!(record.get("app_id"), Some(&SqlValue::Int(2)));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["columns"]["status"], "A");
    }

    #[test]
    fn test_key_value_row_into_record() {
        let row = KeyValueRow {
            table: "scores".into(),
            verb: RowVerb::Score,
            key: "V4P".into(),
            value: SqlValue::Int(712),
        };
        let record = row.into_record(&[("app_id".into(), SqlValue::Int(9))]);
        assert_eq!(record.get("app_id"), Some(&SqlValue::Int(9)));
        assert_eq!(record.get("score_identifier"), Some(&SqlValue::from("V4P")));
        assert_eq!(record.get("score"), Some(&SqlValue::Int(712)));
    }
}
