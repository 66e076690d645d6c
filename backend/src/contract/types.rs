//! Target column data types and value coercion.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::models::SqlValue;

static TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z][a-z0-9]*)\s*(?:\(\s*(\d+|max)\s*(?:,\s*(\d+)\s*)?\))?$").expect("valid data type regex")
});

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];

/// Earliest value a SQL Server `datetime` column accepts.
static MIN_DATETIME: Lazy<NaiveDateTime> = Lazy::new(|| {
    NaiveDate::from_ymd_opt(1753, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
});

/// Target column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    /// Character data, optionally with a declared length (`varchar(50)`).
    Text { length: Option<usize> },
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    /// `scale` is `None` for a bare `decimal`, which is never rounded.
    Decimal { precision: u32, scale: Option<u32> },
    DateTime,
    Bit,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Text { length: None }
    }
}

impl DataType {
    pub fn parse(text: &str) -> Result<Self, String> {
        let lowered = text.trim().to_ascii_lowercase();
        let caps = TYPE_RE
            .captures(&lowered)
            .ok_or_else(|| format!("unknown data type '{}'", text))?;
        let first = caps.get(2).map(|m| m.as_str());
        let second = caps.get(3).map(|m| m.as_str());
        let number = |s: &str| s.parse::<u32>().map_err(|_| format!("invalid size in data type '{}'", text));

        match &caps[1] {
            "string" | "varchar" | "nvarchar" | "char" | "nchar" | "text" => {
                let length = match first {
                    None | Some("max") => None,
                    Some(n) => Some(number(n)? as usize),
                };
                Ok(Self::Text { length })
            }
            "tinyint" if first.is_none() => Ok(Self::TinyInt),
            "smallint" if first.is_none() => Ok(Self::SmallInt),
            "int" | "integer" if first.is_none() => Ok(Self::Int),
            "bigint" if first.is_none() => Ok(Self::BigInt),
            "decimal" | "numeric" | "money" => match (first, second) {
                (None, _) => Ok(Self::Decimal { precision: 18, scale: None }),
                (Some(p), s) => Ok(Self::Decimal {
                    precision: number(p)?,
                    scale: Some(s.map(number).transpose()?.unwrap_or(0)),
                }),
            },
            "datetime" | "datetime2" | "date" | "smalldatetime" if first.is_none() => Ok(Self::DateTime),
            "bit" | "boolean" if first.is_none() => Ok(Self::Bit),
            _ => Err(format!("unknown data type '{}'", text)),
        }
    }

    fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            Self::TinyInt => Some((0, 255)),
            Self::SmallInt => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::BigInt => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Convert a value to this type.
    ///
    /// `max_length` bounds text columns in characters; a cut value loses any
    /// trailing whitespace left at the cut. Returns `None` when the
    /// value cannot be represented; null stays null.
    pub fn coerce(&self, value: SqlValue, max_length: Option<usize>) -> Option<SqlValue> {
        if value.is_null() {
            return Some(SqlValue::Null);
        }
        match self {
            Self::Text { length } => {
                let text = value.to_string();
                Some(SqlValue::String(match max_length.or(*length) {
                    Some(limit) if text.chars().count() > limit => {
                        let cut: String = text.chars().take(limit).collect();
                        cut.trim_end().to_string()
                    }
                    _ => text,
                }))
            }
            Self::TinyInt | Self::SmallInt | Self::Int | Self::BigInt => {
                let (min, max) = self.integer_range()?;
                let n = to_integer(&value)?;
                (min..=max).contains(&n).then_some(SqlValue::Int(n))
            }
            Self::Decimal { scale, .. } => {
                let d = to_decimal(&value)?;
                let d = match scale {
                    Some(s) => d.round_dp_with_strategy(*s, RoundingStrategy::MidpointAwayFromZero),
                    None => d,
                };
                Some(SqlValue::Decimal(d))
            }
            Self::DateTime => match value {
                SqlValue::DateTime(dt) => Some(SqlValue::DateTime(dt)),
                SqlValue::String(s) => parse_datetime(&s).map(SqlValue::DateTime),
                _ => None,
            },
            Self::Bit => to_bit(&value).map(SqlValue::Bit),
        }
    }
}

fn to_integer(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Int(i) => Some(*i),
        SqlValue::Decimal(d) => d.trunc().to_i64(),
        SqlValue::Bit(b) => Some(*b as i64),
        SqlValue::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<i64>()
                .ok()
                .or_else(|| Decimal::from_str(s).ok().and_then(|d| d.trunc().to_i64()))
        }
        SqlValue::Null | SqlValue::DateTime(_) => None,
    }
}

fn to_decimal(value: &SqlValue) -> Option<Decimal> {
    match value {
        SqlValue::Int(i) => Some(Decimal::from(*i)),
        SqlValue::Decimal(d) => Some(*d),
        SqlValue::Bit(b) => Some(Decimal::from(*b as i64)),
        SqlValue::String(s) => {
            let s = s.trim();
            Decimal::from_str(s)
                .ok()
                .or_else(|| Decimal::from_scientific(s).ok())
                .or_else(|| {
                    let cleaned: String = s.chars().filter(|c| *c != ',' && *c != '$').collect();
                    Decimal::from_str(&cleaned).ok()
                })
        }
        SqlValue::Null | SqlValue::DateTime(_) => None,
    }
}

fn to_bit(value: &SqlValue) -> Option<bool> {
    match value {
        SqlValue::Bit(b) => Some(*b),
        SqlValue::Int(i) => Some(*i != 0),
        SqlValue::Decimal(d) => Some(!d.is_zero()),
        SqlValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "y" | "yes" | "true" | "t" => Some(true),
            "0" | "n" | "no" | "false" | "f" => Some(false),
            _ => None,
        },
        SqlValue::Null | SqlValue::DateTime(_) => None,
    }
}

/// Parse the datetime layouts found in the legacy XML.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    let parsed = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    (parsed >= *MIN_DATETIME).then_some(parsed)
}

impl TryFrom<String> for DataType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DataType> for String {
    fn from(dt: DataType) -> Self {
        dt.to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { length: Some(n) } => write!(f, "varchar({})", n),
            Self::Text { length: None } => f.write_str("string"),
            Self::TinyInt => f.write_str("tinyint"),
            Self::SmallInt => f.write_str("smallint"),
            Self::Int => f.write_str("int"),
            Self::BigInt => f.write_str("bigint"),
            Self::Decimal { precision, scale: Some(s) } => write!(f, "decimal({},{})", precision, s),
            Self::Decimal { scale: None, .. } => f.write_str("decimal"),
            Self::DateTime => f.write_str("datetime"),
            Self::Bit => f.write_str("bit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_types() {
        assert_eq!(DataType::parse("string").unwrap(), DataType::Text { length: None });
        assert_eq!(DataType::parse("VARCHAR(50)").unwrap(), DataType::Text { length: Some(50) });
        assert_eq!(
            DataType::parse("decimal(12,2)").unwrap(),
            DataType::Decimal { precision: 12, scale: Some(2) }
        );
        assert_eq!(
            DataType::parse("decimal(5)").unwrap(),
            DataType::Decimal { precision: 5, scale: Some(0) }
        );
        assert_eq!(DataType::parse("tinyint").unwrap(), DataType::TinyInt);
        assert!(DataType::parse("geography").is_err());
        assert!(DataType::parse("int(4)").is_err());
    }

    #[test]
    fn test_text_truncates_by_characters() {
        let value = SqlValue::from("10.20.135.83 - overflow address should truncate");
        let out = DataType::default().coerce(value, Some(15)).unwrap();
        assert_eq!(out, SqlValue::from("10.20.135.83 -"));

        let accented = DataType::Text { length: Some(3) }.coerce(SqlValue::from("Éléonore"), None);
        assert_eq!(accented, Some(SqlValue::from("Élé")));
    }

    #[test]
    fn test_integer_ranges() {
        assert_eq!(DataType::TinyInt.coerce(SqlValue::from("255"), None), Some(SqlValue::Int(255)));
        assert_eq!(DataType::TinyInt.coerce(SqlValue::from("256"), None), None);
        assert_eq!(DataType::SmallInt.coerce(SqlValue::from(" 42 "), None), Some(SqlValue::Int(42)));
        assert_eq!(DataType::Int.coerce(SqlValue::from("12.9"), None), Some(SqlValue::Int(12)));
        assert_eq!(DataType::Int.coerce(SqlValue::from("abc"), None), None);
    }

    #[test]
    fn test_decimal_rounding() {
        let dt = DataType::parse("decimal(10,2)").unwrap();
        assert_eq!(
            dt.coerce(SqlValue::from("1234.565"), None),
            Some(SqlValue::Decimal(Decimal::new(123457, 2)))
        );
        assert_eq!(
            dt.coerce(SqlValue::from("$1,200.5"), None),
            Some(SqlValue::Decimal(Decimal::new(120050, 2)))
        );
    }

    #[test]
    fn test_datetime_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 4, 5).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(parse_datetime("2023-04-05"), Some(expected));
        assert_eq!(parse_datetime("04/05/2023"), Some(expected));
        assert!(parse_datetime("2023-04-05T13:45:00").is_some());
        assert_eq!(parse_datetime("1700-01-01"), None);
        assert_eq!(parse_datetime("not a date"), None);
    }

    #[test]
    fn test_bit() {
        assert_eq!(DataType::Bit.coerce(SqlValue::from("Y"), None), Some(SqlValue::Bit(true)));
        assert_eq!(DataType::Bit.coerce(SqlValue::Int(0), None), Some(SqlValue::Bit(false)));
        assert_eq!(DataType::Bit.coerce(SqlValue::from("maybe"), None), None);
    }
}
