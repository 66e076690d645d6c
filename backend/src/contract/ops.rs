//! Mapping-type tokens.
//!
//! The contract writes each operation as a string (`"enum"`,
//! `"add_score(V4P)"`); they are parsed into [`MappingOp`] when the
//! contract is loaded, so an unknown token is a load error.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z_]+)\s*(?:\(\s*([^()]*?)\s*\))?$").expect("valid mapping token regex")
});

/// Contact role used by the contact-fallback operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactRole {
    Primary,
    Secondary,
}

/// Kind of row a row-creating operation appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowVerb {
    Score,
    Indicator,
    History,
    ReportLookup,
}

impl RowVerb {
    pub fn token(&self) -> &'static str {
        match self {
            Self::Score => "add_score",
            Self::Indicator => "add_indicator",
            Self::History => "add_history",
            Self::ReportLookup => "add_report_lookup",
        }
    }

    /// Column holding the row's semantic key.
    pub fn key_column(&self) -> &'static str {
        match self {
            Self::Score => "score_identifier",
            Self::Indicator => "indicator",
            Self::History | Self::ReportLookup => "name",
        }
    }

    /// Column holding the row's value.
    pub fn value_column(&self) -> &'static str {
        match self {
            Self::Score => "score",
            Self::Indicator | Self::History | Self::ReportLookup => "value",
        }
    }
}

/// One step of a field's mapping-type chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MappingOp {
    /// Look the value up in the field's enum table.
    Enum,
    /// Map Y/N style characters to a bit.
    CharToBit,
    /// Map true/false style words to a bit.
    BooleanToBit,
    /// Keep only digits (`numbers_only` is an alias).
    ExtractNumeric,
    /// Evaluate the field's expression.
    CalculatedField,
    /// Take the value from the last primary contact that has one.
    LastValidPrimaryContact,
    /// Take the value from the last secondary contact that has one.
    LastValidSecondaryContact,
    AddScore { identifier: String },
    AddIndicator { name: String },
    AddHistory { name: Option<String> },
    AddReportLookup { name: Option<String> },
}

impl MappingOp {
    /// Parse a single token such as `enum` or `add_score(V4P)`.
    pub fn parse(token: &str) -> Result<Self, String> {
        let token = token.trim();
        let caps = TOKEN_RE
            .captures(token)
            .ok_or_else(|| format!("malformed mapping type '{}'", token))?;
        let verb = &caps[1];
        let param = caps.get(2).map(|m| m.as_str().to_string()).filter(|p| !p.is_empty());

        let no_param = |op: MappingOp| match &param {
            Some(p) => Err(format!("mapping type '{}' takes no parameter (got '{}')", verb, p)),
            None => Ok(op),
        };
        let need_param = |what: &str| {
            param
                .clone()
                .ok_or_else(|| format!("mapping type '{}' requires a {} parameter", verb, what))
        };

        match verb {
            "enum" => no_param(Self::Enum),
            "char_to_bit" => no_param(Self::CharToBit),
            "boolean_to_bit" => no_param(Self::BooleanToBit),
            "extract_numeric" | "numbers_only" => no_param(Self::ExtractNumeric),
            "calculated_field" => no_param(Self::CalculatedField),
            "last_valid_pr_contact" => no_param(Self::LastValidPrimaryContact),
            "last_valid_sec_contact" => no_param(Self::LastValidSecondaryContact),
            "add_score" => Ok(Self::AddScore { identifier: need_param("score identifier")? }),
            "add_indicator" => Ok(Self::AddIndicator { name: need_param("indicator name")? }),
            "add_history" => Ok(Self::AddHistory { name: param.clone() }),
            "add_report_lookup" => Ok(Self::AddReportLookup { name: param.clone() }),
            other => Err(format!("unknown mapping type '{}'", other)),
        }
    }

    /// Row verb and key parameter, for row-creating operations.
    pub fn row_verb(&self) -> Option<(RowVerb, Option<&str>)> {
        match self {
            Self::AddScore { identifier } => Some((RowVerb::Score, Some(identifier.as_str()))),
            Self::AddIndicator { name } => Some((RowVerb::Indicator, Some(name.as_str()))),
            Self::AddHistory { name } => Some((RowVerb::History, name.as_deref())),
            Self::AddReportLookup { name } => Some((RowVerb::ReportLookup, name.as_deref())),
            _ => None,
        }
    }

    pub fn is_row_creating(&self) -> bool {
        self.row_verb().is_some()
    }

    pub fn contact_role(&self) -> Option<ContactRole> {
        match self {
            Self::LastValidPrimaryContact => Some(ContactRole::Primary),
            Self::LastValidSecondaryContact => Some(ContactRole::Secondary),
            _ => None,
        }
    }
}

impl TryFrom<String> for MappingOp {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MappingOp> for String {
    fn from(op: MappingOp) -> Self {
        op.to_string()
    }
}

impl fmt::Display for MappingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enum => f.write_str("enum"),
            Self::CharToBit => f.write_str("char_to_bit"),
            Self::BooleanToBit => f.write_str("boolean_to_bit"),
            Self::ExtractNumeric => f.write_str("extract_numeric"),
            Self::CalculatedField => f.write_str("calculated_field"),
            Self::LastValidPrimaryContact => f.write_str("last_valid_pr_contact"),
            Self::LastValidSecondaryContact => f.write_str("last_valid_sec_contact"),
            Self::AddScore { identifier } => write!(f, "add_score({})", identifier),
            Self::AddIndicator { name } => write!(f, "add_indicator({})", name),
            Self::AddHistory { name: Some(n) } => write!(f, "add_history({})", n),
            Self::AddHistory { name: None } => f.write_str("add_history"),
            Self::AddReportLookup { name: Some(n) } => write!(f, "add_report_lookup({})", n),
            Self::AddReportLookup { name: None } => f.write_str("add_report_lookup"),
        }
    }
}
