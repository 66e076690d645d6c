//! Error types for the migration engine.
//!
//! Each layer owns one error type:
//!
//! - [`ContractError`] - mapping contract loading and validation
//! - [`ExpressionError`] - calculated-field expression parsing and evaluation
//! - [`TransformError`] - per-field and per-record transformation failures
//! - [`LoadError`] - bulk load failures, classified by [`LoadErrorKind`]
//! - [`PipelineError`] - top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::fmt;

use thiserror::Error;

// =============================================================================
// Contract Errors
// =============================================================================

/// Errors while loading or validating a mapping contract.
#[derive(Debug, Error)]
pub enum ContractError {
    /// Failed to read the contract file.
    #[error("Failed to read contract: {0}")]
    IoError(#[from] std::io::Error),

    /// The contract is not valid JSON or does not match the expected shape.
    #[error("Invalid contract JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The contract failed JSON Schema validation.
    #[error("Contract schema validation failed: {errors:?}")]
    SchemaError { errors: Vec<String> },

    /// An `enum` mapping refers to an enum table that does not exist.
    #[error("Mapping '{table}.{column}' refers to unknown enum '{enum_name}'")]
    MissingEnum {
        table: String,
        column: String,
        enum_name: String,
    },

    /// A `calculated_field` mapping has no expression.
    #[error("Mapping '{table}.{column}' uses calculated_field without an expression")]
    MissingExpression { table: String, column: String },

    /// A calculated-field expression does not compile.
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// A mapping is structurally inconsistent.
    #[error("Invalid mapping '{table}.{column}': {message}")]
    InvalidMapping {
        table: String,
        column: String,
        message: String,
    },
}

// =============================================================================
// Expression Errors
// =============================================================================

/// Why an expression was rejected or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionFault {
    /// A character outside the allowed set.
    DisallowedCharacter(char),
    /// A deny-listed identifier or dunder access.
    DisallowedToken(String),
    /// Malformed syntax.
    Syntax(String),
    /// Division or modulo by zero.
    DivisionByZero,
}

impl fmt::Display for ExpressionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DisallowedCharacter(c) => write!(f, "disallowed character '{}'", c),
            Self::DisallowedToken(t) => write!(f, "disallowed token '{}'", t),
            Self::Syntax(msg) => write!(f, "syntax error: {}", msg),
            Self::DivisionByZero => write!(f, "division by zero"),
        }
    }
}

/// A calculated-field expression could not be compiled or evaluated.
#[derive(Debug, Clone, Error)]
#[error("Expression for field '{field}' failed ({reason}): {expression}")]
pub struct ExpressionError {
    pub field: String,
    pub expression: String,
    pub reason: ExpressionFault,
}

impl ExpressionError {
    pub fn new(field: impl Into<String>, expression: impl Into<String>, reason: ExpressionFault) -> Self {
        Self {
            field: field.into(),
            expression: expression.into(),
            reason,
        }
    }
}

// =============================================================================
// Transformation Errors
// =============================================================================

/// Errors during record transformation.
#[derive(Debug, Error)]
pub enum TransformError {
    /// A required column resolved to null and has no default.
    #[error("Required field '{table}.{column}' resolved to null (source: {source_path})")]
    RequiredField {
        table: String,
        column: String,
        source_path: String,
    },

    /// A calculated-field expression failed on a required field.
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// The document is missing something the contract needs to build records.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

// =============================================================================
// Load Errors
// =============================================================================

/// Category of a load failure, classified from database error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadErrorKind {
    PrimaryKeyViolation,
    ForeignKeyViolation,
    CheckConstraintViolation,
    NotNullViolation,
    TypeCoercion,
    System,
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PrimaryKeyViolation => "primary key violation",
            Self::ForeignKeyViolation => "foreign key violation",
            Self::CheckConstraintViolation => "check constraint violation",
            Self::NotNullViolation => "not null violation",
            Self::TypeCoercion => "type coercion error",
            Self::System => "system error",
        };
        f.write_str(name)
    }
}

/// A categorized bulk load failure.
#[derive(Debug, Clone, Error)]
#[error("{kind} on table '{table}': {message}")]
pub struct LoadError {
    pub kind: LoadErrorKind,
    pub table: String,
    pub message: String,
    /// Index of the failing row within the batch, when known.
    pub row: Option<usize>,
}

impl LoadError {
    pub fn new(kind: LoadErrorKind, table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            message: message.into(),
            row: None,
        }
    }

    pub fn at_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level orchestration errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Contract error.
    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    /// Transformation error.
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// Load error.
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for contract operations.
pub type ContractResult<T> = Result<T, ContractError>;

/// Result type for expression operations.
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Result type for transformation operations.
pub type TransformResult<T> = Result<T, TransformError>;

/// Result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let expr_err = ExpressionError::new("officer", "CASE WHEN", ExpressionFault::Syntax("missing END".into()));
        let transform_err: TransformError = expr_err.into();
        let pipeline_err: PipelineError = transform_err.into();
        let msg = pipeline_err.to_string();
        assert!(msg.contains("officer"));
        assert!(msg.contains("missing END"));

        let load_err = LoadError::new(LoadErrorKind::ForeignKeyViolation, "contact_base", "FK_app");
        let pipeline_err: PipelineError = load_err.into();
        assert!(pipeline_err.to_string().contains("foreign key violation"));
    }

    #[test]
    fn test_required_field_format() {
        let err = TransformError::RequiredField {
            table: "app_base".into(),
            column: "app_id".into(),
            source_path: "/Provenir/Request/@ID".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("app_base.app_id"));
        assert!(msg.contains("/Provenir/Request/@ID"));
    }

    #[test]
    fn test_load_error_row() {
        let err = LoadError::new(LoadErrorKind::NotNullViolation, "scores", "NULL").at_row(3);
        assert_eq!(err.row, Some(3));
        assert_eq!(err.kind, LoadErrorKind::NotNullViolation);
    }
}
