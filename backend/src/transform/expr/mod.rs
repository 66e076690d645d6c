//! Calculated-field expressions.
//!
//! A calculated field is either bare arithmetic over sibling fields
//! (`b_months_at_job + (b_years_at_job * 12)`) or a SQL-style
//! `CASE WHEN … THEN … [ELSE …] END`. Text is tokenized, parsed into an
//! [`Expr`] tree once, and interpreted against a [`Context`] per record.
//!
//! ```rust,ignore
//! use xmlmigrate::transform::expr::{Expression, Context};
//!
//! let expr = Expression::compile("officer_code", "CASE WHEN name = 'JANE DOE' THEN 'JD' END")?;
//! let value = expr.evaluate("officer_code", &Context::new())?;
//! assert!(value.is_null());
//! ```

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOp, CaseArm, CompareOp, Condition, Expr};
pub use eval::{Context, ExprValue};

use crate::error::{ExpressionError, ExpressionFault, ExpressionResult};

/// A compiled calculated-field expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Validate and parse expression text.
    ///
    /// `field` is only used to tag errors.
    pub fn compile(field: &str, text: &str) -> ExpressionResult<Self> {
        let fail = |reason| ExpressionError::new(field, text, reason);
        let trimmed = text.trim();

        if !starts_with_case(trimmed) {
            if let Some(bad) = trimmed.chars().find(|c| !lexer::is_arithmetic_char(*c)) {
                return Err(fail(ExpressionFault::DisallowedCharacter(bad)));
            }
        }

        let tokens = lexer::tokenize(trimmed).map_err(fail)?;
        let root = parser::Parser::new(tokens).parse().map_err(fail)?;

        Ok(Self {
            source: trimmed.to_string(),
            root,
        })
    }

    /// Evaluate against a record's sibling values.
    pub fn evaluate(&self, field: &str, ctx: &Context) -> ExpressionResult<ExprValue> {
        eval::evaluate(&self.root, ctx).map_err(|reason| ExpressionError::new(field, &self.source, reason))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Whether this is a `CASE` statement rather than bare arithmetic.
    pub fn is_case(&self) -> bool {
        matches!(self.root, Expr::Case { .. })
    }
}

fn starts_with_case(text: &str) -> bool {
    text.get(..4).is_some_and(|head| head.eq_ignore_ascii_case("case"))
        && text[4..].starts_with(|c: char| c.is_whitespace())
}
