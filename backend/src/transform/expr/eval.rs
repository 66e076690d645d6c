//! Interpreter over the expression tree.
//!
//! Reads field values from the supplied context only.

use std::collections::HashMap;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use super::ast::{BinaryOp, CompareOp, Condition, Expr};
use crate::error::ExpressionFault;
use crate::models::SqlValue;

/// Field name → value map an expression is evaluated against.
pub type Context = HashMap<String, SqlValue>;

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Null,
    Number(f64),
    Text(String),
}

impl ExprValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ExprValue::Null)
    }

    fn from_sql(value: Option<&SqlValue>) -> Self {
        match value {
            None | Some(SqlValue::Null) => ExprValue::Null,
            Some(SqlValue::String(s)) => ExprValue::Text(s.clone()),
            Some(other) => match other.as_f64() {
                Some(n) => ExprValue::Number(n),
                None => ExprValue::Text(other.to_string()),
            },
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            ExprValue::Null => None,
            ExprValue::Number(n) => Some(*n),
            ExprValue::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            ExprValue::Null => None,
            ExprValue::Number(n) => Some(format_number(*n)),
            ExprValue::Text(s) => Some(s.clone()),
        }
    }

    /// Convert into a column value. Integral numbers become `Int`.
    pub fn into_sql(self) -> SqlValue {
        match self {
            ExprValue::Null => SqlValue::Null,
            ExprValue::Text(s) => SqlValue::String(s),
            ExprValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    SqlValue::Int(n as i64)
                } else {
                    Decimal::from_f64(n).map(SqlValue::Decimal).unwrap_or(SqlValue::Null)
                }
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Evaluate an expression to a value.
pub fn evaluate(expr: &Expr, ctx: &Context) -> Result<ExprValue, ExpressionFault> {
    match expr {
        Expr::Number(n, _) => Ok(ExprValue::Number(*n)),
        Expr::Text(s) => Ok(ExprValue::Text(s.clone())),
        Expr::Null => Ok(ExprValue::Null),
        Expr::Field(name) => Ok(ExprValue::from_sql(ctx.get(name))),
        Expr::Case { arms, otherwise } => {
            for arm in arms {
                if test(&arm.condition, ctx)? {
                    return evaluate(&arm.value, ctx);
                }
            }
            match otherwise {
                Some(e) => evaluate(e, ctx),
                None => Ok(ExprValue::Null),
            }
        }
        Expr::Neg(_) | Expr::Binary { .. } => Ok(ExprValue::Number(numeric(expr, ctx)?)),
    }
}

/// Evaluate in arithmetic position: anything non-numeric counts as 0.0.
fn numeric(expr: &Expr, ctx: &Context) -> Result<f64, ExpressionFault> {
    match expr {
        Expr::Number(n, _) => Ok(*n),
        Expr::Neg(inner) => Ok(-numeric(inner, ctx)?),
        Expr::Binary { op, lhs, rhs } => {
            let a = numeric(lhs, ctx)?;
            let b = numeric(rhs, ctx)?;
            apply(*op, a, b)
        }
        other => Ok(evaluate(other, ctx)?.as_number().unwrap_or(0.0)),
    }
}

fn apply(op: BinaryOp, a: f64, b: f64) -> Result<f64, ExpressionFault> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(ExpressionFault::DivisionByZero);
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Err(ExpressionFault::DivisionByZero);
            }
            (a / b).floor()
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(ExpressionFault::DivisionByZero);
            }
            // sign follows the divisor
            a - b * (a / b).floor()
        }
        BinaryOp::Pow => a.powf(b),
    };
    Ok(result)
}

fn test(condition: &Condition, ctx: &Context) -> Result<bool, ExpressionFault> {
    match condition {
        Condition::Not(inner) => Ok(!test(inner, ctx)?),
        Condition::And(a, b) => Ok(test(a, ctx)? && test(b, ctx)?),
        Condition::Or(a, b) => Ok(test(a, ctx)? || test(b, ctx)?),
        Condition::IsNull { operand, negated } => {
            let is_null = match evaluate(operand, ctx)? {
                ExprValue::Null => true,
                ExprValue::Text(s) => s.trim().is_empty(),
                ExprValue::Number(_) => false,
            };
            Ok(is_null != *negated)
        }
        Condition::Compare { lhs, op, rhs } => match op {
            CompareOp::Eq | CompareOp::NotEq => {
                let equal = match (text_form(lhs, ctx)?, text_form(rhs, ctx)?) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                };
                Ok(if *op == CompareOp::Eq { equal } else { !equal })
            }
            _ => {
                let a = evaluate(lhs, ctx)?.as_number();
                let b = evaluate(rhs, ctx)?.as_number();
                let (a, b) = match (a, b) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return Ok(false),
                };
                Ok(match op {
                    CompareOp::Lt => a < b,
                    CompareOp::Le => a <= b,
                    CompareOp::Gt => a > b,
                    CompareOp::Ge => a >= b,
                    CompareOp::Eq | CompareOp::NotEq => unreachable!(),
                })
            }
        },
    }
}

/// String form used by `=` / `!=`. Numeric literals compare as written.
fn text_form(expr: &Expr, ctx: &Context) -> Result<Option<String>, ExpressionFault> {
    match expr {
        Expr::Number(_, raw) => Ok(Some(raw.clone())),
        Expr::Field(name) => Ok(ctx.get(name).and_then(|v| v.as_text())),
        other => Ok(evaluate(other, ctx)?.as_text()),
    }
}
