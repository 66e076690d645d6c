//! Transformation chain resolver.
//!
//! Applies a field's mapping-type chain to one raw value:
//!
//! ```text
//! raw ──▶ op₁ ──▶ op₂ ──▶ … ──▶ type finalisation ──▶ default ──▶ required check
//! ```
//!
//! A step that yields null ends the chain, except that a `calculated_field`
//! yielding null directly before `enum` hands the *original* raw value to
//! the enum lookup (expression match first, direct code lookup second).

use std::sync::Arc;

use crate::contract::{FieldMappingSpec, MappingContract, MappingOp};
use crate::error::{ExpressionResult, TransformError, TransformResult};
use crate::logs::log_table_warning;
use crate::models::{KeyValueRow, SqlValue};
use crate::transform::document::ContactSource;
use crate::transform::expr::{Context, Expression};

/// Outcome of resolving one mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Final column value (possibly null).
    Column(SqlValue),
    /// A row-creating mapping produced a key-value row.
    Row(KeyValueRow),
    /// A row-creating mapping resolved to null; nothing to append.
    NoRow,
}

impl Resolved {
    pub fn column(&self) -> Option<&SqlValue> {
        match self {
            Resolved::Column(v) => Some(v),
            _ => None,
        }
    }
}

/// Per-record inputs to resolution.
pub struct ResolveContext<'a> {
    /// Sibling values visible to calculated fields.
    pub fields: &'a Context,
    /// Source for the contact-fallback operations.
    pub contacts: Option<&'a dyn ContactSource>,
}

impl<'a> ResolveContext<'a> {
    pub fn new(fields: &'a Context) -> Self {
        Self { fields, contacts: None }
    }

    pub fn with_contacts(mut self, contacts: &'a dyn ContactSource) -> Self {
        self.contacts = Some(contacts);
        self
    }
}

/// Resolves mappings against one contract.
#[derive(Debug, Clone)]
pub struct ChainResolver {
    contract: Arc<MappingContract>,
}

impl ChainResolver {
    pub fn new(contract: Arc<MappingContract>) -> Self {
        Self { contract }
    }

    pub fn contract(&self) -> &MappingContract {
        &self.contract
    }

    /// Resolve `raw` through `spec`'s chain.
    ///
    /// Fails with [`TransformError::RequiredField`] when a required mapping
    /// without default ends up null, and with [`TransformError::Expression`]
    /// when a required mapping's expression cannot be evaluated.
    pub fn resolve(&self, raw: SqlValue, spec: &FieldMappingSpec, ctx: &ResolveContext<'_>) -> TransformResult<Resolved> {
        let raw = if raw.is_blank() { SqlValue::Null } else { raw };
        let original = raw.clone();
        let mut current = raw;
        let ops = &spec.mapping_type;
        let mut skip_enum = false;

        for (i, op) in ops.iter().enumerate() {
            if std::mem::take(&mut skip_enum) && *op == MappingOp::Enum {
                continue;
            }
            current = match op {
                MappingOp::Enum => self.lookup_enum(&current, spec),
                MappingOp::CharToBit => lookup_text(&current, |t| self.contract.lookup_char_bit(t)),
                MappingOp::BooleanToBit => lookup_text(&current, |t| self.contract.lookup_boolean_bit(t)),
                MappingOp::ExtractNumeric => extract_numeric(&current),
                MappingOp::CalculatedField => self.calculate(spec, ctx)?,
                MappingOp::LastValidPrimaryContact | MappingOp::LastValidSecondaryContact => {
                    match (ctx.contacts, op.contact_role(), spec.attribute()) {
                        (Some(contacts), Some(role), Some(attr)) => {
                            contacts.last_non_empty(role, attr).map(SqlValue::String).unwrap_or(SqlValue::Null)
                        }
                        _ => current,
                    }
                }
                // row-creating verbs carry the value through unchanged
                MappingOp::AddScore { .. }
                | MappingOp::AddIndicator { .. }
                | MappingOp::AddHistory { .. }
                | MappingOp::AddReportLookup { .. } => current,
            };

            let feeds_enum = *op == MappingOp::CalculatedField && ops.get(i + 1) == Some(&MappingOp::Enum);
            if current.is_null() {
                if feeds_enum {
                    current = original.clone();
                    continue;
                }
                break;
            }
            // a matched expression already yields the target code
            skip_enum = feeds_enum;
        }

        let value = self.finalize(current, spec)?;

        match spec.row_op().and_then(|op| op.row_verb()) {
            Some((verb, key)) => {
                if value.is_null() {
                    return Ok(Resolved::NoRow);
                }
                let key = key.or_else(|| spec.attribute()).unwrap_or_default().to_string();
                Ok(Resolved::Row(KeyValueRow {
                    table: spec.target_table.clone(),
                    verb,
                    key,
                    value,
                }))
            }
            None => Ok(Resolved::Column(value)),
        }
    }

    fn lookup_enum(&self, current: &SqlValue, spec: &FieldMappingSpec) -> SqlValue {
        let Some(text) = current.as_text() else {
            return SqlValue::Null;
        };
        let key = text.trim();
        match self.contract.lookup_enum(spec.enum_name(), key) {
            Some(code) => code,
            None => {
                if !key.is_empty() {
                    log_table_warning(
                        &spec.target_table,
                        format!("{}: value '{}' not in enum '{}'", spec.label(), key, spec.enum_name()),
                    );
                }
                SqlValue::Null
            }
        }
    }

    /// Evaluate the mapping's expression; failures null the column unless
    /// the mapping is required without default.
    fn calculate(&self, spec: &FieldMappingSpec, ctx: &ResolveContext<'_>) -> TransformResult<SqlValue> {
        let label = spec.label();
        let result: ExpressionResult<SqlValue> = (|| {
            let text = spec.expression.as_deref().unwrap_or_default();
            let expr = match self.contract.compiled_expression(text) {
                Some(expr) => expr,
                None => Arc::new(Expression::compile(&label, text)?),
            };
            Ok(expr.evaluate(&label, ctx.fields)?.into_sql())
        })();

        match result {
            Ok(value) => Ok(value),
            Err(e) if spec.required && spec.default_value.is_none() => Err(e.into()),
            Err(e) => {
                log_table_warning(&spec.target_table, format!("{} set to NULL: {}", label, e));
                Ok(SqlValue::Null)
            }
        }
    }

    /// Type conversion, default and required check.
    fn finalize(&self, value: SqlValue, spec: &FieldMappingSpec) -> TransformResult<SqlValue> {
        let value = match spec.data_type.coerce(value.clone(), spec.data_length) {
            Some(v) => v,
            None => {
                log_table_warning(
                    &spec.target_table,
                    format!("{}: cannot convert '{}' to {}", spec.label(), value, spec.data_type),
                );
                SqlValue::Null
            }
        };

        if !value.is_null() {
            return Ok(value);
        }
        if let Some(default) = spec.default_sql() {
            return Ok(default);
        }
        if spec.required {
            let (path, attr) = spec.locator();
            return Err(TransformError::RequiredField {
                table: spec.target_table.clone(),
                column: spec.target_column.clone(),
                source_path: match attr {
                    Some(a) => format!("{}/@{}", path, a),
                    None => path.to_string(),
                },
            });
        }
        Ok(SqlValue::Null)
    }
}

fn lookup_text(current: &SqlValue, lookup: impl Fn(&str) -> Option<SqlValue>) -> SqlValue {
    current
        .as_text()
        .and_then(|t| lookup(t.trim()))
        .unwrap_or(SqlValue::Null)
}

/// Keep only the digits of the value's string form.
fn extract_numeric(current: &SqlValue) -> SqlValue {
    let digits: String = current
        .as_text()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return SqlValue::Null;
    }
    match digits.parse::<i64>() {
        Ok(n) => SqlValue::Int(n),
        Err(_) => SqlValue::String(digits),
    }
}
