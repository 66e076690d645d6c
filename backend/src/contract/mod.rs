//! Mapping contract definition.
//!
//! The contract is the JSON document declaring how the XML of one source
//! schema variant maps onto target tables: field rules, enum tables, bit
//! conversions, element filters and table relationships.
//!
//! It is loaded once per run, validated, and then shared read-only
//! (`Arc<MappingContract>`) by every resolver and loader.

pub mod ops;
pub mod types;

pub use ops::{ContactRole, MappingOp, RowVerb};
pub use types::DataType;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ContractError, ContractResult};
use crate::models::SqlValue;
use crate::transform::expr::Expression;
use crate::validation::validate_contract_document;

fn default_schema() -> String {
    "dbo".to_string()
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Field mapping
// =============================================================================

/// One declarative rule mapping an XML attribute onto a target column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMappingSpec {
    /// Locator into the parsed XML, `/path/to/element` or `/path/to/element/@attr`.
    #[serde(alias = "xml_path")]
    pub source_path: String,

    /// Attribute name when not embedded in `source_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_attribute: Option<String>,

    pub target_table: String,

    /// Empty for row-creating mappings.
    #[serde(default)]
    pub target_column: String,

    #[serde(default)]
    pub data_type: DataType,

    /// Truncation bound for text columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_length: Option<usize>,

    /// Ordered operation chain.
    #[serde(default, deserialize_with = "deserialize_mapping_types")]
    pub mapping_type: Vec<MappingOp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    /// Enum table name, defaults to `target_column`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,

    #[serde(default = "default_true")]
    pub nullable: bool,

    #[serde(default)]
    pub required: bool,
}

/// Accept either `["calculated_field", "enum"]` or `"calculated_field, enum"`.
fn deserialize_mapping_types<'de, D>(deserializer: D) -> Result<Vec<MappingOp>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let tokens = match Option::<OneOrMany>::deserialize(deserializer)? {
        None => return Ok(Vec::new()),
        Some(OneOrMany::Many(tokens)) => tokens,
        Some(OneOrMany::One(text)) => split_top_level(&text),
    };
    tokens
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| MappingOp::parse(t).map_err(serde::de::Error::custom))
        .collect()
}

/// Split on commas that are not inside parentheses.
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);
    parts
}

impl FieldMappingSpec {
    /// Create a plain text column mapping.
    pub fn new(source_path: &str, target_table: &str, target_column: &str) -> Self {
        Self {
            source_path: source_path.to_string(),
            xml_attribute: None,
            target_table: target_table.to_string(),
            target_column: target_column.to_string(),
            data_type: DataType::default(),
            data_length: None,
            mapping_type: Vec::new(),
            expression: None,
            enum_name: None,
            default_value: None,
            nullable: true,
            required: false,
        }
    }

    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.data_length = Some(length);
        self
    }

    /// Append an operation to the chain.
    pub fn with_op(mut self, op: MappingOp) -> Self {
        self.mapping_type.push(op);
        self
    }

    pub fn with_expression(mut self, expression: &str) -> Self {
        self.expression = Some(expression.to_string());
        self
    }

    pub fn with_enum_name(mut self, name: &str) -> Self {
        self.enum_name = Some(name.to_string());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default_value = Some(default);
        self
    }

    /// Mark as required (and not nullable).
    pub fn required(mut self) -> Self {
        self.required = true;
        self.nullable = false;
        self
    }

    /// Element path and attribute name this mapping reads.
    pub fn locator(&self) -> (&str, Option<&str>) {
        if let Some(attr) = self.xml_attribute.as_deref() {
            return (self.source_path.trim_end_matches('/'), Some(attr));
        }
        match self.source_path.rfind("/@") {
            Some(idx) => (&self.source_path[..idx], Some(&self.source_path[idx + 2..])),
            None => (self.source_path.as_str(), None),
        }
    }

    pub fn element_path(&self) -> &str {
        self.locator().0
    }

    pub fn attribute(&self) -> Option<&str> {
        self.locator().1
    }

    /// Enum table this mapping looks values up in.
    pub fn enum_name(&self) -> &str {
        self.enum_name.as_deref().unwrap_or(&self.target_column)
    }

    /// The row-creating operation, if this mapping appends key-value rows.
    pub fn row_op(&self) -> Option<&MappingOp> {
        self.mapping_type.iter().find(|op| op.is_row_creating())
    }

    pub fn is_row_creating(&self) -> bool {
        self.row_op().is_some()
    }

    /// Label used in logs and errors.
    pub fn label(&self) -> String {
        if self.target_column.is_empty() {
            match self.row_op() {
                Some(op) => format!("{}.{}", self.target_table, op),
                None => self.target_table.clone(),
            }
        } else {
            format!("{}.{}", self.target_table, self.target_column)
        }
    }

    /// Default value converted to this column's type.
    pub fn default_sql(&self) -> Option<SqlValue> {
        let raw = SqlValue::from_json(self.default_value.as_ref()?);
        self.data_type
            .coerce(raw, self.data_length)
            .filter(|v| !v.is_null())
    }
}

// =============================================================================
// Enum and bit tables
// =============================================================================

/// Target value of an enum or bit lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappedCode {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl MappedCode {
    pub fn to_sql(&self) -> SqlValue {
        match self {
            MappedCode::Int(i) => SqlValue::Int(*i),
            MappedCode::Bool(b) => SqlValue::Bit(*b),
            MappedCode::Text(s) => SqlValue::String(s.clone()),
        }
    }
}

/// Source string → target code.
pub type EnumTable = HashMap<String, MappedCode>;

/// Token → bit value tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BitConversions {
    #[serde(default)]
    pub char_to_bit: HashMap<String, MappedCode>,
    #[serde(default)]
    pub boolean_to_bit: HashMap<String, MappedCode>,
}

fn lookup_case_insensitive(table: &HashMap<String, MappedCode>, key: &str) -> Option<SqlValue> {
    table
        .get(key)
        .or_else(|| {
            table
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
        .map(MappedCode::to_sql)
}

// =============================================================================
// Element filtering and relationships
// =============================================================================

/// What an attribute must look like for an element to be kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeRequirement {
    /// `true`: must be present and non-empty.
    Present(bool),
    /// Must be one of these values.
    OneOf(Vec<String>),
}

/// Recognises valid repeated elements (contacts, addresses, employments).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    pub element_type: String,
    pub xml_path: String,
    #[serde(default)]
    pub required_attributes: BTreeMap<String, AttributeRequirement>,
    /// Attribute identifying one logical entity; later valid duplicates replace earlier ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_attribute: Option<String>,
}

impl FilterRule {
    pub fn accepts(&self, attributes: &BTreeMap<String, String>) -> bool {
        self.required_attributes.iter().all(|(name, requirement)| {
            let value = attributes.get(name).map(|v| v.trim()).unwrap_or("");
            match requirement {
                AttributeRequirement::Present(false) => true,
                AttributeRequirement::Present(true) => !value.is_empty(),
                AttributeRequirement::OneOf(allowed) => allowed.iter().any(|a| a == value),
            }
        })
    }
}

/// Role attribute and role codes for contact selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRoles {
    #[serde(default = "default_contact_path")]
    pub contact_path: String,
    #[serde(default = "default_role_attribute")]
    pub role_attribute: String,
    #[serde(default = "default_primary_role")]
    pub primary: String,
    #[serde(default = "default_secondary_role")]
    pub secondary: String,
}

fn default_contact_path() -> String {
    "/Provenir/Request/CustData/application/contact".to_string()
}

fn default_role_attribute() -> String {
    "ac_role_tp_c".to_string()
}

fn default_primary_role() -> String {
    "PR".to_string()
}

fn default_secondary_role() -> String {
    "AUTHU".to_string()
}

impl Default for ContactRoles {
    fn default() -> Self {
        Self {
            contact_path: default_contact_path(),
            role_attribute: default_role_attribute(),
            primary: default_primary_role(),
            secondary: default_secondary_role(),
        }
    }
}

impl ContactRoles {
    pub fn code(&self, role: ContactRole) -> &str {
        match role {
            ContactRole::Primary => &self.primary,
            ContactRole::Secondary => &self.secondary,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementFiltering {
    #[serde(default)]
    pub filter_rules: Vec<FilterRule>,
    #[serde(default)]
    pub contact_roles: ContactRoles,
}

/// Parent/child link used to propagate keys into child records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub parent_table: String,
    pub child_table: String,
    pub foreign_key_column: String,
    /// Parent column holding the key, defaults to `foreign_key_column`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key_column: Option<String>,
}

impl Relationship {
    pub fn parent_key(&self) -> &str {
        self.parent_key_column.as_deref().unwrap_or(&self.foreign_key_column)
    }
}

// =============================================================================
// Contract
// =============================================================================

/// A complete mapping contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingContract {
    #[serde(default)]
    pub source_table: String,

    #[serde(default)]
    pub source_column: String,

    #[serde(default)]
    pub xml_root_element: String,

    #[serde(default = "default_schema")]
    pub target_schema: String,

    /// FK-safe table order.
    #[serde(default)]
    pub table_insertion_order: Vec<String>,

    #[serde(default)]
    pub element_filtering: ElementFiltering,

    #[serde(default)]
    pub relationships: Vec<Relationship>,

    #[serde(default)]
    pub enum_mappings: HashMap<String, EnumTable>,

    #[serde(default)]
    pub bit_conversions: BitConversions,

    pub mappings: Vec<FieldMappingSpec>,

    /// Compiled calculated-field expressions keyed by expression text.
    #[serde(skip)]
    expressions: HashMap<String, Arc<Expression>>,
}

impl MappingContract {
    /// Create an empty contract (mostly for tests and builders).
    pub fn new(target_schema: &str) -> Self {
        Self {
            source_table: String::new(),
            source_column: String::new(),
            xml_root_element: String::new(),
            target_schema: target_schema.to_string(),
            table_insertion_order: Vec::new(),
            element_filtering: ElementFiltering::default(),
            relationships: Vec::new(),
            enum_mappings: HashMap::new(),
            bit_conversions: BitConversions::default(),
            mappings: Vec::new(),
            expressions: HashMap::new(),
        }
    }

    /// Parse, schema-check and validate a contract from JSON text.
    pub fn from_json(json: &str) -> ContractResult<Self> {
        let document: Value = serde_json::from_str(json)?;
        Self::from_value(document)
    }

    /// Parse, schema-check and validate a contract from a JSON value.
    pub fn from_value(document: Value) -> ContractResult<Self> {
        validate_contract_document(&document).map_err(|errors| ContractError::SchemaError { errors })?;
        let mut contract: MappingContract = serde_json::from_value(document)?;
        contract.prepare()?;
        Ok(contract)
    }

    /// Load a contract file.
    pub fn from_file(path: impl AsRef<Path>) -> ContractResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Validate mappings and compile every calculated-field expression.
    pub fn prepare(&mut self) -> ContractResult<()> {
        self.validate()?;
        let mut compiled = HashMap::new();
        for spec in &self.mappings {
            if let Some(text) = spec.expression.as_deref() {
                if !compiled.contains_key(text) {
                    let expr = Expression::compile(&spec.label(), text)?;
                    compiled.insert(text.to_string(), Arc::new(expr));
                }
            }
        }
        self.expressions = compiled;
        Ok(())
    }

    /// Check the cross-references between mappings and tables.
    pub fn validate(&self) -> ContractResult<()> {
        for spec in &self.mappings {
            let invalid = |message: &str| ContractError::InvalidMapping {
                table: spec.target_table.clone(),
                column: spec.target_column.clone(),
                message: message.to_string(),
            };

            let row_ops = spec.mapping_type.iter().filter(|op| op.is_row_creating()).count();
            match (spec.target_column.is_empty(), row_ops) {
                (true, 0) => return Err(invalid("empty target_column without a row-creating mapping type")),
                (false, n) if n > 0 => return Err(invalid("row-creating mapping types need an empty target_column")),
                (_, n) if n > 1 => return Err(invalid("more than one row-creating mapping type")),
                _ => {}
            }
            if spec.attribute().is_none() {
                return Err(invalid("source_path names no attribute"));
            }

            for op in &spec.mapping_type {
                match op {
                    MappingOp::Enum if !self.enum_mappings.contains_key(spec.enum_name()) => {
                        return Err(ContractError::MissingEnum {
                            table: spec.target_table.clone(),
                            column: spec.target_column.clone(),
                            enum_name: spec.enum_name().to_string(),
                        });
                    }
                    MappingOp::CalculatedField if spec.expression.as_deref().map_or(true, |e| e.trim().is_empty()) => {
                        return Err(ContractError::MissingExpression {
                            table: spec.target_table.clone(),
                            column: spec.target_column.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Compiled expression for `text`, if it was compiled at load time.
    pub fn compiled_expression(&self, text: &str) -> Option<Arc<Expression>> {
        self.expressions.get(text.trim()).or_else(|| self.expressions.get(text)).cloned()
    }

    pub fn enum_table(&self, name: &str) -> Option<&EnumTable> {
        self.enum_mappings.get(name)
    }

    /// Direct enum lookup; `None` when the table or value is unknown.
    pub fn lookup_enum(&self, name: &str, key: &str) -> Option<SqlValue> {
        self.enum_table(name)?.get(key).map(MappedCode::to_sql)
    }

    pub fn lookup_char_bit(&self, key: &str) -> Option<SqlValue> {
        lookup_case_insensitive(&self.bit_conversions.char_to_bit, key.trim())
    }

    pub fn lookup_boolean_bit(&self, key: &str) -> Option<SqlValue> {
        lookup_case_insensitive(&self.bit_conversions.boolean_to_bit, key.trim())
    }

    /// `[schema].[table]`
    pub fn qualified_table(&self, table: &str) -> String {
        format!("[{}].[{}]", self.target_schema, table)
    }

    /// Tables in insertion order, followed by mapped tables the order omits.
    pub fn tables(&self) -> Vec<String> {
        let mut tables = self.table_insertion_order.clone();
        for spec in &self.mappings {
            if !tables.contains(&spec.target_table) {
                tables.push(spec.target_table.clone());
            }
        }
        tables
    }

    /// Mappings targeting `table`, in contract order.
    pub fn mappings_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a FieldMappingSpec> + 'a {
        self.mappings.iter().filter(move |m| m.target_table == table)
    }

    /// Filter rule for elements at `path`.
    pub fn filter_rule(&self, path: &str) -> Option<&FilterRule> {
        self.element_filtering.filter_rules.iter().find(|r| r.xml_path == path)
    }

    pub fn contact_roles(&self) -> &ContactRoles {
        &self.element_filtering.contact_roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_contract_json() -> Value {
        json!({
            "source_table": "app_xml",
            "source_column": "xml",
            "xml_root_element": "Provenir",
            "target_schema": "migration",
            "table_insertion_order": ["app_base", "contact_base", "scores"],
            "enum_mappings": {
                "status_enum": { "A": 1, "D": 2 },
                "officer_code": { "12": 30, "JS": 31 }
            },
            "bit_conversions": {
                "char_to_bit": { "Y": 1, "N": 0 },
                "boolean_to_bit": { "true": 1, "false": 0 }
            },
            "mappings": [
                {
                    "source_path": "/Provenir/Request/@ID",
                    "target_table": "app_base",
                    "target_column": "app_id",
                    "data_type": "int",
                    "required": true,
                    "nullable": false
                },
                {
                    "xml_path": "/Provenir/Request/CustData/application",
                    "xml_attribute": "status",
                    "target_table": "app_base",
                    "target_column": "status",
                    "data_type": "tinyint",
                    "mapping_type": "enum",
                    "enum_name": "status_enum"
                },
                {
                    "source_path": "/Provenir/Request/CustData/application/@officer",
                    "target_table": "app_base",
                    "target_column": "officer_code",
                    "data_type": "int",
                    "mapping_type": ["calculated_field", "enum"],
                    "expression": "CASE WHEN officer = 'JOHN SMITH' THEN 'JS' END"
                },
                {
                    "source_path": "/Provenir/Request/CustData/application/@V4P",
                    "target_table": "scores",
                    "data_type": "int",
                    "mapping_type": ["add_score(V4P)"]
                }
            ]
        })
    }

    #[test]
    fn test_load_contract() {
        let contract = MappingContract::from_value(sample_contract_json()).unwrap();
        assert_eq!(contract.mappings.len(), 4);
        assert_eq!(contract.qualified_table("app_base"), "[migration].[app_base]");
        assert_eq!(contract.mappings[1].mapping_type, vec![MappingOp::Enum]);
        assert_eq!(contract.mappings[1].locator(), ("/Provenir/Request/CustData/application", Some("status")));
        assert!(contract.mappings[3].is_row_creating());
        assert!(contract
            .compiled_expression("CASE WHEN officer = 'JOHN SMITH' THEN 'JS' END")
            .is_some());
    }

    #[test]
    fn test_enum_lookup() {
        let contract = MappingContract::from_value(sample_contract_json()).unwrap();
        assert_eq!(contract.lookup_enum("status_enum", "A"), Some(SqlValue::Int(1)));
        assert_eq!(contract.lookup_enum("status_enum", "Z"), None);
        assert_eq!(contract.lookup_char_bit("y"), Some(SqlValue::Int(1)));
        assert_eq!(contract.lookup_boolean_bit("FALSE"), Some(SqlValue::Int(0)));
    }

    #[test]
    fn test_unknown_mapping_type_rejected() {
        let mut doc = sample_contract_json();
        doc["mappings"][1]["mapping_type"] = json!(["enum", "titlecase"]);
        let err = MappingContract::from_value(doc).unwrap_err();
        assert!(err.to_string().contains("unknown mapping type 'titlecase'"), "{err}");

        let mut doc = sample_contract_json();
        doc["mappings"][1]["mapping_type"] = json!("enum, add_score()");
        let err = MappingContract::from_value(doc).unwrap_err();
        assert!(err.to_string().contains("requires a score identifier"), "{err}");
    }

    #[test]
    fn test_missing_enum_table_rejected() {
        let mut doc = sample_contract_json();
        doc["mappings"][1]["enum_name"] = json!("nope");
        let err = MappingContract::from_value(doc).unwrap_err();
        assert!(matches!(err, ContractError::MissingEnum { ref enum_name, .. } if enum_name == "nope"));
    }

    #[test]
    fn test_enum_name_defaults_to_column() {
        let mut doc = sample_contract_json();
        doc["mappings"][1]["enum_name"] = Value::Null;
        let err = MappingContract::from_value(doc).unwrap_err();
        assert!(matches!(err, ContractError::MissingEnum { ref enum_name, .. } if enum_name == "status"));
    }

    #[test]
    fn test_bad_expression_rejected_at_load() {
        let mut doc = sample_contract_json();
        doc["mappings"][2]["expression"] = json!("CASE WHEN officer = 'X' THEN 1");
        let err = MappingContract::from_value(doc).unwrap_err();
        match err {
            ContractError::Expression(e) => assert_eq!(e.field, "app_base.officer_code"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_row_creating_needs_empty_column() {
        let mut doc = sample_contract_json();
        doc["mappings"][3]["target_column"] = json!("score");
        assert!(matches!(
            MappingContract::from_value(doc),
            Err(ContractError::InvalidMapping { .. })
        ));
    }

    #[test]
    fn test_comma_separated_mapping_types() {
        let spec: FieldMappingSpec = serde_json::from_value(json!({
            "source_path": "/a/@b",
            "target_table": "t",
            "target_column": "c",
            "mapping_type": "calculated_field, enum"
        }))
        .unwrap();
        assert_eq!(spec.mapping_type, vec![MappingOp::CalculatedField, MappingOp::Enum]);
    }

    #[test]
    fn test_filter_rule_accepts() {
        let rule: FilterRule = serde_json::from_value(json!({
            "element_type": "contact",
            "xml_path": "/app/contact",
            "required_attributes": { "con_id": true, "ac_role_tp_c": ["PR", "AUTHU"] }
        }))
        .unwrap();

        let mut attrs = BTreeMap::new();
        attrs.insert("con_id".to_string(), "7".to_string());
        attrs.insert("ac_role_tp_c".to_string(), "PR".to_string());
        assert!(rule.accepts(&attrs));

        attrs.insert("ac_role_tp_c".to_string(), "GUAR".to_string());
        assert!(!rule.accepts(&attrs));

        attrs.insert("ac_role_tp_c".to_string(), "AUTHU".to_string());
        attrs.insert("con_id".to_string(), " ".to_string());
        assert!(!rule.accepts(&attrs));
    }

    #[test]
    fn test_default_sql_coerced() {
        let spec = FieldMappingSpec::new("/a/@b", "t", "c")
            .with_type(DataType::Int)
            .with_default(json!("0"));
        assert_eq!(spec.default_sql(), Some(SqlValue::Int(0)));
    }
}
