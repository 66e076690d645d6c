//! JSON Schema validation for mapping contracts.
//!
//! Contracts are checked against `schemas/mapping-contract.json` (Draft 7,
//! embedded at compile time) before they are deserialized, so structural
//! problems surface as a list of readable messages rather than the first
//! serde error.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use xmlmigrate::validation::validate_contract_document;
//!
//! let contract = json!({ "mappings": [] });
//! assert!(validate_contract_document(&contract).is_ok());
//!
//! let broken = json!({ "mappings": [{ "target_table": "app_base" }] });
//! assert!(validate_contract_document(&broken).is_err());
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;

static CONTRACT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/mapping-contract.json"))
        .expect("Invalid embedded schema")
});

/// Validate a JSON value against a JSON schema.
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(Vec<String>)` with one message per violation
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema)
        .map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Quick true/false check.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Validate a raw contract document against the embedded contract schema.
pub fn validate_contract_document(data: &Value) -> Result<(), Vec<String>> {
    validate(&CONTRACT_SCHEMA, data)
}

/// Quick check against the contract schema.
pub fn is_valid_contract_document(data: &Value) -> bool {
    is_valid(&CONTRACT_SCHEMA, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_contract_is_valid() {
        assert!(is_valid_contract_document(&json!({ "mappings": [] })));
    }

    #[test]
    fn test_missing_mappings_rejected() {
        let errors = validate_contract_document(&json!({ "target_schema": "dbo" })).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("mappings")));
    }

    #[test]
    fn test_mapping_needs_source_path() {
        let doc = json!({ "mappings": [{ "target_table": "app_base", "target_column": "app_id" }] });
        assert!(!is_valid_contract_document(&doc));

        let doc = json!({ "mappings": [{ "xml_path": "/a", "xml_attribute": "id", "target_table": "t" }] });
        assert!(is_valid_contract_document(&doc));
    }

    #[test]
    fn test_one_message_per_violation() {
        let doc = json!({
            "target_schema": "1bad",
            "mappings": [{ "source_path": "/a/@b", "target_table": "t", "data_length": 0 }]
        });
        let errors = validate_contract_document(&doc).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_generic_validate() {
        let schema = json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string" } }
        });
        assert!(validate(&schema, &json!({ "name": "x" })).is_ok());
        assert!(validate(&schema, &json!({ "age": 42 })).is_err());
    }
}
