//! High-level pipeline API: document → records → batches → database.
//!
//! # Example
//!
//! ```rust,ignore
//! use xmlmigrate::{load_contract, load_document, BulkLoader, LoaderConfig, ParsedDocument, ScriptCursor};
//!
//! let config = LoaderConfig::from_env();
//! let contract = load_contract("contracts/standard.json", &config)?;
//! let doc = ParsedDocument::from_json(&serde_json::from_str(&xml_dump)?)?;
//!
//! let mut loader = BulkLoader::from_config(config);
//! let mut cursor = ScriptCursor::new();
//! let summary = load_document(&contract, &doc, &mut loader, &mut cursor)?;
//! println!("{} rows applied", summary.total_applied());
//! ```

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::config::LoaderConfig;
use crate::contract::MappingContract;
use crate::error::{PipelineResult, TransformResult};
use crate::load::{BulkLoader, Cursor};
use crate::logs::{log_error, log_info, log_success};
use crate::models::ResolvedRecord;
use crate::transform::document::ParsedDocument;
use crate::transform::grouper::{group_into_batches, InsertBatch};
use crate::transform::mapper::RecordMapper;

/// Rows submitted and applied for one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableLoad {
    pub table: String,
    pub qualified_table: String,
    pub submitted: usize,
    pub applied: usize,
}

/// Result of loading one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadSummary {
    pub tables: Vec<TableLoad>,
}

impl LoadSummary {
    pub fn total_submitted(&self) -> usize {
        self.tables.iter().map(|t| t.submitted).sum()
    }

    pub fn total_applied(&self) -> usize {
        self.tables.iter().map(|t| t.applied).sum()
    }

    pub fn applied_for(&self, table: &str) -> Option<usize> {
        self.tables.iter().find(|t| t.table == table).map(|t| t.applied)
    }
}

/// Load a contract file and apply the configuration's schema override.
pub fn load_contract(path: impl AsRef<Path>, config: &LoaderConfig) -> PipelineResult<Arc<MappingContract>> {
    let mut contract = MappingContract::from_file(path)?;
    if let Some(schema) = &config.target_schema {
        contract.target_schema = schema.clone();
    }
    log_success(format!(
        "Contract loaded: {} mappings, schema [{}]",
        contract.mappings.len(),
        contract.target_schema
    ));
    Ok(Arc::new(contract))
}

/// Build every record for one document.
pub fn transform_document(contract: &Arc<MappingContract>, doc: &ParsedDocument) -> TransformResult<Vec<ResolvedRecord>> {
    let mapped = RecordMapper::new(Arc::clone(contract)).map_document(doc)?;
    Ok(mapped.into_records())
}

/// Build the insert batches for one document, in load order.
pub fn plan_document(
    contract: &Arc<MappingContract>,
    doc: &ParsedDocument,
    config: &LoaderConfig,
) -> TransformResult<Vec<InsertBatch>> {
    let records = transform_document(contract, doc)?;
    Ok(group_into_batches(records, contract, &config.identity_insert_tables))
}

/// Transform one document and load its batches in order.
///
/// Stops at the first failing batch and returns its error.
pub fn load_document<C: Cursor + ?Sized>(
    contract: &Arc<MappingContract>,
    doc: &ParsedDocument,
    loader: &mut BulkLoader,
    cursor: &mut C,
) -> PipelineResult<LoadSummary> {
    let batches = plan_document(contract, doc, loader.config())?;
    log_info(format!("{} batches to load", batches.len()));

    let mut summary = LoadSummary::default();
    for batch in &batches {
        let applied = match loader.load(cursor, batch) {
            Ok(applied) => applied,
            Err(e) => {
                log_error(format!("Document load stopped at {}: {}", batch.qualified_table, e));
                return Err(e.into());
            }
        };
        summary.tables.push(TableLoad {
            table: batch.table.clone(),
            qualified_table: batch.qualified_table.clone(),
            submitted: batch.len(),
            applied,
        });
    }

    log_success(format!(
        "Document loaded: {}/{} rows applied",
        summary.total_applied(),
        summary.total_submitted()
    ));
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, TransformError};
    use crate::load::testing::MemoryCursor;
    use crate::load::ScriptCursor;
    use serde_json::json;
    use std::io::Write;

    fn contract_json() -> serde_json::Value {
        json!({
            "target_schema": "dbo",
            "table_insertion_order": ["app_base", "scores"],
            "relationships": [
                { "parent_table": "app_base", "child_table": "scores", "foreign_key_column": "app_id" }
            ],
            "enum_mappings": { "status": { "A": 1, "D": 2 } },
            "mappings": [
                { "source_path": "/Provenir/Request/@ID", "target_table": "app_base",
                  "target_column": "app_id", "data_type": "int", "required": true },
                { "source_path": "/Provenir/Request/CustData/application/@status", "target_table": "app_base",
                  "target_column": "status", "data_type": "tinyint", "mapping_type": "enum" },
                { "source_path": "/Provenir/Request/CustData/application/@V4P", "target_table": "scores",
                  "data_type": "int", "mapping_type": ["add_score(V4P)"] }
            ]
        })
    }

    fn contract() -> Arc<MappingContract> {
        Arc::new(MappingContract::from_value(contract_json()).unwrap())
    }

    fn document(score: &str) -> ParsedDocument {
        ParsedDocument::from_json(&json!({
            "/Provenir/Request": { "ID": "154284" },
            "/Provenir/Request/CustData/application": { "status": "A", "V4P": score }
        }))
        .unwrap()
    }

    #[test]
    fn test_plan_document() {
        let batches = plan_document(&contract(), &document("712"), &LoaderConfig::default()).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].qualified_table, "[dbo].[app_base]");
        assert!(batches[0].identity_insert);
        assert_eq!(batches[0].records[0].get("status"), Some(&crate::models::SqlValue::Int(1)));
        assert_eq!(batches[1].table, "scores");
    }

    #[test]
    fn test_dry_run_script() {
        let mut loader = BulkLoader::new(LoaderConfig::default());
        let mut cursor = ScriptCursor::new();
        let summary = load_document(&contract(), &document("712"), &mut loader, &mut cursor).unwrap();

        assert_eq!(summary.total_applied(), 2);
        assert_eq!(
            cursor.statements(),
            &[
                "SET IDENTITY_INSERT [dbo].[app_base] ON".to_string(),
                "INSERT INTO [dbo].[app_base] ([app_id], [status]) VALUES (154284, 1)".to_string(),
                "SET IDENTITY_INSERT [dbo].[app_base] OFF".to_string(),
                "INSERT INTO [dbo].[scores] ([app_id], [score_identifier], [score]) VALUES (154284, N'V4P', 712)".to_string(),
            ]
        );
    }

    #[test]
    fn test_reprocessing_upserts_scores() {
        let mut loader = BulkLoader::new(LoaderConfig::default());
        let mut cursor = MemoryCursor::new()
            .with_primary_key("[dbo].[scores]", &["app_id", "score_identifier"]);

        load_document(&contract(), &document("700"), &mut loader, &mut cursor).unwrap();
        // app_base has no primary key in this cursor; only scores are checked
        let summary = load_document(&contract(), &document("720"), &mut loader, &mut cursor).unwrap();

        assert_eq!(summary.applied_for("scores"), Some(1));
        let scores = cursor.rows("[dbo].[scores]");
        assert_eq!(scores.len(), 1);
        assert_eq!(MemoryCursor::value(&scores[0], "score"), crate::models::SqlValue::Int(720));
    }

    #[test]
    fn test_required_failure_loads_nothing() {
        let doc = ParsedDocument::from_json(&json!({
            "/Provenir/Request": { "ID": "" },
            "/Provenir/Request/CustData/application": { "status": "A" }
        }))
        .unwrap();
        let mut loader = BulkLoader::new(LoaderConfig::default());
        let mut cursor = ScriptCursor::new();

        let err = load_document(&contract(), &doc, &mut loader, &mut cursor).unwrap_err();
        assert!(matches!(err, PipelineError::Transform(TransformError::RequiredField { .. })));
        assert!(cursor.statements().is_empty());
    }

    #[test]
    fn test_load_contract_applies_schema_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", contract_json()).unwrap();

        let mut config = LoaderConfig::default();
        config.target_schema = Some("migration".to_string());
        let contract = load_contract(file.path(), &config).unwrap();
        assert_eq!(contract.qualified_table("scores"), "[migration].[scores]");
    }
}
