//! Group resolved records into per-table insert batches.
//!
//! # Architecture
//!
//! ```text
//! Records (any order)              →  InsertBatches (FK-safe order)
//! ┌──────────────────────────┐       ┌──────────────────────────────┐
//! │ contact_base {con_id: 1} │       │ [dbo].[app_base]     (1 row) │
//! │ app_base {app_id: 7}     │  →    ├──────────────────────────────┤
//! │ contact_base {con_id: 2} │       │ [dbo].[contact_base] (2 rows)│
//! └──────────────────────────┘       └──────────────────────────────┘
//! ```
//!
//! Tables follow `table_insertion_order`; tables the order does not name
//! come last, in the order they were first seen.

use serde::Serialize;

use crate::contract::MappingContract;
use crate::models::ResolvedRecord;

/// Records for one table, loaded by a single executor call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertBatch {
    pub table: String,
    /// `[schema].[table]`
    pub qualified_table: String,
    pub records: Vec<ResolvedRecord>,
    /// Bracket the load with `SET IDENTITY_INSERT ... ON/OFF`.
    pub identity_insert: bool,
}

impl InsertBatch {
    pub fn new(table: &str, qualified_table: &str, identity_insert: bool) -> Self {
        Self {
            table: table.to_string(),
            qualified_table: qualified_table.to_string(),
            records: Vec::new(),
            identity_insert,
        }
    }

    pub fn with_record(mut self, record: ResolvedRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Union of the records' columns, in first-seen order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for record in &self.records {
            for column in record.columns() {
                if !columns.iter().any(|c| c == column) {
                    columns.push(column.to_string());
                }
            }
        }
        columns
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Group records by table in insertion order.
///
/// `identity_tables` lists the tables whose identity column is supplied
/// explicitly.
pub fn group_into_batches(
    records: Vec<ResolvedRecord>,
    contract: &MappingContract,
    identity_tables: &[String],
) -> Vec<InsertBatch> {
    let mut order: Vec<String> = contract.table_insertion_order.clone();
    for record in &records {
        if !order.contains(&record.table) {
            order.push(record.table.clone());
        }
    }

    let mut batches: Vec<InsertBatch> = order
        .iter()
        .map(|table| {
            InsertBatch::new(
                table,
                &contract.qualified_table(table),
                identity_tables.iter().any(|t| t == table),
            )
        })
        .collect();

    for record in records {
        if let Some(batch) = batches.iter_mut().find(|b| b.table == record.table) {
            batch.records.push(record);
        }
    }

    batches.retain(|b| !b.is_empty());
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SqlValue;

    fn contract() -> MappingContract {
        let mut contract = MappingContract::new("dbo");
        contract.table_insertion_order = vec!["app_base".into(), "contact_base".into(), "scores".into()];
        contract
    }

    #[test]
    fn test_batches_follow_insertion_order() {
        let records = vec![
            ResolvedRecord::new("contact_base").with("con_id", SqlValue::Int(1)),
            ResolvedRecord::new("audit_log").with("note", SqlValue::from("x")),
            ResolvedRecord::new("app_base").with("app_id", SqlValue::Int(7)),
            ResolvedRecord::new("contact_base").with("con_id", SqlValue::Int(2)),
        ];

        let batches = group_into_batches(records, &contract(), &["contact_base".to_string()]);
        let tables: Vec<&str> = batches.iter().map(|b| b.table.as_str()).collect();
        assert_eq!(tables, vec!["app_base", "contact_base", "audit_log"]);

        assert_eq!(batches[1].qualified_table, "[dbo].[contact_base]");
        assert_eq!(batches[1].len(), 2);
        assert!(batches[1].identity_insert);
        assert!(!batches[0].identity_insert);
    }

    #[test]
    fn test_columns_are_unioned_in_first_seen_order() {
        let batch = InsertBatch::new("contact_base", "[dbo].[contact_base]", false)
            .with_record(ResolvedRecord::new("contact_base").with("con_id", SqlValue::Int(1)).with("first_name", SqlValue::from("A")))
            .with_record(ResolvedRecord::new("contact_base").with("con_id", SqlValue::Int(2)).with("email", SqlValue::from("b@x.com")));
        assert_eq!(batch.columns(), vec!["con_id", "first_name", "email"]);
    }
}
