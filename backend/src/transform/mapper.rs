//! Build target-table records from one parsed document.
//!
//! Tables are processed in contract order. A table whose mappings read a
//! filtered element type (contacts, addresses, ...) gets one record per valid
//! element; every other table gets at most one record, built from the first
//! element at each mapped path. Foreign keys are copied from the parent
//! record enclosing the source element.

use std::sync::Arc;

use crate::contract::{FieldMappingSpec, FilterRule, MappingContract};
use crate::error::TransformResult;
use crate::logs::log_table_warning;
use crate::models::{ResolvedRecord, SqlValue};
use crate::transform::chain::{ChainResolver, ResolveContext, Resolved};
use crate::transform::document::{ContactSelectionPolicy, DocumentContacts, Element, ParsedDocument};
use crate::transform::expr::Context;

/// Records produced from one document, in table order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedDocument {
    pub records: Vec<ResolvedRecord>,
}

impl MappedDocument {
    pub fn records_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ResolvedRecord> + 'a {
        self.records.iter().filter(move |r| r.table == table)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<ResolvedRecord> {
        self.records
    }
}

/// A record plus the element it was built from.
struct Built {
    record: ResolvedRecord,
    element: Option<usize>,
}

/// Maps documents to records for one contract.
pub struct RecordMapper {
    resolver: ChainResolver,
}

impl RecordMapper {
    pub fn new(contract: Arc<MappingContract>) -> Self {
        Self {
            resolver: ChainResolver::new(contract),
        }
    }

    pub fn contract(&self) -> &MappingContract {
        self.resolver.contract()
    }

    /// Build every record for `doc`.
    ///
    /// A required mapping resolving to null fails the whole document.
    pub fn map_document(&self, doc: &ParsedDocument) -> TransformResult<MappedDocument> {
        let contract = self.contract();
        let roles = contract.contact_roles();
        let contacts = DocumentContacts::new(doc, roles, contract.filter_rule(&roles.contact_path));

        let mut built: Vec<Built> = Vec::new();
        for table in contract.tables() {
            let specs: Vec<&FieldMappingSpec> = contract.mappings_for(&table).collect();
            if specs.is_empty() {
                continue;
            }

            match self.entity_rule(&specs) {
                Some(rule) => {
                    let valid = doc.all(&rule.xml_path).filter(|(_, e)| rule.accepts(&e.attributes));
                    let selected = ContactSelectionPolicy::LastValid.select(valid, rule.identity_attribute.as_deref());
                    for (idx, _) in selected {
                        self.build_entity(doc, &table, &specs, Some(idx), &contacts, &mut built)?;
                    }
                }
                None => {
                    let present = specs.iter().any(|s| doc.contains_path(s.element_path()));
                    if present {
                        let anchor = specs.iter().find_map(|s| doc.first(s.element_path())).map(|(i, _)| i);
                        self.build_entity(doc, &table, &specs, anchor, &contacts, &mut built)?;
                    }
                }
            }
        }

        Ok(MappedDocument {
            records: built.into_iter().map(|b| b.record).collect(),
        })
    }

    /// Filter rule whose element type this table is scoped to.
    ///
    /// Contact-fallback mappings read across contacts and never scope a table.
    fn entity_rule(&self, specs: &[&FieldMappingSpec]) -> Option<&FilterRule> {
        specs
            .iter()
            .filter(|s| !s.mapping_type.iter().any(|op| op.contact_role().is_some()))
            .find_map(|s| self.contract().filter_rule(s.element_path()))
    }

    /// Build the column record (and any key-value rows) for one entity.
    fn build_entity(
        &self,
        doc: &ParsedDocument,
        table: &str,
        specs: &[&FieldMappingSpec],
        anchor: Option<usize>,
        contacts: &DocumentContacts<'_>,
        built: &mut Vec<Built>,
    ) -> TransformResult<()> {
        let parent_keys = self.parent_keys(doc, table, anchor, built);
        let mut record = ResolvedRecord::new(table);
        for (column, value) in &parent_keys {
            record.set(column.clone(), value.clone());
        }
        let mut has_columns = false;
        let mut rows = Vec::new();

        for spec in specs {
            let element = self.source_element(doc, spec, anchor);
            let raw = match (element, spec.attribute()) {
                (Some((_, e)), Some(attr)) => e.attribute(attr).map(SqlValue::from).unwrap_or(SqlValue::Null),
                _ => SqlValue::Null,
            };

            let mut fields: Context = element
                .map(|(_, e)| {
                    e.attributes
                        .iter()
                        .map(|(k, v)| (k.clone(), SqlValue::from(v.as_str())))
                        .collect()
                })
                .unwrap_or_default();
            for (column, value) in record.iter() {
                fields.insert(column.to_string(), value.clone());
            }

            let ctx = ResolveContext::new(&fields).with_contacts(contacts);
            match self.resolver.resolve(raw, spec, &ctx)? {
                Resolved::Column(value) => {
                    has_columns = true;
                    if !value.is_null() {
                        record.set(spec.target_column.clone(), value);
                    }
                }
                Resolved::Row(row) => {
                    let keys = self.parent_keys(doc, &row.table, element.map(|(i, _)| i).or(anchor), built);
                    rows.push(Built {
                        record: row.into_record(&keys),
                        element: element.map(|(i, _)| i),
                    });
                }
                Resolved::NoRow => {}
            }
        }

        if has_columns && record.len() > parent_keys.len() {
            built.push(Built { record, element: anchor });
        }
        built.extend(rows);
        Ok(())
    }

    /// Element a mapping reads: inside the entity when possible, else the
    /// first element at its path.
    fn source_element<'d>(
        &self,
        doc: &'d ParsedDocument,
        spec: &FieldMappingSpec,
        anchor: Option<usize>,
    ) -> Option<(usize, &'d Element)> {
        let path = spec.element_path();
        if let Some(scope) = anchor {
            if doc.element(scope).is_some_and(|e| e.path == path) {
                return doc.element(scope).map(|e| (scope, e));
            }
            if let Some(found) = doc.first_within(path, scope) {
                return Some(found);
            }
        }
        doc.first(path)
    }

    /// Foreign-key columns for a record of `table` built from `element`.
    fn parent_keys(
        &self,
        doc: &ParsedDocument,
        table: &str,
        element: Option<usize>,
        built: &[Built],
    ) -> Vec<(String, SqlValue)> {
        let contract = self.contract();
        let mut keys = Vec::new();
        for rel in contract.relationships.iter().filter(|r| r.child_table == table) {
            let parents: Vec<&Built> = built.iter().filter(|b| b.record.table == rel.parent_table).collect();
            let enclosing = element.and_then(|idx| {
                parents
                    .iter()
                    .filter(|b| b.element.is_some_and(|p| doc.is_within(idx, p)))
                    .max_by_key(|b| b.element)
            });
            let parent = match (enclosing, parents.as_slice()) {
                (Some(p), _) => Some(*p),
                (None, [only]) => Some(*only),
                _ => None,
            };

            match parent.and_then(|p| p.record.get(rel.parent_key())) {
                Some(value) if !value.is_null() => keys.push((rel.foreign_key_column.clone(), value.clone())),
                _ => {
                    if !parents.is_empty() {
                        log_table_warning(
                            table,
                            format!("no {}.{} to propagate into {}", rel.parent_table, rel.parent_key(), rel.foreign_key_column),
                        );
                    }
                }
            }
        }
        keys
    }
}
