//! Transformation module.
//!
//! This module turns a parsed document into load-ready batches:
//! - Document: flattened elements and contact selection
//! - Expr: calculated-field expression language
//! - Chain: per-field transformation chain
//! - Mapper: table instances and record assembly
//! - Grouper: records to per-table insert batches
//! - Pipeline: end-to-end entry points

pub mod chain;
pub mod document;
pub mod expr;
pub mod grouper;
pub mod mapper;
pub mod pipeline;

pub use chain::{ChainResolver, ResolveContext, Resolved};
pub use document::{ContactSelectionPolicy, ContactSource, DocumentContacts, Element, ParsedDocument};
pub use expr::{Expression, ExprValue};
pub use grouper::{group_into_batches, InsertBatch};
pub use mapper::{MappedDocument, RecordMapper};
pub use pipeline::*;
