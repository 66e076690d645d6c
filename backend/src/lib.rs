//! # xmlmigrate - contract-driven XML to relational migration
//!
//! xmlmigrate moves credit-application XML documents into SQL Server tables.
//! Every column is described by a JSON mapping contract; the engine reads it,
//! resolves each field through its transformation chain and bulk-loads the
//! resulting records in foreign-key order.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Contract   │────▶│   Mapper    │────▶│   Grouper   │────▶│ Bulk loader │
//! │   (JSON)    │     │ (chains+CASE)│    │  (batches)  │     │  (cursor)   │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!                            ▲
//!                     ParsedDocument
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use xmlmigrate::{load_contract, load_document, BulkLoader, LoaderConfig, ParsedDocument, ScriptCursor};
//!
//! let config = LoaderConfig::from_env();
//! let contract = load_contract("contract.json", &config)?;
//! let mut loader = BulkLoader::from_config(config);
//! let mut cursor = ScriptCursor::new();
//! load_document(&contract, &doc, &mut loader, &mut cursor)?;
//! print!("{}", cursor.script());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per stage
//! - [`models`] - SQL values and resolved records
//! - [`contract`] - Mapping contract model
//! - [`validation`] - Contract JSON Schema validation
//! - [`transform`] - Expressions, chains, mapping and batching
//! - [`load`] - Cursor boundary and bulk loader
//! - [`diagnostics`] - Persisted load failure diagnostics
//! - [`config`] - Loader configuration
//! - [`logs`] - Log broadcasting

// Core modules
pub mod error;
pub mod logs;
pub mod models;

// Configuration
pub mod config;

// Contract
pub mod contract;
pub mod validation;

// Transformation
pub mod transform;

// Loading
pub mod diagnostics;
pub mod load;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ContractError,
    ExpressionError,
    ExpressionFault,
    LoadError,
    LoadErrorKind,
    PipelineError,
    TransformError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{KeyValueRow, ResolvedRecord, SqlValue};

// =============================================================================
// Re-exports - Contract
// =============================================================================

pub use contract::{
    ContactRole,
    DataType,
    FieldMappingSpec,
    FilterRule,
    MappingContract,
    MappingOp,
    Relationship,
};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{is_valid, is_valid_contract_document, validate, validate_contract_document};

// =============================================================================
// Re-exports - Transformation
// =============================================================================

pub use transform::{
    group_into_batches,
    ChainResolver,
    ContactSelectionPolicy,
    Expression,
    ExprValue,
    InsertBatch,
    ParsedDocument,
    RecordMapper,
    ResolveContext,
    Resolved,
};

// =============================================================================
// Re-exports - Loading
// =============================================================================

pub use config::LoaderConfig;
pub use diagnostics::{DiagnosticStore, LoadDiagnostic};
pub use load::{BulkLoader, Cursor, DbError, ScriptCursor, StatementCache};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::pipeline::{
    load_contract,
    load_document,
    plan_document,
    transform_document,
    LoadSummary,
    TableLoad,
};
