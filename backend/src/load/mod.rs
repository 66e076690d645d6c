//! Bulk load executor.
//!
//! - `cursor` - database boundary and the dry-run script cursor
//! - `sql` - statement text and the insert statement cache
//! - `classify` - database error classification
//! - `executor` - two-tier load strategy

pub mod classify;
pub mod cursor;
pub mod executor;
pub mod sql;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::classify;
pub use cursor::{Cursor, DbError, ScriptCursor};
pub use executor::BulkLoader;
pub use sql::{InsertStatement, StatementCache};
