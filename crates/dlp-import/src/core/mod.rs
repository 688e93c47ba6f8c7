//! Core abstractions shared by every pipeline stage.
//!
//! - [`identity`]: `TableIdentity`, `ColumnKey`, `TokenDomain`
//! - [`schema`]: source table and column metadata
//! - [`value`]: SQL value representation
//! - [`row`]: `SourceRow`, `TokenizedRow`, `TargetRow`, `Page`
//! - [`policy`]: column-level de-identification policy
//! - [`target`]: destination warehouse schema
//! - [`traits`]: source, de-identification and target driver traits

pub mod identity;
pub mod policy;
pub mod row;
pub mod schema;
pub mod target;
pub mod traits;
pub mod value;

pub use identity::{ColumnKey, TableIdentity, TokenDomain};
pub use policy::{ColumnPolicy, ColumnRule, DeidStrategy};
pub use row::{Page, SourceRow, TargetRow, TokenizedRow};
pub use schema::{Column, SourceType, Table};
pub use target::{TargetField, TargetSchema, TargetType};
pub use traits::{DeidService, SourceReader, TableWriteSession, TargetWriter, TokenRequest};
pub use value::SqlValue;
