//! # dlp-import
//!
//! Batch import of a relational source into a warehouse dataset with
//! deterministic de-identification of sensitive columns.
//!
//! Each table flows through explicit, typed stages:
//!
//! ```text
//! TableCatalog → RowExtractor → Tokenizer → RowProjector → Sink
//! ```
//!
//! - **Catalog**: discovers source tables and resolves each column's
//!   de-identification strategy from a policy document
//! - **Extraction**: paginated, primary-key ordered, restartable page streams
//! - **Tokenization**: batched, cached, rate-limited service calls; tokens
//!   are keyed by table and column unless a shared domain is configured
//! - **Projection**: destination schema derivation and type coercion
//! - **Sink**: staged, table-scoped writes with truncate semantics
//!
//! Tables run concurrently on a bounded worker pool and fail independently.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dlp_import::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> dlp_import::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(CancellationToken::new(), false).await?;
//!     println!("Imported {} rows", result.rows_written);
//!     result.ensure_success()
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod pipeline;
pub mod project;
pub mod tokenize;

// Re-exports for convenient access
pub use catalog::{CatalogEntry, PolicyDocument, TableCatalog};
pub use config::{Config, DlpConfig, MigrationConfig, PolicyLocation, SourceConfig, TargetConfig};
pub use core::{
    ColumnKey, ColumnPolicy, DeidService, DeidStrategy, SourceReader, SourceRow, SqlValue, Table,
    TableIdentity, TargetRow, TargetSchema, TargetWriter, TokenDomain, TokenizedRow,
};
pub use error::{ErrorScope, MigrateError, Result};
pub use extract::RowExtractor;
pub use orchestrator::{HealthCheckResult, MigrationResult, Orchestrator, TablePlan, TableValidation};
pub use pipeline::{TableJob, TableReport, TableStatus};
pub use project::RowProjector;
pub use tokenize::{Tokenizer, TokenizerConfig};
