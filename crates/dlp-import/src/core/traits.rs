//! Driver traits at the edges of the pipeline.
//!
//! - [`SourceReader`]: table discovery and paged row reads
//! - [`DeidService`]: batch de-identification calls
//! - [`TargetWriter`]: staged, table-scoped destination writes
//!
//! The pipeline stages only see these traits, so tests run the whole
//! pipeline against in-memory drivers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::identity::{TableIdentity, TokenDomain};
use super::policy::DeidStrategy;
use super::row::TargetRow;
use super::schema::Table;
use super::target::TargetSchema;
use super::value::SqlValue;

/// Read schema metadata and rows from a source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// List base tables in a schema, with columns and primary keys loaded.
    async fn list_tables(&self, schema: &str) -> Result<Vec<Table>>;

    /// Fetch up to `limit` rows starting at `offset`, ordered by primary key.
    ///
    /// Returns an empty vector when `offset` is past the end of the table.
    /// Values are in the table's column order. Transient connectivity errors
    /// must be reported as retryable errors.
    async fn fetch_page(
        &self,
        table: &Table,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Vec<SqlValue>>>;

    /// Exact row count for a table.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Check connectivity.
    async fn test_connection(&self) -> Result<()>;

    /// Get the database type identifier (e.g., "postgres", "memory").
    fn db_type(&self) -> &str;
}

/// One value to de-identify.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRequest {
    pub domain: TokenDomain,
    #[serde(flatten)]
    pub strategy: DeidStrategy,
    /// Canonical string form of the source value.
    pub value: String,
}

/// Remote or local de-identification service.
#[async_trait]
pub trait DeidService: Send + Sync {
    /// Replace each request's value with its token.
    ///
    /// The result has the same length and order as `requests`. The same
    /// `(domain, strategy, value)` must always produce the same token for a
    /// fixed service key.
    async fn tokenize(&self, requests: &[TokenRequest]) -> Result<Vec<String>>;

    /// Check that the service is reachable and configured.
    async fn health_check(&self) -> Result<()>;

    /// Service identifier for logs.
    fn name(&self) -> &str;
}

/// Write destination tables.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Start a staged write of one table's full contents.
    ///
    /// Nothing is visible in the destination until the session commits.
    async fn begin(
        &self,
        table: &TableIdentity,
        schema: &TargetSchema,
    ) -> Result<Box<dyn TableWriteSession>>;

    /// Row count of a destination table, `None` if the table does not exist.
    async fn row_count(&self, table: &TableIdentity) -> Result<Option<i64>>;

    /// Check connectivity.
    async fn test_connection(&self) -> Result<()>;

    /// Writer identifier (e.g., "postgres", "jsonl").
    fn kind(&self) -> &str;
}

/// A staged write of one table.
///
/// `commit` creates the destination table if needed and replaces its
/// contents with the staged rows (truncate semantics). `abort` discards the
/// staged rows and leaves the destination untouched.
#[async_trait]
pub trait TableWriteSession: Send {
    /// Stage a batch of rows.
    async fn write(&mut self, rows: Vec<TargetRow>) -> Result<()>;

    /// Publish the staged rows; returns the number of rows written.
    async fn commit(self: Box<Self>) -> Result<u64>;

    /// Discard the staged rows.
    async fn abort(self: Box<Self>) -> Result<()>;
}
