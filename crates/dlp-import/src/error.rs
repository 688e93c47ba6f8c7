//! Error types for the import library.

use thiserror::Error;

use crate::core::identity::TableIdentity;

/// Exit code for successful runs.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for source connectivity errors.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for schema errors.
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Exit code for tokenization errors.
pub const EXIT_TOKENIZATION_ERROR: u8 = 4;
/// Exit code for destination write errors.
pub const EXIT_SINK_ERROR: u8 = 5;
/// Exit code when one or more tables failed during a run.
pub const EXIT_TABLES_FAILED: u8 = 6;
/// Exit code for I/O errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code when the run was cancelled.
pub const EXIT_CANCELLED: u8 = 130;

/// How far an error propagates through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Fails a single row.
    Row,
    /// Aborts one table's stream; sibling tables continue.
    Table,
    /// Aborts the whole run.
    Run,
}

/// Main error type for import operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, bad policy document, unknown table, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transient source connectivity loss while fetching a page.
    #[error("Connection error on {table} at offset {offset}: {message}")]
    Connection {
        table: TableIdentity,
        offset: u64,
        message: String,
    },

    /// Unsupported column type or missing ordering key.
    #[error("Schema error on {table}: {message}")]
    Schema { table: TableIdentity, message: String },

    /// A row could not be tokenized.
    #[error("Tokenization failed on {table} at offset {offset}: {message}")]
    Tokenization {
        table: TableIdentity,
        offset: u64,
        message: String,
    },

    /// De-identification service call failed.
    #[error("De-identification service error: {message}")]
    DeidService { message: String, retryable: bool },

    /// Type coercion failed while shaping a target row.
    #[error("Projection failed on {table} at offset {offset}, column {column}: {message}")]
    Projection {
        table: TableIdentity,
        offset: u64,
        column: String,
        message: String,
    },

    /// Destination write failed.
    #[error("Write failed for table {table}: {message}")]
    Sink { table: TableIdentity, message: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// PostgreSQL driver error
    #[error("Database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// One or more tables failed during the run.
    #[error("{failed} of {total} tables failed: {tables}")]
    TablesFailed {
        failed: usize,
        total: usize,
        tables: String,
    },

    /// Run was cancelled (SIGINT, etc.)
    #[error("Import cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Schema error.
    pub fn schema(table: &TableIdentity, message: impl Into<String>) -> Self {
        MigrateError::Schema {
            table: table.clone(),
            message: message.into(),
        }
    }

    /// Create a Sink error.
    pub fn sink(table: &TableIdentity, message: impl ToString) -> Self {
        MigrateError::Sink {
            table: table.clone(),
            message: message.to_string(),
        }
    }

    /// Create a retryable de-identification service error.
    pub fn deid_transient(message: impl Into<String>) -> Self {
        MigrateError::DeidService {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable de-identification service error.
    pub fn deid_fatal(message: impl Into<String>) -> Self {
        MigrateError::DeidService {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether a retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrateError::Connection { .. } => true,
            MigrateError::DeidService { retryable, .. } => *retryable,
            MigrateError::Pool { .. } => true,
            MigrateError::Postgres(e) => e.is_closed() || e.code().is_none(),
            MigrateError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// The pipeline scope this error aborts.
    pub fn scope(&self) -> ErrorScope {
        match self {
            MigrateError::Tokenization { .. } | MigrateError::Projection { .. } => ErrorScope::Row,
            MigrateError::Config(_)
            | MigrateError::Io(_)
            | MigrateError::Yaml(_)
            | MigrateError::Json(_)
            | MigrateError::Cancelled => ErrorScope::Run,
            _ => ErrorScope::Table,
        }
    }

    /// Row offset associated with the error, if any.
    pub fn offset(&self) -> Option<u64> {
        match self {
            MigrateError::Connection { offset, .. }
            | MigrateError::Tokenization { offset, .. }
            | MigrateError::Projection { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// Table associated with the error, if any.
    pub fn table(&self) -> Option<&TableIdentity> {
        match self {
            MigrateError::Connection { table, .. }
            | MigrateError::Schema { table, .. }
            | MigrateError::Tokenization { table, .. }
            | MigrateError::Projection { table, .. }
            | MigrateError::Sink { table, .. } => Some(table),
            _ => None,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Connection { .. }
            | MigrateError::Pool { .. }
            | MigrateError::Postgres(_)
            | MigrateError::Http(_) => EXIT_CONNECTION_ERROR,
            MigrateError::Schema { .. } => EXIT_SCHEMA_ERROR,
            MigrateError::Tokenization { .. } | MigrateError::DeidService { .. } => {
                EXIT_TOKENIZATION_ERROR
            }
            MigrateError::Projection { .. } | MigrateError::Sink { .. } => EXIT_SINK_ERROR,
            MigrateError::TablesFailed { .. } => EXIT_TABLES_FAILED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
