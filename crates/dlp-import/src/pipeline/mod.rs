//! Per-table pipeline execution.
//!
//! - [`TableJob`]: drives one table through extract, tokenize, project and write
//! - [`TableReport`]: per-table outcome recorded in the run result
//! - [`RetryPolicy`]: bounded exponential backoff for transient failures

mod job;
mod retry;

pub use job::{JobSettings, RowFailure, TableJob, TableReport, TableStatus};
pub use retry::RetryPolicy;
