//! One table through every stage: extract → tokenize → project → write.
//!
//! A [`TableJob`] owns everything needed to migrate a single table, so the
//! orchestrator can queue jobs and run them on independent tasks. Every job
//! ends in a [`TableReport`]; errors never escape `execute`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::CatalogEntry;
use crate::config::MigrationConfig;
use crate::core::{SourceReader, TableIdentity, TableWriteSession, TargetWriter};
use crate::error::{ErrorScope, MigrateError, Result};
use crate::extract::RowExtractor;
use crate::project::RowProjector;
use crate::tokenize::Tokenizer;

use super::retry::RetryPolicy;

/// Per-table knobs derived from the run configuration.
#[derive(Debug, Clone, Copy)]
pub struct JobSettings {
    pub page_size: usize,
    pub read_ahead: usize,
    pub fail_fast: bool,
    pub max_reported_failures: usize,
    pub retry: RetryPolicy,
}

impl JobSettings {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            page_size: config.get_page_size(),
            read_ahead: config.get_read_ahead_pages(),
            fail_fast: config.fail_fast,
            max_reported_failures: config.max_reported_failures,
            retry: RetryPolicy::from_config(config),
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from_config(&MigrationConfig::default())
    }
}

/// Final state of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Completed,
    /// Committed, but some rows were dropped (fail-fast disabled).
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl TableStatus {
    pub fn is_committed(&self) -> bool {
        matches!(self, TableStatus::Completed | TableStatus::CompletedWithErrors)
    }
}

/// A row dropped from the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub message: String,
}

/// Outcome of one table job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    /// `dataset.table`.
    pub table: String,
    pub status: TableStatus,
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_failed: u64,
    /// First row failures, capped by `max_reported_failures`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RowFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Exit code class of `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u8>,
    pub duration_seconds: f64,
}

impl TableReport {
    fn new(identity: &TableIdentity) -> Self {
        Self {
            table: identity.to_string(),
            status: TableStatus::Failed,
            rows_read: 0,
            rows_written: 0,
            rows_failed: 0,
            failures: Vec::new(),
            error: None,
            error_code: None,
            duration_seconds: 0.0,
        }
    }

    /// A report for a table that failed before its job could start.
    pub fn failed(identity: &TableIdentity, err: &MigrateError) -> Self {
        let mut report = Self::new(identity);
        report.error = Some(err.to_string());
        report.error_code = Some(err.exit_code());
        report
    }

    /// A report for a table that was never started because the run was cancelled.
    pub fn cancelled(identity: &TableIdentity) -> Self {
        let mut report = Self::new(identity);
        report.status = TableStatus::Cancelled;
        report
    }

    fn record_failure(&mut self, err: &MigrateError, cap: usize) {
        self.rows_failed += 1;
        if self.failures.len() < cap {
            let column = match err {
                MigrateError::Projection { column, .. } => Some(column.clone()),
                _ => None,
            };
            self.failures.push(RowFailure {
                offset: err.offset().unwrap_or_default(),
                column,
                message: err.to_string(),
            });
        }
    }
}

/// Migrates one table.
pub struct TableJob {
    entry: CatalogEntry,
    projector: RowProjector,
    reader: Arc<dyn SourceReader>,
    tokenizer: Arc<Tokenizer>,
    writer: Arc<dyn TargetWriter>,
    settings: JobSettings,
}

impl TableJob {
    /// Prepare a job; fails if the destination schema cannot be derived.
    pub fn new(
        entry: CatalogEntry,
        renames: Option<&BTreeMap<String, String>>,
        reader: Arc<dyn SourceReader>,
        tokenizer: Arc<Tokenizer>,
        writer: Arc<dyn TargetWriter>,
        settings: JobSettings,
    ) -> Result<Self> {
        let projector = RowProjector::new(&entry, renames)?;
        Ok(Self {
            entry,
            projector,
            reader,
            tokenizer,
            writer,
            settings,
        })
    }

    /// Run the table to completion, failure or cancellation.
    pub async fn execute(self, cancel: CancellationToken) -> TableReport {
        let started = Instant::now();
        let identity = self.entry.identity.clone();
        let mut report = TableReport::new(&identity);

        let result = self.run(&cancel, &mut report).await;
        report.duration_seconds = started.elapsed().as_secs_f64();

        match result {
            Ok(written) => {
                report.rows_written = written;
                report.status = if report.rows_failed > 0 {
                    TableStatus::CompletedWithErrors
                } else {
                    TableStatus::Completed
                };
                info!(
                    "{}: wrote {} rows in {:.1}s ({} failed)",
                    identity, written, report.duration_seconds, report.rows_failed
                );
            }
            Err(MigrateError::Cancelled) => {
                report.status = TableStatus::Cancelled;
                warn!("{}: cancelled, destination left unchanged", identity);
            }
            Err(e) => {
                report.status = TableStatus::Failed;
                report.error_code = Some(e.exit_code());
                report.error = Some(e.to_string());
                error!("{}: {}", identity, e);
            }
        }
        report
    }

    async fn run(&self, cancel: &CancellationToken, report: &mut TableReport) -> Result<u64> {
        let extractor = RowExtractor::new(
            self.reader.clone(),
            &self.entry,
            self.settings.page_size,
            self.settings.retry,
        )?;

        let mut session = self
            .writer
            .begin(&self.entry.identity, self.projector.schema())
            .await?;

        let pumped = self.pump(extractor, session.as_mut(), cancel, report).await;
        let pumped = match pumped {
            Ok(()) if cancel.is_cancelled() => Err(MigrateError::Cancelled),
            other => other,
        };

        match pumped {
            Ok(()) => session.commit().await,
            Err(e) => {
                if let Err(abort_err) = session.abort().await {
                    warn!(
                        "{}: failed to discard staged rows: {}",
                        self.entry.identity, abort_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Move every page from the extractor into the write session.
    async fn pump(
        &self,
        extractor: RowExtractor,
        session: &mut dyn TableWriteSession,
        cancel: &CancellationToken,
        report: &mut TableReport,
    ) -> Result<()> {
        let identity = &self.entry.identity;
        let mut pages = extractor.stream(0, self.settings.read_ahead, cancel.clone());
        let mut expected_offset = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MigrateError::Cancelled),
                page = pages.recv() => page,
            };
            let page = match next {
                Some(page) => page?,
                None if cancel.is_cancelled() => return Err(MigrateError::Cancelled),
                None => {
                    return Err(MigrateError::Connection {
                        table: identity.clone(),
                        offset: expected_offset,
                        message: "row stream ended before the last page".into(),
                    })
                }
            };

            let is_last = page.is_last;
            expected_offset = page.next_offset();
            report.rows_read += page.len() as u64;

            if !page.is_empty() {
                debug!("{}: processing {} rows at offset {}", identity, page.len(), page.offset);
                let outcomes = self
                    .tokenizer
                    .tokenize_rows(&self.entry.policy, page.rows)
                    .await;

                let mut batch = Vec::with_capacity(outcomes.len());
                for outcome in outcomes {
                    match outcome.and_then(|row| self.projector.project(row)) {
                        Ok(row) => batch.push(row),
                        Err(e) if e.scope() == ErrorScope::Row => {
                            report.record_failure(&e, self.settings.max_reported_failures);
                            if self.settings.fail_fast {
                                return Err(e);
                            }
                            warn!("{}: dropping row: {}", identity, e);
                        }
                        Err(e) => return Err(e),
                    }
                }

                if !batch.is_empty() {
                    session.write(batch).await?;
                }
            }

            if is_last {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PolicyDocument, TableCatalog};
    use crate::core::{Column, SourceType, SqlValue, Table};
    use crate::drivers::{MemoryReader, MemoryWriter};
    use crate::tokenize::{LocalDeidService, TokenizerConfig};

    fn customers_table() -> Table {
        Table {
            schema: "public".into(),
            name: "customers".into(),
            columns: vec![
                Column::new("id", SourceType::I64, 1).not_null(),
                Column::new("name", SourceType::Text, 2),
                Column::new("ssn", SourceType::Text, 3),
            ],
            primary_key: vec!["id".into()],
            row_count: 0,
        }
    }

    fn rows(n: i64) -> Vec<Vec<SqlValue>> {
        (1..=n)
            .map(|i| {
                vec![
                    SqlValue::I64(i),
                    SqlValue::from(format!("name-{i}")),
                    SqlValue::from(format!("ssn-{}", i % 3)),
                ]
            })
            .collect()
    }

    fn entry(reader: &MemoryReader) -> CatalogEntry {
        let policy =
            PolicyDocument::parse("tables:\n  - table: customers\n    columns:\n      ssn: token\n")
                .unwrap();
        let tables = reader.tables();
        TableCatalog::resolve(tables, "analytics", &[], &policy)
            .unwrap()
            .into_entries()
            .remove(0)
    }

    fn settings(fail_fast: bool) -> JobSettings {
        JobSettings {
            page_size: 4,
            read_ahead: 2,
            fail_fast,
            max_reported_failures: 2,
            retry: RetryPolicy::immediate(2),
        }
    }

    fn tokenizer(cancel: &CancellationToken) -> Arc<Tokenizer> {
        Arc::new(Tokenizer::new(
            Arc::new(LocalDeidService::new("k", "TOK_").unwrap()),
            TokenizerConfig::default(),
            cancel.clone(),
        ))
    }

    #[tokio::test]
    async fn test_job_writes_every_row_tokenized() {
        let reader = MemoryReader::new().with_table(customers_table(), rows(10));
        let writer = Arc::new(MemoryWriter::new());
        let cancel = CancellationToken::new();
        let job = TableJob::new(
            entry(&reader),
            None,
            Arc::new(reader),
            tokenizer(&cancel),
            writer.clone(),
            settings(true),
        )
        .unwrap();

        let report = job.execute(cancel).await;
        assert_eq!(report.status, TableStatus::Completed);
        assert_eq!(report.rows_read, 10);
        assert_eq!(report.rows_written, 10);

        let id = TableIdentity::new("analytics", "customers");
        let written = writer.rows(&id).unwrap();
        assert_eq!(written.len(), 10);
        assert_eq!(written[0].values[0], SqlValue::I64(1));
        match &written[0].values[2] {
            SqlValue::Text(token) => assert!(token.starts_with("TOK_")),
            other => panic!("unexpected value {other:?}"),
        }
        let offsets: Vec<_> = written.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cancelled_job_leaves_destination_untouched() {
        let reader = MemoryReader::new().with_table(customers_table(), rows(10));
        let writer = Arc::new(MemoryWriter::new());
        let id = TableIdentity::new("analytics", "customers");
        writer.seed(&id, vec![vec![SqlValue::I64(99)]]);

        let cancel = CancellationToken::new();
        let job = TableJob::new(
            entry(&reader),
            None,
            Arc::new(reader),
            tokenizer(&cancel),
            writer.clone(),
            settings(true),
        )
        .unwrap();
        cancel.cancel();

        let report = job.execute(cancel).await;
        assert_eq!(report.status, TableStatus::Cancelled);
        let kept = writer.rows(&id).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].values[0], SqlValue::I64(99));
    }

    #[tokio::test]
    async fn test_row_errors_dropped_without_fail_fast() {
        let mut data = rows(5);
        // Wrong type for a STRING field.
        data[2][1] = SqlValue::Bool(true);
        let reader = MemoryReader::new().with_table(customers_table(), data);
        let writer = Arc::new(MemoryWriter::new());
        let cancel = CancellationToken::new();
        let job = TableJob::new(
            entry(&reader),
            None,
            Arc::new(reader),
            tokenizer(&cancel),
            writer.clone(),
            settings(false),
        )
        .unwrap();

        let report = job.execute(cancel).await;
        assert_eq!(report.status, TableStatus::CompletedWithErrors);
        assert_eq!(report.rows_written, 4);
        assert_eq!(report.rows_failed, 1);
        assert_eq!(report.failures[0].offset, 2);
        assert_eq!(report.failures[0].column.as_deref(), Some("name"));
    }

    #[tokio::test]
    async fn test_row_error_fails_table_with_fail_fast() {
        let mut data = rows(5);
        data[2][1] = SqlValue::Bool(true);
        let reader = MemoryReader::new().with_table(customers_table(), data);
        let writer = Arc::new(MemoryWriter::new());
        let cancel = CancellationToken::new();
        let job = TableJob::new(
            entry(&reader),
            None,
            Arc::new(reader),
            tokenizer(&cancel),
            writer.clone(),
            settings(true),
        )
        .unwrap();

        let report = job.execute(cancel).await;
        assert_eq!(report.status, TableStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("offset 2"));
        assert!(writer
            .rows(&TableIdentity::new("analytics", "customers"))
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_primary_key_fails_before_writing() {
        let mut table = customers_table();
        table.primary_key.clear();
        let reader = MemoryReader::new().with_table(table, rows(3));
        let writer = Arc::new(MemoryWriter::new());
        let cancel = CancellationToken::new();
        let job = TableJob::new(
            entry(&reader),
            None,
            Arc::new(reader),
            tokenizer(&cancel),
            writer.clone(),
            settings(true),
        )
        .unwrap();

        let report = job.execute(cancel).await;
        assert_eq!(report.status, TableStatus::Failed);
        assert_eq!(report.error_code, Some(crate::error::EXIT_SCHEMA_ERROR));
        assert_eq!(writer.begin_count(), 0);
    }
}
