//! Import orchestrator - main workflow coordinator.
//!
//! Loads the policy document, discovers the catalog, then runs one
//! [`TableJob`] per table on a bounded worker pool. Tables succeed or fail
//! independently; the [`MigrationResult`] lists every table's report.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::{PolicyDocument, TableCatalog};
use crate::config::Config;
use crate::core::{DeidService, SourceReader, TargetWriter};
use crate::drivers::{source_from_config, target_from_config};
use crate::error::{ErrorScope, MigrateError, Result};
use crate::extract::check_schema;
use crate::pipeline::{JobSettings, TableJob, TableReport, TableStatus};
use crate::project::RowProjector;
use crate::tokenize::{service_from_config, CacheStats, Tokenizer, TokenizerConfig};

/// Import orchestrator.
pub struct Orchestrator {
    config: Arc<Config>,
    reader: Arc<dyn SourceReader>,
    writer: Arc<dyn TargetWriter>,
    service: Arc<dyn DeidService>,
    policy: Option<PolicyDocument>,
}

/// Result of an import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: completed, completed_with_errors, failed, cancelled or dry_run.
    pub status: String,

    /// SHA-256 of the configuration used.
    pub config_hash: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// Tables in the catalog.
    pub tables_total: usize,

    /// Tables whose destination was replaced.
    pub tables_completed: usize,

    pub tables_failed: usize,
    pub tables_cancelled: usize,

    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_failed: u64,

    /// Average write throughput (rows/second).
    pub rows_per_second: i64,

    /// Token cache counters.
    pub token_cache: CacheStats,

    /// Per-table reports in table order.
    pub tables: Vec<TableReport>,

    /// Resolved plan, filled in for dry runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<TablePlan>,
}

/// Planned migration of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePlan {
    /// `dataset.table`.
    pub table: String,
    /// Source table as `schema.table`.
    pub source: String,
    /// Approximate source row count.
    pub estimated_rows: i64,
    pub columns: Vec<ColumnPlan>,
    /// Why the table cannot be migrated, if it cannot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Planned handling of one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnPlan {
    pub source: String,
    pub target: String,
    pub target_type: String,
    pub strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Connectivity of each external dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,

    pub dlp_service: String,
    pub dlp_connected: bool,
    pub dlp_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dlp_error: Option<String>,

    pub policy_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_error: Option<String>,

    pub target_kind: String,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,

    pub healthy: bool,
}

/// Source and destination row counts for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableValidation {
    pub table: String,
    pub source_rows: i64,
    /// `None` when the destination table does not exist.
    pub target_rows: Option<i64>,
    pub matches: bool,
}

impl Orchestrator {
    /// Create an orchestrator with the drivers named by the configuration.
    pub async fn new(config: Config) -> Result<Self> {
        let reader = source_from_config(&config).await?;
        let writer = target_from_config(&config).await?;
        let service = service_from_config(&config.dlp, config.target.project.as_deref())?;
        Ok(Self::with_components(config, reader, writer, service))
    }

    /// Create an orchestrator over explicit drivers.
    pub fn with_components(
        config: Config,
        reader: Arc<dyn SourceReader>,
        writer: Arc<dyn TargetWriter>,
        service: Arc<dyn DeidService>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            reader,
            writer,
            service,
            policy: None,
        }
    }

    /// Use `policy` instead of loading the configured policy document.
    pub fn with_policy(mut self, policy: PolicyDocument) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn load_policy(&self) -> Result<PolicyDocument> {
        match &self.policy {
            Some(doc) => Ok(doc.clone()),
            None => PolicyDocument::load(&self.config.dlp.policy).await,
        }
    }

    async fn discover(&self, policy: &PolicyDocument) -> Result<TableCatalog> {
        TableCatalog::discover(
            self.reader.as_ref(),
            &self.config.source.schema,
            &self.config.target.dataset,
            &self.config.migration.excluded_tables,
            policy,
        )
        .await
    }

    /// Reject column renames that cannot apply to the discovered catalog.
    ///
    /// Checked before any table starts, so a bad rename aborts the run
    /// instead of failing a single table.
    fn check_renames(&self, catalog: &TableCatalog) -> Result<()> {
        for (table, renames) in &self.config.migration.column_renames {
            let entry = catalog
                .entries()
                .iter()
                .find(|e| &e.table.name == table)
                .ok_or_else(|| {
                    MigrateError::Config(format!(
                        "column_renames names unknown table '{}'",
                        table
                    ))
                })?;
            if let Err(e) = RowProjector::new(entry, Some(renames)) {
                if e.scope() == ErrorScope::Run {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Run the import.
    ///
    /// Table failures do not make this return an error; they are recorded in
    /// the result. Use [`MigrationResult::ensure_success`] to turn them into
    /// one. Errors returned here abort the whole run (configuration, policy,
    /// source discovery).
    pub async fn run(&self, cancel: CancellationToken, dry_run: bool) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting import run: {}", run_id);

        info!("Phase 1: Loading policy and discovering tables");
        let policy = self.load_policy().await?;
        let catalog = self.discover(&policy).await?;
        self.check_renames(&catalog)?;
        info!(
            "{} tables to import into dataset '{}'",
            catalog.len(),
            self.config.target.dataset
        );

        let tokenizer = Arc::new(Tokenizer::new(
            self.service.clone(),
            TokenizerConfig::from_config(&self.config.migration),
            cancel.clone(),
        ));

        let tables_total = catalog.len();
        let (reports, plan) = if dry_run {
            info!("Dry run: skipping data transfer");
            (Vec::new(), self.plan_catalog(&catalog))
        } else {
            info!("Phase 2: Transferring tables");
            let reports = self.run_tables(catalog, tokenizer.clone(), &cancel).await;
            (reports, Vec::new())
        };

        let completed_at = Utc::now();
        let mut result = MigrationResult {
            run_id,
            status: String::new(),
            config_hash: self.config.hash(),
            duration_seconds: started.elapsed().as_secs_f64(),
            started_at,
            completed_at,
            tables_total,
            tables_completed: 0,
            tables_failed: 0,
            tables_cancelled: 0,
            rows_read: 0,
            rows_written: 0,
            rows_failed: 0,
            rows_per_second: 0,
            token_cache: tokenizer.cache_stats(),
            tables: reports,
            plan,
        };
        result.summarize(dry_run);

        info!(
            "Import {}: {}/{} tables, {} rows in {:.1}s ({} rows/s)",
            result.status,
            result.tables_completed,
            result.tables_total,
            result.rows_written,
            result.duration_seconds,
            result.rows_per_second
        );
        Ok(result)
    }

    /// Run every catalog table through a [`TableJob`], at most `workers` at a time.
    async fn run_tables(
        &self,
        catalog: TableCatalog,
        tokenizer: Arc<Tokenizer>,
        cancel: &CancellationToken,
    ) -> Vec<TableReport> {
        let workers = self.config.migration.get_workers().max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let settings = JobSettings::from_config(&self.config.migration);

        info!("Transferring {} tables with {} workers", catalog.len(), workers);

        let mut reports = Vec::with_capacity(catalog.len());
        let mut handles = Vec::new();

        for entry in catalog.into_entries() {
            let identity = entry.identity.clone();
            if cancel.is_cancelled() {
                reports.push(TableReport::cancelled(&identity));
                continue;
            }

            let renames = self.config.migration.column_renames.get(&entry.table.name);
            let job = match TableJob::new(
                entry,
                renames,
                self.reader.clone(),
                tokenizer.clone(),
                self.writer.clone(),
                settings,
            ) {
                Ok(job) => job,
                Err(e) => {
                    error!("{}: {}", identity, e);
                    reports.push(TableReport::failed(&identity, &e));
                    continue;
                }
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                info!("Cancellation requested, not starting {}", identity);
                reports.push(TableReport::cancelled(&identity));
                continue;
            };

            let job_cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                job.execute(job_cancel).await
            });
            handles.push((identity, handle));
        }

        for (identity, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("{}: task panicked - {}", identity, e);
                    let err = MigrateError::sink(&identity, format!("task panicked: {}", e));
                    reports.push(TableReport::failed(&identity, &err));
                }
            }
        }

        reports.sort_by(|a, b| a.table.cmp(&b.table));
        reports
    }

    /// Describe what a run would do without moving any rows.
    pub async fn plan(&self) -> Result<Vec<TablePlan>> {
        let policy = self.load_policy().await?;
        let catalog = self.discover(&policy).await?;
        self.check_renames(&catalog)?;
        Ok(self.plan_catalog(&catalog))
    }

    fn plan_catalog(&self, catalog: &TableCatalog) -> Vec<TablePlan> {
        catalog
            .entries()
            .iter()
            .map(|entry| {
                let renames = self.config.migration.column_renames.get(&entry.table.name);
                let mut plan = TablePlan {
                    table: entry.identity.to_string(),
                    source: entry.table.full_name(),
                    estimated_rows: entry.table.row_count,
                    columns: Vec::new(),
                    error: None,
                };

                let checked = check_schema(&entry.identity, &entry.table)
                    .and_then(|_| RowProjector::new(entry, renames));
                let projector = match checked {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("{}: {}", entry.identity, e);
                        plan.error = Some(e.to_string());
                        return plan;
                    }
                };

                plan.columns = projector
                    .schema()
                    .fields
                    .iter()
                    .map(|field| {
                        let rule = entry.policy.rule(&field.source_column);
                        ColumnPlan {
                            source: field.source_column.clone(),
                            target: field.name.clone(),
                            target_type: field.field_type.to_string(),
                            strategy: rule
                                .map(|r| r.strategy.name())
                                .unwrap_or("none")
                                .to_string(),
                            domain: rule.map(|r| r.domain.as_key()),
                        }
                    })
                    .collect();
                plan
            })
            .collect()
    }

    /// Test connectivity to the source, the de-identification service and
    /// the destination, and that the policy document loads.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let (source_connected, source_latency_ms, source_error) =
            timed(self.reader.test_connection()).await;
        let (dlp_connected, dlp_latency_ms, dlp_error) = timed(self.service.health_check()).await;
        let (policy_loaded, _, policy_error) = timed(self.load_policy()).await;
        let (target_connected, target_latency_ms, target_error) =
            timed(self.writer.test_connection()).await;

        Ok(HealthCheckResult {
            healthy: source_connected && dlp_connected && policy_loaded && target_connected,
            source_connected,
            source_latency_ms,
            source_error,
            dlp_service: self.service.name().to_string(),
            dlp_connected,
            dlp_latency_ms,
            dlp_error,
            policy_loaded,
            policy_error,
            target_kind: self.writer.kind().to_string(),
            target_connected,
            target_latency_ms,
            target_error,
        })
    }

    /// Compare source and destination row counts for every catalog table.
    pub async fn validate(&self) -> Result<Vec<TableValidation>> {
        let catalog = self.discover(&PolicyDocument::default()).await?;
        let mut results = Vec::with_capacity(catalog.len());

        for entry in catalog.entries() {
            let source_rows = self
                .reader
                .row_count(&entry.table.schema, &entry.table.name)
                .await?;
            let target_rows = self.writer.row_count(&entry.identity).await?;
            let matches = target_rows == Some(source_rows);

            if matches {
                info!("{}: {} rows (match)", entry.identity, source_rows);
            } else {
                warn!(
                    "{}: source={} target={} (MISMATCH)",
                    entry.identity,
                    source_rows,
                    target_rows.map_or_else(|| "missing".to_string(), |n| n.to_string())
                );
            }

            results.push(TableValidation {
                table: entry.identity.to_string(),
                source_rows,
                target_rows,
                matches,
            });
        }

        Ok(results)
    }
}

/// Await a check, returning (ok, latency in ms, error message).
async fn timed<T>(check: impl std::future::Future<Output = Result<T>>) -> (bool, u64, Option<String>) {
    let started = Instant::now();
    let result = check.await;
    let elapsed = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => (true, elapsed, None),
        Err(e) => (false, elapsed, Some(e.to_string())),
    }
}

impl MigrationResult {
    fn summarize(&mut self, dry_run: bool) {
        for report in &self.tables {
            match report.status {
                status if status.is_committed() => self.tables_completed += 1,
                TableStatus::Cancelled => self.tables_cancelled += 1,
                _ => self.tables_failed += 1,
            }
            self.rows_read += report.rows_read;
            self.rows_written += report.rows_written;
            self.rows_failed += report.rows_failed;
        }

        self.rows_per_second = if self.duration_seconds > 0.0 {
            (self.rows_written as f64 / self.duration_seconds) as i64
        } else {
            0
        };

        let with_errors = self
            .tables
            .iter()
            .any(|r| r.status == TableStatus::CompletedWithErrors);
        self.status = if dry_run {
            "dry_run"
        } else if self.tables_cancelled > 0 {
            "cancelled"
        } else if self.tables_failed > 0 {
            "failed"
        } else if with_errors {
            "completed_with_errors"
        } else {
            "completed"
        }
        .to_string();
    }

    /// Names of tables that failed.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|r| r.status == TableStatus::Failed)
            .map(|r| r.table.as_str())
            .collect()
    }

    /// Err when any table failed or the run was cancelled.
    pub fn ensure_success(&self) -> Result<()> {
        if self.tables_failed > 0 {
            return Err(MigrateError::TablesFailed {
                failed: self.tables_failed,
                total: self.tables_total,
                tables: self.failed_tables().join(", "),
            });
        }
        if self.tables_cancelled > 0 {
            return Err(MigrateError::Cancelled);
        }
        Ok(())
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, SourceType, SqlValue, Table, TableIdentity};
    use crate::drivers::{MemoryReader, MemoryWriter};
    use crate::tokenize::LocalDeidService;

    fn config() -> Config {
        serde_yaml::from_str(
            r#"
source:
  host: localhost
  database: crm
  user: reader
target:
  type: jsonl
  dataset: analytics
  output_dir: /tmp/unused
dlp:
  key: test-key
  policy:
    bucket: /nonexistent
    object: policy.yaml
migration:
  workers: 2
  page_size: 2
  max_attempts: 2
  retry_base_delay_ms: 1
"#,
        )
        .unwrap()
    }

    fn customers() -> Table {
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

    fn policy() -> PolicyDocument {
        PolicyDocument::parse(
            r#"
tables:
  - table: customers
    columns:
      ssn: deterministic_token
"#,
        )
        .unwrap()
    }

    fn orchestrator(reader: MemoryReader, writer: Arc<MemoryWriter>) -> Orchestrator {
        orchestrator_with(config(), reader, writer)
    }

    fn orchestrator_with(
        config: Config,
        reader: MemoryReader,
        writer: Arc<MemoryWriter>,
    ) -> Orchestrator {
        let service = Arc::new(LocalDeidService::new("test-key", "TOK_").unwrap());
        Orchestrator::with_components(config, Arc::new(reader), writer, service)
            .with_policy(policy())
    }

    fn renames(table: &str, from: &str, to: &str) -> Config {
        let mut config = config();
        config
            .migration
            .column_renames
            .entry(table.to_string())
            .or_default()
            .insert(from.to_string(), to.to_string());
        config
    }

    fn reader() -> MemoryReader {
        MemoryReader::new().with_table(
            customers(),
            vec![
                vec![SqlValue::I64(1), SqlValue::from("Ann"), SqlValue::from("123-45-6789")],
                vec![SqlValue::I64(2), SqlValue::from("Bob"), SqlValue::Null],
                vec![SqlValue::I64(3), SqlValue::from("Cy"), SqlValue::from("123-45-6789")],
            ],
        )
    }

    #[tokio::test]
    async fn test_run_reports_every_table() {
        let writer = Arc::new(MemoryWriter::new());
        let result = orchestrator(reader(), writer.clone())
            .run(CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(result.status, "completed");
        assert_eq!(result.tables_total, 1);
        assert_eq!(result.tables_completed, 1);
        assert_eq!(result.rows_written, 3);
        assert!(result.ensure_success().is_ok());

        let rows = writer
            .rows(&TableIdentity::new("analytics", "customers"))
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].values[2], rows[2].values[2]);
        assert_eq!(rows[1].values[2], SqlValue::Null);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let writer = Arc::new(MemoryWriter::new());
        let result = orchestrator(reader(), writer.clone())
            .run(CancellationToken::new(), true)
            .await
            .unwrap();

        assert_eq!(result.status, "dry_run");
        assert_eq!(writer.begin_count(), 0);
        assert_eq!(result.plan.len(), 1);
        let ssn = &result.plan[0].columns[2];
        assert_eq!(ssn.strategy, "deterministic_token");
        assert_eq!(ssn.target_type, "STRING");
    }

    #[tokio::test]
    async fn test_plan_reports_schema_errors_per_table() {
        let mut no_pk = customers();
        no_pk.name = "audit".into();
        no_pk.primary_key.clear();
        let reader = reader().with_table(no_pk, Vec::new());

        let plan = orchestrator(reader, Arc::new(MemoryWriter::new()))
            .plan()
            .await
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].table, "analytics.audit");
        assert!(plan[0].error.is_some());
        assert!(plan[1].error.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let writer = Arc::new(MemoryWriter::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator(reader(), writer.clone())
            .run(cancel, false)
            .await
            .unwrap();
        assert_eq!(result.status, "cancelled");
        assert_eq!(result.tables_cancelled, 1);
        assert_eq!(writer.begin_count(), 0);
        assert!(matches!(
            result.ensure_success(),
            Err(MigrateError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_health_check_reports_each_dependency() {
        let reader = reader();
        reader.set_unreachable(true);
        let result = orchestrator(reader, Arc::new(MemoryWriter::new()))
            .health_check()
            .await
            .unwrap();

        assert!(!result.healthy);
        assert!(!result.source_connected);
        assert!(result.source_error.is_some());
        assert!(result.dlp_connected);
        assert!(result.policy_loaded);
        assert!(result.target_connected);
    }

    #[tokio::test]
    async fn test_validate_compares_counts() {
        let writer = Arc::new(MemoryWriter::new());
        let orch = orchestrator(reader(), writer.clone());

        let before = orch.validate().await.unwrap();
        assert_eq!(before[0].target_rows, None);
        assert!(!before[0].matches);

        orch.run(CancellationToken::new(), false).await.unwrap();
        let after = orch.validate().await.unwrap();
        assert_eq!(after[0].source_rows, 3);
        assert_eq!(after[0].target_rows, Some(3));
        assert!(after[0].matches);
    }

    #[tokio::test]
    async fn test_rename_of_unknown_column_aborts_run() {
        let writer = Arc::new(MemoryWriter::new());
        let orch = orchestrator_with(
            renames("customers", "ghost_column", "x"),
            reader(),
            writer.clone(),
        );

        let err = orch.run(CancellationToken::new(), false).await.unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
        assert!(err.to_string().contains("ghost_column"));
        assert_eq!(writer.begin_count(), 0);
        assert!(matches!(orch.plan().await, Err(MigrateError::Config(_))));
    }

    #[tokio::test]
    async fn test_rename_of_unknown_table_aborts_run() {
        let orch = orchestrator_with(
            renames("invoices", "id", "invoice_id"),
            reader(),
            Arc::new(MemoryWriter::new()),
        );

        let err = orch.run(CancellationToken::new(), true).await.unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
        assert!(err.to_string().contains("'invoices'"));
    }

    #[tokio::test]
    async fn test_colliding_renames_abort_run() {
        let orch = orchestrator_with(
            renames("customers", "name", "ssn"),
            reader(),
            Arc::new(MemoryWriter::new()),
        );

        let err = orch.run(CancellationToken::new(), false).await.unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG_ERROR);
    }

    #[tokio::test]
    async fn test_commit_failure_does_not_touch_sibling_table() {
        let mut orders = customers();
        orders.name = "orders".into();
        let reader = reader().with_table(
            orders,
            vec![vec![SqlValue::I64(7), SqlValue::from("Dee"), SqlValue::Null]],
        );
        let writer = Arc::new(MemoryWriter::new());
        writer.fail_commits_for("orders");

        let result = orchestrator(reader, writer.clone())
            .run(CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(result.status, "failed");
        assert_eq!(result.tables_completed, 1);
        assert_eq!(result.tables_failed, 1);
        assert_eq!(result.failed_tables(), vec!["analytics.orders"]);

        let orders = result
            .tables
            .iter()
            .find(|r| r.table == "analytics.orders")
            .unwrap();
        assert_eq!(orders.status, TableStatus::Failed);
        assert_eq!(orders.error_code, Some(crate::error::EXIT_SINK_ERROR));
        assert!(writer
            .rows(&TableIdentity::new("analytics", "orders"))
            .is_none());
        assert_eq!(
            writer
                .rows(&TableIdentity::new("analytics", "customers"))
                .unwrap()
                .len(),
            3
        );
        assert!(matches!(
            result.ensure_success(),
            Err(MigrateError::TablesFailed { failed: 1, total: 2, .. })
        ));
    }
}
