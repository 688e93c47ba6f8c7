//! Configuration type definitions with auto-tuning based on system resources.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len().max(1);

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration.
    pub source: SourceConfig,

    /// Destination configuration.
    pub target: TargetConfig,

    /// De-identification service and policy location.
    pub dlp: DlpConfig,

    /// Pipeline behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// Source database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (only "postgres" is supported).
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Source schema to enumerate (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode: disable, verify-full (default: disable).
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Destination configuration.
///
/// `dataset` names the destination schema; each source table lands in
/// `dataset.table`. Connection fields are only used by the "postgres" writer,
/// `output_dir` only by the "jsonl" writer.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Writer type: "postgres" or "jsonl".
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Destination dataset.
    pub dataset: String,

    /// Project the dataset belongs to; passed to the de-identification service.
    #[serde(default)]
    pub project: Option<String>,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_disable")]
    pub ssl_mode: String,

    /// Output directory for the "jsonl" writer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("dataset", &self.dataset)
            .field("project", &self.project)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

/// Where the policy document lives.
///
/// A `bucket` starting with `http://` or `https://` is fetched over HTTP as
/// `<bucket>/<object>`; anything else is a local directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLocation {
    pub bucket: String,
    pub object: String,
}

impl PolicyLocation {
    pub fn is_remote(&self) -> bool {
        self.bucket.starts_with("http://") || self.bucket.starts_with("https://")
    }

    /// URL or path of the document.
    pub fn uri(&self) -> String {
        if self.is_remote() {
            format!(
                "{}/{}",
                self.bucket.trim_end_matches('/'),
                self.object.trim_start_matches('/')
            )
        } else {
            PathBuf::from(&self.bucket)
                .join(&self.object)
                .display()
                .to_string()
        }
    }
}

/// De-identification configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DlpConfig {
    /// Service type: "local" (in-process HMAC) or "http".
    #[serde(default = "default_local")]
    pub service: String,

    /// Endpoint for the "http" service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bearer token for the "http" service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Token key for the "local" service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Environment variable holding the token key (used when `key` is unset).
    #[serde(default = "default_key_env")]
    pub key_env: String,

    /// Prefix for deterministic tokens (default: "TOK_").
    #[serde(default = "default_token_prefix")]
    pub token_prefix: String,

    /// Location of the column policy document.
    pub policy: PolicyLocation,

    /// Per-call timeout for the "http" service in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl DlpConfig {
    /// Resolve the local token key from `key` or the `key_env` variable.
    pub fn resolve_key(&self) -> Option<String> {
        self.key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.key_env).ok().filter(|k| !k.is_empty()))
    }
}

impl fmt::Debug for DlpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DlpConfig")
            .field("service", &self.service)
            .field("endpoint", &self.endpoint)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("key_env", &self.key_env)
            .field("token_prefix", &self.token_prefix)
            .field("policy", &self.policy)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Pipeline behavior configuration.
/// Performance-related fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Source tables to skip (exact names).
    #[serde(default)]
    pub excluded_tables: Vec<String>,

    /// Destination column renames per table: `table -> { source_column: target_column }`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_renames: BTreeMap<String, BTreeMap<String, String>>,

    /// Rows per source page. Auto-tuned based on RAM if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,

    /// Tables processed concurrently. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Pages buffered ahead of the tokenizer per table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_ahead_pages: Option<usize>,

    /// Maximum source connections. Auto-tuned based on workers if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_connections: Option<usize>,

    /// Maximum target connections. Auto-tuned based on workers if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_target_connections: Option<usize>,

    /// Values per de-identification call (default: 500).
    #[serde(default = "default_tokenize_batch_size")]
    pub tokenize_batch_size: usize,

    /// Concurrent de-identification calls across all tables (default: 8).
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_tokenize_calls: usize,

    /// Client-side rate limit for de-identification calls (default: 50/s).
    #[serde(default = "default_requests_per_second")]
    pub tokenize_requests_per_second: u32,

    /// Tokens kept in the run-scoped cache, least recently used evicted
    /// first; 0 disables caching (default: 200000).
    #[serde(default = "default_token_cache_entries")]
    pub token_cache_entries: usize,

    /// Total attempts per page fetch or service call (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts in milliseconds, doubled each retry (default: 200).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Abort a table on its first row error (default: true).
    #[serde(default = "default_true")]
    pub fail_fast: bool,

    /// Maximum row failures recorded per table report (default: 100).
    #[serde(default = "default_max_reported_failures")]
    pub max_reported_failures: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            excluded_tables: Vec::new(),
            column_renames: BTreeMap::new(),
            page_size: None,
            workers: None,
            read_ahead_pages: None,
            max_source_connections: None,
            max_target_connections: None,
            tokenize_batch_size: default_tokenize_batch_size(),
            max_concurrent_tokenize_calls: default_max_concurrent_calls(),
            tokenize_requests_per_second: default_requests_per_second(),
            token_cache_entries: default_token_cache_entries(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            fail_fast: default_true(),
            max_reported_failures: default_max_reported_failures(),
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let ram_gb = resources.total_memory_gb;
        let cores = resources.cpu_cores;

        // Workers: one table per core, at least 2 and at most 16
        let workers = *self.workers.get_or_insert_with(|| cores.clamp(2, 16));

        // Page size: 5K rows, +5K per 8GB of RAM, cap at 50K
        if self.page_size.is_none() {
            let page = 5_000 + ((ram_gb / 8.0) as usize * 5_000);
            self.page_size = Some(page.clamp(5_000, 50_000));
        }

        if self.read_ahead_pages.is_none() {
            self.read_ahead_pages = Some(((ram_gb / 8.0) as usize).clamp(2, 8));
        }

        // Connection pool sizes: scale with workers
        if self.max_source_connections.is_none() {
            self.max_source_connections = Some((workers * 2).clamp(4, 32));
        }
        if self.max_target_connections.is_none() {
            self.max_target_connections = Some((workers * 2).clamp(4, 32));
        }

        info!(
            "Auto-tuned config: workers={}, page_size={}, read_ahead={}, source_conns={}, target_conns={}",
            workers,
            self.get_page_size(),
            self.get_read_ahead_pages(),
            self.get_max_source_connections(),
            self.get_max_target_connections(),
        );

        self
    }

    // Accessors returning the effective value when auto-tuning was not applied.

    pub fn get_page_size(&self) -> usize {
        self.page_size.unwrap_or(10_000)
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(4)
    }

    pub fn get_read_ahead_pages(&self) -> usize {
        self.read_ahead_pages.unwrap_or(2)
    }

    pub fn get_max_source_connections(&self) -> usize {
        self.max_source_connections.unwrap_or(8)
    }

    pub fn get_max_target_connections(&self) -> usize {
        self.max_target_connections.unwrap_or(8)
    }
}

// Default value functions for serde
fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_local() -> String {
    "local".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_key_env() -> String {
    "DLP_TOKEN_KEY".to_string()
}

fn default_token_prefix() -> String {
    "TOK_".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_tokenize_batch_size() -> usize {
    500
}

fn default_max_concurrent_calls() -> usize {
    8
}

fn default_requests_per_second() -> u32 {
    50
}

fn default_token_cache_entries() -> usize {
    200_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_max_reported_failures() -> usize {
    100
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_tuning_respects_explicit_values() {
        let config = MigrationConfig {
            workers: Some(3),
            page_size: Some(123),
            ..Default::default()
        };
        let tuned = config.with_auto_tuning(&SystemResources {
            total_memory_gb: 64.0,
            cpu_cores: 32,
        });
        assert_eq!(tuned.get_workers(), 3);
        assert_eq!(tuned.get_page_size(), 123);
        assert_eq!(tuned.get_max_source_connections(), 6);
    }

    #[test]
    fn test_auto_tuning_bounds() {
        let tuned = MigrationConfig::default().with_auto_tuning(&SystemResources {
            total_memory_gb: 1.0,
            cpu_cores: 1,
        });
        assert_eq!(tuned.get_workers(), 2);
        assert_eq!(tuned.get_page_size(), 5_000);
        assert_eq!(tuned.get_read_ahead_pages(), 2);
        assert_eq!(tuned.get_max_target_connections(), 4);
    }

    #[test]
    fn test_policy_location_uri() {
        let local = PolicyLocation {
            bucket: "/etc/dlp".into(),
            object: "policy.yaml".into(),
        };
        assert!(!local.is_remote());
        assert_eq!(local.uri(), "/etc/dlp/policy.yaml");

        let remote = PolicyLocation {
            bucket: "https://config.example.com/dlp/".into(),
            object: "/policy.yaml".into(),
        };
        assert!(remote.is_remote());
        assert_eq!(remote.uri(), "https://config.example.com/dlp/policy.yaml");
    }
}
