//! Deterministic tokenization of policy-selected columns.
//!
//! - [`Tokenizer`]: batches, de-duplicates, caches and retries service calls
//! - [`CallGate`]: run-wide concurrency and rate limit for service calls
//! - [`LocalDeidService`]: in-process HMAC tokens
//! - [`HttpDeidService`]: remote de-identification endpoint

mod cache;
mod gate;
mod http;
mod local;

pub use cache::{CacheStats, TokenCache};
pub use gate::CallGate;
pub use http::HttpDeidService;
pub use local::{mask, LocalDeidService};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{DlpConfig, MigrationConfig};
use crate::core::{ColumnPolicy, DeidService, SourceRow, SqlValue, TokenRequest, TokenizedRow};
use crate::error::{MigrateError, Result};
use crate::pipeline::RetryPolicy;

/// Result of tokenizing one row. A failed row never carries raw values.
pub type RowOutcome = Result<TokenizedRow>;

/// Tokenizer tuning.
#[derive(Debug, Clone, Copy)]
pub struct TokenizerConfig {
    /// Values per service call.
    pub batch_size: usize,
    /// In-flight calls across all tables.
    pub max_concurrent_calls: usize,
    /// Client-side call rate across all tables.
    pub requests_per_second: u32,
    /// Tokens kept in the run-scoped cache; 0 disables caching.
    pub cache_entries: usize,
    pub retry: RetryPolicy,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self::from_config(&MigrationConfig::default())
    }
}

impl TokenizerConfig {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            batch_size: config.tokenize_batch_size.max(1),
            max_concurrent_calls: config.max_concurrent_tokenize_calls,
            requests_per_second: config.tokenize_requests_per_second,
            cache_entries: config.token_cache_entries,
            retry: RetryPolicy::from_config(config),
        }
    }
}

/// Replaces sensitive column values with tokens from a [`DeidService`].
///
/// One tokenizer is shared by every table stream of a run; its cache and
/// call gate are run-scoped.
pub struct Tokenizer {
    service: Arc<dyn DeidService>,
    cache: TokenCache,
    gate: CallGate,
    config: TokenizerConfig,
    cancel: CancellationToken,
}

impl Tokenizer {
    pub fn new(
        service: Arc<dyn DeidService>,
        config: TokenizerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gate: CallGate::new(config.max_concurrent_calls, config.requests_per_second),
            cache: TokenCache::new(config.cache_entries),
            service,
            config,
            cancel,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Tokenize a single row.
    pub async fn tokenize_row(&self, policy: &ColumnPolicy, row: SourceRow) -> Result<TokenizedRow> {
        self.tokenize_rows(policy, vec![row])
            .await
            .pop()
            .unwrap_or_else(|| Err(MigrateError::deid_fatal("no outcome for row")))
    }

    /// Tokenize a page of rows from one table.
    ///
    /// Returns one outcome per input row, in input order. A row succeeds only
    /// if every selected non-NULL column received a token.
    pub async fn tokenize_rows(&self, policy: &ColumnPolicy, rows: Vec<SourceRow>) -> Vec<RowOutcome> {
        if policy.is_passthrough() {
            return rows.into_iter().map(|r| Ok(TokenizedRow::passthrough(r))).collect();
        }

        let plans: Vec<Vec<(usize, TokenRequest)>> =
            rows.iter().map(|row| plan_row(policy, row)).collect();

        // Resolve from cache, collect the rest once each.
        let mut resolved: HashMap<TokenRequest, String> = HashMap::new();
        let mut queued: HashSet<&TokenRequest> = HashSet::new();
        let mut pending: Vec<TokenRequest> = Vec::new();
        for req in plans.iter().flatten().map(|(_, r)| r) {
            if resolved.contains_key(req) || queued.contains(req) {
                continue;
            }
            match self.cache.get(req) {
                Some(token) => {
                    resolved.insert(req.clone(), token);
                }
                None => {
                    queued.insert(req);
                    pending.push(req.clone());
                }
            }
        }

        let mut failed: HashMap<TokenRequest, String> = HashMap::new();
        if !pending.is_empty() {
            let chunks: Vec<&[TokenRequest]> = pending.chunks(self.config.batch_size).collect();
            debug!(
                "tokenizing {} distinct values in {} calls",
                pending.len(),
                chunks.len()
            );
            let results = join_all(chunks.iter().map(|chunk| self.call(chunk))).await;

            for (chunk, result) in chunks.iter().zip(results) {
                match result {
                    Ok(tokens) => {
                        self.cache.insert_all(chunk, &tokens);
                        for (req, token) in chunk.iter().zip(tokens) {
                            resolved.insert(req.clone(), token);
                        }
                    }
                    Err(MigrateError::Cancelled) => {
                        return rows.iter().map(|_| Err(MigrateError::Cancelled)).collect();
                    }
                    Err(e) => {
                        let message = e.to_string();
                        for req in chunk.iter() {
                            failed.insert(req.clone(), message.clone());
                        }
                    }
                }
            }
        }

        rows.into_iter()
            .zip(plans)
            .map(|(row, plan)| apply_tokens(row, plan, &resolved, &failed))
            .collect()
    }

    /// One gated, retried service call.
    async fn call(&self, chunk: &[TokenRequest]) -> Result<Vec<String>> {
        self.config
            .retry
            .run("de-identification call", &self.cancel, |attempt| async move {
                let _permit = self.gate.acquire(&self.cancel).await?;
                if attempt > 1 {
                    debug!("retrying {} values (attempt {})", chunk.len(), attempt);
                }
                let tokens = self.service.tokenize(chunk).await?;
                if tokens.len() != chunk.len() {
                    return Err(MigrateError::deid_fatal(format!(
                        "service returned {} tokens for {} values",
                        tokens.len(),
                        chunk.len()
                    )));
                }
                Ok(tokens)
            })
            .await
    }
}

/// Token requests for every selected non-NULL column of a row.
fn plan_row(policy: &ColumnPolicy, row: &SourceRow) -> Vec<(usize, TokenRequest)> {
    row.iter()
        .enumerate()
        .filter_map(|(idx, (column, value))| {
            let rule = policy.rule(column)?;
            let value = value.canonical_string()?;
            Some((
                idx,
                TokenRequest {
                    domain: rule.domain.clone(),
                    strategy: rule.strategy,
                    value,
                },
            ))
        })
        .collect()
}

fn apply_tokens(
    row: SourceRow,
    plan: Vec<(usize, TokenRequest)>,
    resolved: &HashMap<TokenRequest, String>,
    failed: &HashMap<TokenRequest, String>,
) -> RowOutcome {
    if plan.is_empty() {
        return Ok(TokenizedRow::passthrough(row));
    }

    let SourceRow {
        table,
        offset,
        columns,
        mut values,
    } = row;
    let mut tokenized = Vec::with_capacity(plan.len());

    for (idx, req) in plan {
        match resolved.get(&req) {
            Some(token) => {
                values[idx] = SqlValue::Text(token.clone());
                tokenized.push(idx);
            }
            None => {
                let reason = failed
                    .get(&req)
                    .map(String::as_str)
                    .unwrap_or("no token returned");
                return Err(MigrateError::Tokenization {
                    table,
                    offset,
                    message: format!("column '{}': {}", columns[idx], reason),
                });
            }
        }
    }

    Ok(TokenizedRow {
        table,
        offset,
        columns,
        values,
        tokenized,
    })
}

/// Build the de-identification service named by the configuration.
pub fn service_from_config(
    dlp: &DlpConfig,
    project: Option<&str>,
) -> Result<Arc<dyn DeidService>> {
    match dlp.service.as_str() {
        "local" => {
            let key = dlp.resolve_key().ok_or_else(|| {
                MigrateError::Config(format!(
                    "the local de-identification service needs dlp.key or ${}",
                    dlp.key_env
                ))
            })?;
            info!("Using local HMAC de-identification service");
            Ok(Arc::new(LocalDeidService::new(
                key.into_bytes(),
                dlp.token_prefix.clone(),
            )?))
        }
        "http" => {
            let endpoint = dlp.endpoint.clone().ok_or_else(|| {
                MigrateError::Config("dlp.endpoint is required for the http service".into())
            })?;
            info!("Using HTTP de-identification service at {}", endpoint);
            Ok(Arc::new(HttpDeidService::new(
                endpoint,
                project.map(str::to_string),
                dlp.api_token.clone(),
                Duration::from_secs(dlp.request_timeout_secs),
            )?))
        }
        other => Err(MigrateError::Config(format!(
            "Unknown de-identification service '{}'. Supported: local, http",
            other
        ))),
    }
}
