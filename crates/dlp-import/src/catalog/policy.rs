//! Policy document parsing and loading.
//!
//! The document lists, per table, which columns are de-identified and how:
//!
//! ```yaml
//! tables:
//!   - table: customers
//!     columns:
//!       ssn: deterministic_token
//!       email: { strategy: deterministic_token, domain: email }
//!       phone: { strategy: mask, keep_last: 4 }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PolicyLocation;
use crate::core::DeidStrategy;
use crate::error::{MigrateError, Result};

/// Timeout for fetching a remote policy document.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Parsed policy document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub tables: Vec<TablePolicySpec>,
}

/// Policy entry for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePolicySpec {
    pub table: String,
    #[serde(default)]
    pub columns: BTreeMap<String, RuleSpec>,
}

/// A column rule, either a bare strategy name or a full mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleSpec {
    Short(String),
    Full(FullRuleSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FullRuleSpec {
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_char: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_last: Option<usize>,
}

impl RuleSpec {
    /// Resolve to a strategy and optional shared domain name.
    pub fn resolve(&self) -> Result<(DeidStrategy, Option<&str>)> {
        match self {
            RuleSpec::Short(name) => Ok((parse_strategy(name, None, None)?, None)),
            RuleSpec::Full(full) => {
                if full.domain.as_deref() == Some("") {
                    return Err(MigrateError::Config(
                        "policy rule has an empty domain name".into(),
                    ));
                }
                let strategy = parse_strategy(&full.strategy, full.mask_char, full.keep_last)?;
                if !matches!(strategy, DeidStrategy::Mask { .. })
                    && (full.mask_char.is_some() || full.keep_last.is_some())
                {
                    return Err(MigrateError::Config(format!(
                        "mask_char/keep_last only apply to the mask strategy, not '{}'",
                        full.strategy
                    )));
                }
                Ok((strategy, full.domain.as_deref()))
            }
        }
    }
}

fn parse_strategy(
    name: &str,
    mask_char: Option<char>,
    keep_last: Option<usize>,
) -> Result<DeidStrategy> {
    match name.trim().to_lowercase().as_str() {
        "none" => Ok(DeidStrategy::None),
        "mask" => Ok(DeidStrategy::Mask {
            mask_char: mask_char.unwrap_or('*'),
            keep_last: keep_last.unwrap_or(0),
        }),
        "deterministic_token" | "token" => Ok(DeidStrategy::DeterministicToken),
        "format_preserving" | "fpe" => Ok(DeidStrategy::FormatPreserving),
        other => Err(MigrateError::Config(format!(
            "Unknown de-identification strategy '{}'. Valid values: none, mask, deterministic_token, format_preserving",
            other
        ))),
    }
}

impl PolicyDocument {
    /// Parse a YAML (or JSON) policy document.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let doc: PolicyDocument = serde_yaml::from_str(text)
            .map_err(|e| MigrateError::Config(format!("invalid policy document: {}", e)))?;

        for spec in &doc.tables {
            for (column, rule) in &spec.columns {
                rule.resolve().map_err(|e| match e {
                    MigrateError::Config(msg) => MigrateError::Config(format!(
                        "policy for {}.{}: {}",
                        spec.table, column, msg
                    )),
                    other => other,
                })?;
            }
        }
        Ok(doc)
    }

    /// Fetch and parse the document at `location`.
    pub async fn load(location: &PolicyLocation) -> Result<Self> {
        let uri = location.uri();
        let text = if location.is_remote() {
            fetch_remote(&uri).await?
        } else {
            tokio::fs::read_to_string(&uri).await.map_err(|e| {
                MigrateError::Config(format!("cannot read policy document {}: {}", uri, e))
            })?
        };

        let doc = Self::parse(&text)?;
        info!(
            "Loaded policy document {} ({} table entries)",
            uri,
            doc.tables.len()
        );
        Ok(doc)
    }

    /// Entry for `table`, matched case-insensitively.
    pub fn table(&self, table: &str) -> Option<&TablePolicySpec> {
        self.tables
            .iter()
            .find(|t| t.table.eq_ignore_ascii_case(table))
    }
}

async fn fetch_remote(url: &str) -> Result<String> {
    debug!("Fetching policy document from {}", url);
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| MigrateError::Config(format!("failed to build HTTP client: {}", e)))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| MigrateError::Config(format!("cannot fetch policy document {}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MigrateError::Config(format!(
            "cannot fetch policy document {} (status={})",
            url, status
        )));
    }

    response
        .text()
        .await
        .map_err(|e| MigrateError::Config(format!("cannot read policy document {}: {}", url, e)))
}
