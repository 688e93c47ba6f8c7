//! Column-level de-identification policy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::identity::{TableIdentity, TokenDomain};

/// How a sensitive column value is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum DeidStrategy {
    /// Value passes through unchanged.
    #[default]
    None,
    /// Characters are replaced by `mask_char`, keeping the last `keep_last`.
    Mask { mask_char: char, keep_last: usize },
    /// Value is replaced by a keyed surrogate token.
    DeterministicToken,
    /// Value is replaced by a keyed surrogate with the same length and
    /// character classes.
    FormatPreserving,
}

impl DeidStrategy {
    /// Stable name used in policy documents and service requests.
    pub fn name(&self) -> &'static str {
        match self {
            DeidStrategy::None => "none",
            DeidStrategy::Mask { .. } => "mask",
            DeidStrategy::DeterministicToken => "deterministic_token",
            DeidStrategy::FormatPreserving => "format_preserving",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, DeidStrategy::None)
    }

    /// Default mask parameters.
    pub fn mask() -> Self {
        DeidStrategy::Mask {
            mask_char: '*',
            keep_last: 0,
        }
    }
}

impl fmt::Display for DeidStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeidStrategy::Mask {
                mask_char,
                keep_last,
            } => write!(f, "mask('{}', keep_last={})", mask_char, keep_last),
            other => f.write_str(other.name()),
        }
    }
}

/// Resolved rule for one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRule {
    pub strategy: DeidStrategy,
    /// Token domain; the column's own key unless a shared domain was named.
    pub domain: TokenDomain,
}

/// Per-table mapping from column name to de-identification rule.
///
/// Columns absent from the map have strategy [`DeidStrategy::None`].
/// Read-only once the catalog has resolved it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPolicy {
    rules: BTreeMap<String, ColumnRule>,
}

impl ColumnPolicy {
    /// A policy that leaves every column untouched.
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Builder used by the catalog and tests.
    pub fn with_rule(
        mut self,
        table: &TableIdentity,
        column: impl Into<String>,
        strategy: DeidStrategy,
        shared_domain: Option<&str>,
    ) -> Self {
        let column = column.into();
        if strategy.is_none() {
            self.rules.remove(&column);
            return self;
        }
        let domain = match shared_domain {
            Some(name) => TokenDomain::Shared(name.to_string()),
            None => TokenDomain::Column(table.column(column.clone())),
        };
        self.rules.insert(column, ColumnRule { strategy, domain });
        self
    }

    /// Rule for a column, if it is selected for de-identification.
    pub fn rule(&self, column: &str) -> Option<&ColumnRule> {
        self.rules.get(column)
    }

    /// Strategy for a column (`None` when unlisted).
    pub fn strategy(&self, column: &str) -> DeidStrategy {
        self.rule(column)
            .map(|r| r.strategy)
            .unwrap_or(DeidStrategy::None)
    }

    /// True when no column is selected.
    pub fn is_passthrough(&self) -> bool {
        self.rules.is_empty()
    }

    /// Selected columns and their rules, ordered by column name.
    pub fn rules(&self) -> impl Iterator<Item = (&str, &ColumnRule)> {
        self.rules.iter().map(|(c, r)| (c.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
