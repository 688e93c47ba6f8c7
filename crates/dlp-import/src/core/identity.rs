//! Composite identities used to key every pipeline stage.
//!
//! [`TableIdentity`] partitions the row streams and names the destination
//! table. [`ColumnKey`] and [`TokenDomain`] scope token derivation so that the
//! same raw value in two different columns never yields the same token unless
//! the policy explicitly puts both columns in a shared domain.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a migrated table: destination dataset plus table name.
///
/// Ordering is lexicographic on `(dataset, table)` so catalogs and reports
/// iterate in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableIdentity {
    /// Destination dataset (target schema).
    pub dataset: String,
    /// Table name, shared by source and destination.
    pub table: String,
}

impl TableIdentity {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Key for one column of this table.
    pub fn column(&self, column: impl Into<String>) -> ColumnKey {
        ColumnKey {
            table: self.clone(),
            column: column.into(),
        }
    }
}

impl fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// A single column of a single table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnKey {
    pub table: TableIdentity,
    pub column: String,
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Scope in which a token is derived.
///
/// Tokens are a function of `(domain, strategy, value)`. The default domain is
/// the column itself; a named shared domain lets foreign keys keep joining to
/// the primary key they reference after tokenization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum TokenDomain {
    /// Tokens are private to one column.
    Column(ColumnKey),
    /// Tokens are shared by every column naming this domain.
    Shared(String),
}

impl TokenDomain {
    /// Stable string form sent to de-identification services.
    pub fn as_key(&self) -> String {
        match self {
            TokenDomain::Column(key) => format!("col:{}", key),
            TokenDomain::Shared(name) => format!("shared:{}", name),
        }
    }
}

impl fmt::Display for TokenDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_display_forms() {
        let id = TableIdentity::new("analytics", "customers");
        assert_eq!(id.to_string(), "analytics.customers");
        assert_eq!(id.column("ssn").to_string(), "analytics.customers.ssn");
    }

    #[test]
    fn test_domain_keys_distinguish_columns() {
        let id = TableIdentity::new("analytics", "customers");
        let a = TokenDomain::Column(id.column("ssn"));
        let b = TokenDomain::Column(id.column("tax_id"));
        assert_ne!(a.as_key(), b.as_key());
        assert_eq!(a.as_key(), "col:analytics.customers.ssn");
        assert_eq!(TokenDomain::Shared("email".into()).as_key(), "shared:email");
    }

    #[test]
    fn test_identity_ordering_is_stable() {
        let set: BTreeSet<_> = [
            TableIdentity::new("b", "a"),
            TableIdentity::new("a", "z"),
            TableIdentity::new("a", "b"),
        ]
        .into_iter()
        .collect();
        let names: Vec<_> = set.iter().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["a.b", "a.z", "b.a"]);
    }
}
