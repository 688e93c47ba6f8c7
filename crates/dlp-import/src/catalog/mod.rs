//! Table discovery and per-table policy resolution.

mod policy;

pub use policy::{FullRuleSpec, PolicyDocument, RuleSpec, TablePolicySpec};

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::core::{ColumnPolicy, SourceReader, Table, TableIdentity};
use crate::error::{MigrateError, Result};

/// One table selected for migration.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub identity: TableIdentity,
    pub table: Table,
    pub policy: ColumnPolicy,
}

/// The set of tables a run migrates, in name order.
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    entries: Vec<CatalogEntry>,
}

impl TableCatalog {
    /// Enumerate source tables and resolve each table's column policy.
    pub async fn discover(
        reader: &dyn SourceReader,
        source_schema: &str,
        dataset: &str,
        excluded: &[String],
        policy: &PolicyDocument,
    ) -> Result<Self> {
        let tables = reader.list_tables(source_schema).await?;
        info!(
            "Found {} tables in source schema '{}'",
            tables.len(),
            source_schema
        );
        Self::resolve(tables, dataset, excluded, policy)
    }

    /// Build the catalog from already-listed tables.
    pub fn resolve(
        mut tables: Vec<Table>,
        dataset: &str,
        excluded: &[String],
        policy: &PolicyDocument,
    ) -> Result<Self> {
        tables.sort_by(|a, b| a.name.cmp(&b.name));

        let is_excluded =
            |name: &str| excluded.iter().any(|e| e.eq_ignore_ascii_case(name));

        for name in excluded {
            if !tables.iter().any(|t| t.name.eq_ignore_ascii_case(name)) {
                return Err(MigrateError::Config(format!(
                    "excluded table '{}' does not exist in the source",
                    name
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for spec in &policy.tables {
            if !seen.insert(spec.table.to_lowercase()) {
                return Err(MigrateError::Config(format!(
                    "policy document lists table '{}' more than once",
                    spec.table
                )));
            }
            if !tables.iter().any(|t| t.name.eq_ignore_ascii_case(&spec.table)) {
                return Err(MigrateError::Config(format!(
                    "policy names table '{}' which does not exist in the source",
                    spec.table
                )));
            }
            if is_excluded(&spec.table) {
                return Err(MigrateError::Config(format!(
                    "policy names table '{}' which is excluded",
                    spec.table
                )));
            }
        }

        let mut entries = Vec::with_capacity(tables.len());
        for table in tables {
            if is_excluded(&table.name) {
                debug!("Skipping excluded table {}", table.name);
                continue;
            }
            let identity = TableIdentity::new(dataset, table.name.clone());
            let policy = match policy.table(&table.name) {
                Some(spec) => resolve_table_policy(&identity, &table, spec)?,
                None => ColumnPolicy::passthrough(),
            };
            entries.push(CatalogEntry {
                identity,
                table,
                policy,
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<CatalogEntry> {
        self.entries
    }

    pub fn get(&self, identity: &TableIdentity) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| &e.identity == identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve_table_policy(
    identity: &TableIdentity,
    table: &Table,
    spec: &TablePolicySpec,
) -> Result<ColumnPolicy> {
    let mut policy = ColumnPolicy::passthrough();
    for (column, rule) in &spec.columns {
        let Some(col) = table.column(column) else {
            return Err(MigrateError::Config(format!(
                "policy names column '{}' which does not exist in table '{}'",
                column, table.name
            )));
        };
        let (strategy, domain) = rule.resolve()?;
        policy = policy.with_rule(identity, col.name.clone(), strategy, domain);
    }
    debug!("{}: {} columns selected for de-identification", identity, policy.len());
    Ok(policy)
}
