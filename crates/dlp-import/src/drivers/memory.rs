//! In-memory source and target drivers.
//!
//! Used by tests and for embedding the pipeline without a database. Both
//! drivers support fault injection so retry, failure and cancellation paths
//! can be exercised deterministically.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{
    SourceReader, SqlValue, Table, TableIdentity, TableWriteSession, TargetRow, TargetSchema,
    TargetWriter,
};
use crate::error::{MigrateError, Result};

/// Source reader over tables held in memory.
///
/// Rows are served in primary-key order regardless of insertion order.
#[derive(Default)]
pub struct MemoryReader {
    tables: BTreeMap<String, (Table, Vec<Vec<SqlValue>>)>,
    pending_failures: Mutex<HashMap<String, usize>>,
    fetches: Mutex<HashMap<String, usize>>,
    fetch_delay: Option<Duration>,
    unreachable: AtomicBool,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with its rows (values in column order).
    pub fn with_table(mut self, table: Table, mut rows: Vec<Vec<SqlValue>>) -> Self {
        let key: Vec<usize> = table
            .primary_key
            .iter()
            .filter_map(|pk| table.columns.iter().position(|c| &c.name == pk))
            .collect();
        rows.sort_by(|a, b| {
            key.iter()
                .map(|&i| compare_values(&a[i], &b[i]))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        self.tables.insert(table.name.clone(), (table, rows));
        self
    }

    /// Sleep before serving each page.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Fail the next `n` page fetches of a table with a retryable error.
    pub fn fail_next_fetches(&self, table: &str, n: usize) {
        if let Ok(mut failures) = self.pending_failures.lock() {
            failures.insert(table.to_string(), n);
        }
    }

    /// Make every call fail as if the database were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, AtomicOrdering::SeqCst);
    }

    /// Page fetches attempted for a table, including failed ones.
    pub fn fetch_count(&self, table: &str) -> usize {
        self.fetches
            .lock()
            .ok()
            .and_then(|f| f.get(table).copied())
            .unwrap_or(0)
    }

    /// Metadata of every table, in name order.
    pub fn tables(&self) -> Vec<Table> {
        self.tables.values().map(|(t, _)| t.clone()).collect()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(AtomicOrdering::SeqCst) {
            return Err(MigrateError::pool("connection refused", "memory source"));
        }
        Ok(())
    }

    fn take_failure(&self, table: &str) -> bool {
        let Ok(mut failures) = self.pending_failures.lock() else {
            return false;
        };
        match failures.get_mut(table) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl SourceReader for MemoryReader {
    async fn list_tables(&self, schema: &str) -> Result<Vec<Table>> {
        self.check_reachable()?;
        Ok(self
            .tables
            .values()
            .filter(|(t, _)| t.schema == schema)
            .map(|(t, rows)| {
                let mut t = t.clone();
                t.row_count = rows.len() as i64;
                t
            })
            .collect())
    }

    async fn fetch_page(
        &self,
        table: &Table,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Vec<SqlValue>>> {
        if let Ok(mut fetches) = self.fetches.lock() {
            *fetches.entry(table.name.clone()).or_default() += 1;
        }
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_reachable()?;
        if self.take_failure(&table.name) {
            return Err(MigrateError::pool("connection reset by peer", "memory fetch"));
        }

        let (_, rows) = self.tables.get(&table.name).ok_or_else(|| {
            MigrateError::schema(
                &TableIdentity::new(&table.schema, &table.name),
                "table not found in memory source",
            )
        })?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(rows.len());
        let end = start.saturating_add(limit).min(rows.len());
        Ok(rows[start..end].to_vec())
    }

    async fn row_count(&self, _schema: &str, table: &str) -> Result<i64> {
        self.check_reachable()?;
        Ok(self
            .tables
            .get(table)
            .map(|(_, rows)| rows.len() as i64)
            .unwrap_or(0))
    }

    async fn test_connection(&self) -> Result<()> {
        self.check_reachable()
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

/// Ordering for primary-key values of the same kind.
fn compare_values(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a, b) {
        (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
        (SqlValue::Null, _) => Ordering::Greater,
        (_, SqlValue::Null) => Ordering::Less,
        (SqlValue::I16(x), SqlValue::I16(y)) => x.cmp(y),
        (SqlValue::I32(x), SqlValue::I32(y)) => x.cmp(y),
        (SqlValue::I64(x), SqlValue::I64(y)) => x.cmp(y),
        (SqlValue::Text(x), SqlValue::Text(y)) => x.cmp(y),
        (SqlValue::Uuid(x), SqlValue::Uuid(y)) => x.cmp(y),
        (SqlValue::Decimal(x), SqlValue::Decimal(y)) => x.cmp(y),
        (SqlValue::Date(x), SqlValue::Date(y)) => x.cmp(y),
        (SqlValue::DateTime(x), SqlValue::DateTime(y)) => x.cmp(y),
        (SqlValue::DateTimeOffset(x), SqlValue::DateTimeOffset(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[derive(Debug, Default)]
struct StoredTable {
    schema: Option<TargetSchema>,
    rows: Vec<TargetRow>,
}

#[derive(Debug, Default)]
struct WriterState {
    tables: BTreeMap<TableIdentity, StoredTable>,
    failing_commits: HashSet<String>,
}

/// Target writer that keeps committed tables in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    state: Arc<Mutex<WriterState>>,
    begins: AtomicUsize,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a destination table, as left by an earlier run.
    pub fn seed(&self, table: &TableIdentity, rows: Vec<Vec<SqlValue>>) {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, values)| TargetRow {
                table: table.clone(),
                offset: i as u64,
                values,
            })
            .collect();
        if let Ok(mut state) = self.state.lock() {
            state.tables.insert(
                table.clone(),
                StoredTable {
                    schema: None,
                    rows,
                },
            );
        }
    }

    /// Make commits for a table name fail.
    pub fn fail_commits_for(&self, table: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_commits.insert(table.to_string());
        }
    }

    /// Committed rows of a table, `None` if it was never created.
    pub fn rows(&self, table: &TableIdentity) -> Option<Vec<TargetRow>> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tables.get(table).map(|t| t.rows.clone()))
    }

    /// Schema of the last commit to a table.
    pub fn schema(&self, table: &TableIdentity) -> Option<TargetSchema> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tables.get(table).and_then(|t| t.schema.clone()))
    }

    /// Write sessions started so far.
    pub fn begin_count(&self) -> usize {
        self.begins.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl TargetWriter for MemoryWriter {
    async fn begin(
        &self,
        table: &TableIdentity,
        schema: &TargetSchema,
    ) -> Result<Box<dyn TableWriteSession>> {
        self.begins.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(MemorySession {
            state: self.state.clone(),
            table: table.clone(),
            schema: schema.clone(),
            staged: Vec::new(),
        }))
    }

    async fn row_count(&self, table: &TableIdentity) -> Result<Option<i64>> {
        Ok(self.rows(table).map(|rows| rows.len() as i64))
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &str {
        "memory"
    }
}

struct MemorySession {
    state: Arc<Mutex<WriterState>>,
    table: TableIdentity,
    schema: TargetSchema,
    staged: Vec<TargetRow>,
}

#[async_trait]
impl TableWriteSession for MemorySession {
    async fn write(&mut self, rows: Vec<TargetRow>) -> Result<()> {
        for row in &rows {
            if row.values.len() != self.schema.len() {
                return Err(MigrateError::sink(
                    &self.table,
                    format!(
                        "row at offset {} has {} values, schema has {} fields",
                        row.offset,
                        row.values.len(),
                        self.schema.len()
                    ),
                ));
            }
        }
        self.staged.extend(rows);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<u64> {
        let MemorySession {
            state,
            table,
            schema,
            staged,
        } = *self;
        let mut state = state
            .lock()
            .map_err(|_| MigrateError::sink(&table, "writer state poisoned"))?;
        if state.failing_commits.contains(&table.table) {
            return Err(MigrateError::sink(&table, "injected commit failure"));
        }
        let written = staged.len() as u64;
        let stored = state.tables.entry(table).or_default();
        stored.schema = Some(schema);
        stored.rows = staged;
        Ok(written)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, SourceType, TargetField, TargetType};

    fn table() -> Table {
        Table {
            schema: "public".into(),
            name: "t".into(),
            columns: vec![Column::new("id", SourceType::I32, 1).not_null()],
            primary_key: vec!["id".into()],
            row_count: 0,
        }
    }

    #[tokio::test]
    async fn test_reader_serves_pk_order() {
        let reader = MemoryReader::new().with_table(
            table(),
            vec![vec![SqlValue::I32(3)], vec![SqlValue::I32(1)], vec![SqlValue::I32(2)]],
        );
        let page = reader.fetch_page(&table(), 1, 10).await.unwrap();
        assert_eq!(page, vec![vec![SqlValue::I32(2)], vec![SqlValue::I32(3)]]);
        assert!(reader.fetch_page(&table(), 10, 10).await.unwrap().is_empty());
        assert_eq!(reader.list_tables("public").await.unwrap().len(), 1);
        assert!(reader.list_tables("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writer_replaces_on_commit_only() {
        let writer = MemoryWriter::new();
        let id = TableIdentity::new("ds", "t");
        writer.seed(&id, vec![vec![SqlValue::I64(1)], vec![SqlValue::I64(2)]]);

        let schema = TargetSchema {
            fields: vec![TargetField {
                name: "id".into(),
                source_column: "id".into(),
                field_type: TargetType::Int64,
                nullable: false,
            }],
        };
        let row = TargetRow {
            table: id.clone(),
            offset: 0,
            values: vec![SqlValue::I64(7)],
        };

        let mut aborted = writer.begin(&id, &schema).await.unwrap();
        aborted.write(vec![row.clone()]).await.unwrap();
        aborted.abort().await.unwrap();
        assert_eq!(writer.row_count(&id).await.unwrap(), Some(2));

        let mut session = writer.begin(&id, &schema).await.unwrap();
        session.write(vec![row]).await.unwrap();
        assert_eq!(session.commit().await.unwrap(), 1);
        assert_eq!(writer.row_count(&id).await.unwrap(), Some(1));
        assert_eq!(writer.schema(&id), Some(schema));
        assert_eq!(writer.begin_count(), 2);
    }
}
