//! Paginated, restartable row extraction.
//!
//! Rows are read in primary-key order, `page_size` at a time. Every row is
//! tagged with its offset in that ordering, so a stream can be restarted
//! from any offset and produce the same rows with the same offsets.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::CatalogEntry;
use crate::core::{Page, SourceReader, SourceRow, Table, TableIdentity};
use crate::error::{MigrateError, Result};
use crate::pipeline::RetryPolicy;

/// Reads one table page by page.
pub struct RowExtractor {
    reader: Arc<dyn SourceReader>,
    identity: TableIdentity,
    table: Table,
    columns: Arc<[String]>,
    page_size: usize,
    retry: RetryPolicy,
}

impl RowExtractor {
    /// Create an extractor, checking the table can be read in a stable order.
    pub fn new(
        reader: Arc<dyn SourceReader>,
        entry: &CatalogEntry,
        page_size: usize,
        retry: RetryPolicy,
    ) -> Result<Self> {
        check_schema(&entry.identity, &entry.table)?;
        if page_size == 0 {
            return Err(MigrateError::Config("page_size must be at least 1".into()));
        }
        Ok(Self {
            reader,
            identity: entry.identity.clone(),
            table: entry.table.clone(),
            columns: Arc::from(entry.table.column_names()),
            page_size,
            retry,
        })
    }

    /// Fetch the page starting at `offset`, retrying connection errors.
    ///
    /// An offset past the end of the table yields an empty end-of-table page.
    pub async fn fetch_page(&self, offset: u64, cancel: &CancellationToken) -> Result<Page> {
        let what = format!("{} page at offset {}", self.identity, offset);
        let raw = self
            .retry
            .run(&what, cancel, |_| async {
                self.reader
                    .fetch_page(&self.table, offset, self.page_size)
                    .await
                    .map_err(|e| self.classify(offset, e))
            })
            .await?;

        if raw.is_empty() {
            return Ok(Page::end(offset));
        }

        let is_last = raw.len() < self.page_size;
        let mut rows = Vec::with_capacity(raw.len());
        for (i, values) in raw.into_iter().enumerate() {
            if values.len() != self.columns.len() {
                return Err(MigrateError::schema(
                    &self.identity,
                    format!(
                        "row at offset {} has {} values, expected {}",
                        offset + i as u64,
                        values.len(),
                        self.columns.len()
                    ),
                ));
            }
            rows.push(SourceRow::new(
                self.identity.clone(),
                offset + i as u64,
                self.columns.clone(),
                values,
            ));
        }

        debug!(
            "{}: fetched {} rows at offset {}{}",
            self.identity,
            rows.len(),
            offset,
            if is_last { " (last page)" } else { "" }
        );
        Ok(Page {
            offset,
            rows,
            is_last,
        })
    }

    /// Stream pages from `start_offset` to the end of the table.
    ///
    /// Pages are produced by a spawned task and buffered up to `read_ahead`
    /// pages. The stream ends after the last page or the first error; a
    /// cancelled stream ends with [`MigrateError::Cancelled`].
    pub fn stream(
        self,
        start_offset: u64,
        read_ahead: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<Page>> {
        let (tx, rx) = mpsc::channel(read_ahead.max(1));

        tokio::spawn(async move {
            let mut offset = start_offset;
            loop {
                if cancel.is_cancelled() {
                    let _ = tx.send(Err(MigrateError::Cancelled)).await;
                    return;
                }

                match self.fetch_page(offset, &cancel).await {
                    Ok(page) => {
                        let is_last = page.is_last;
                        offset = page.next_offset();
                        let sent = tokio::select! {
                            _ = cancel.cancelled() => Err(()),
                            res = tx.send(Ok(page)) => res.map_err(|_| ()),
                        };
                        if sent.is_err() {
                            // Receiver dropped or run cancelled.
                            return;
                        }
                        if is_last {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        });

        rx
    }

    /// Tag driver errors with the destination table and offset.
    fn classify(&self, offset: u64, err: MigrateError) -> MigrateError {
        match err {
            MigrateError::Connection { .. } | MigrateError::Cancelled => err,
            MigrateError::Schema { message, .. } => MigrateError::schema(&self.identity, message),
            e if e.is_retryable() => MigrateError::Connection {
                table: self.identity.clone(),
                offset,
                message: e.to_string(),
            },
            e => e,
        }
    }
}

/// Check that a table has a usable ordering key and readable columns.
pub fn check_schema(identity: &TableIdentity, table: &Table) -> Result<()> {
    if !table.has_pk() {
        return Err(MigrateError::schema(
            identity,
            "table has no primary key; rows cannot be read in a stable order",
        ));
    }
    for pk in &table.primary_key {
        match table.column(pk) {
            Some(col) if col.data_type.is_orderable() => {}
            Some(col) => {
                return Err(MigrateError::schema(
                    identity,
                    format!(
                        "primary key column '{}' has type {:?} which cannot be ordered",
                        col.name, col.data_type
                    ),
                ))
            }
            None => {
                return Err(MigrateError::schema(
                    identity,
                    format!("primary key column '{}' is not a table column", pk),
                ))
            }
        }
    }
    let unsupported = table.unsupported_columns();
    if !unsupported.is_empty() {
        let names: Vec<_> = unsupported
            .iter()
            .map(|c| format!("{} ({:?})", c.name, c.data_type))
            .collect();
        return Err(MigrateError::schema(
            identity,
            format!("unsupported column types: {}", names.join(", ")),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, ColumnPolicy, SourceType, SqlValue};
    use crate::drivers::MemoryReader;

    fn events_entry(rows: usize) -> (Arc<MemoryReader>, CatalogEntry) {
        let table = Table {
            schema: "public".into(),
            name: "events".into(),
            columns: vec![
                Column::new("id", SourceType::I64, 1).not_null(),
                Column::new("kind", SourceType::Text, 2),
            ],
            primary_key: vec!["id".into()],
            row_count: rows as i64,
        };
        let data = (0..rows)
            .map(|i| vec![SqlValue::I64(i as i64 + 1), SqlValue::from("click")])
            .collect();
        let reader = Arc::new(MemoryReader::new().with_table(table.clone(), data));
        let entry = CatalogEntry {
            identity: TableIdentity::new("ds", "events"),
            table,
            policy: ColumnPolicy::passthrough(),
        };
        (reader, entry)
    }

    #[tokio::test]
    async fn test_page_past_end_is_empty() {
        let (reader, entry) = events_entry(50);
        let extractor = RowExtractor::new(reader, &entry, 20, RetryPolicy::immediate(1)).unwrap();
        let page = extractor
            .fetch_page(100, &CancellationToken::new())
            .await
            .unwrap();
        assert!(page.is_empty());
        assert!(page.is_last);
    }

    #[tokio::test]
    async fn test_offsets_are_stable_across_restarts() {
        let (reader, entry) = events_entry(50);
        let extractor = RowExtractor::new(reader, &entry, 20, RetryPolicy::immediate(1)).unwrap();
        let cancel = CancellationToken::new();

        let second = extractor.fetch_page(20, &cancel).await.unwrap();
        let again = extractor.fetch_page(20, &cancel).await.unwrap();
        assert_eq!(second.rows, again.rows);
        assert_eq!(second.rows[0].offset, 20);
        assert_eq!(second.rows[0].get("id"), Some(&SqlValue::I64(21)));

        let last = extractor.fetch_page(40, &cancel).await.unwrap();
        assert_eq!(last.len(), 10);
        assert!(last.is_last);
    }

    #[tokio::test]
    async fn test_stream_covers_table_in_order() {
        let (reader, entry) = events_entry(45);
        let extractor = RowExtractor::new(reader, &entry, 10, RetryPolicy::immediate(1)).unwrap();
        let mut rx = extractor.stream(0, 2, CancellationToken::new());

        let mut offsets = Vec::new();
        while let Some(page) = rx.recv().await {
            offsets.extend(page.unwrap().rows.iter().map(|r| r.offset));
        }
        assert_eq!(offsets, (0..45).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_with_empty_page() {
        let (reader, entry) = events_entry(20);
        let extractor = RowExtractor::new(reader, &entry, 10, RetryPolicy::immediate(1)).unwrap();
        let mut rx = extractor.stream(0, 1, CancellationToken::new());

        let mut pages = Vec::new();
        while let Some(page) = rx.recv().await {
            pages.push(page.unwrap());
        }
        assert_eq!(pages.len(), 3);
        assert!(pages[2].is_empty() && pages[2].is_last);
    }

    #[tokio::test]
    async fn test_connection_error_is_retried() {
        let (reader, entry) = events_entry(5);
        reader.fail_next_fetches("events", 2);
        let extractor =
            RowExtractor::new(reader.clone(), &entry, 10, RetryPolicy::immediate(3)).unwrap();

        let page = extractor
            .fetch_page(0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(reader.fetch_count("events"), 3);
    }

    #[tokio::test]
    async fn test_connection_error_exhausts_retries() {
        let (reader, entry) = events_entry(5);
        reader.fail_next_fetches("events", 5);
        let extractor = RowExtractor::new(reader, &entry, 10, RetryPolicy::immediate(2)).unwrap();

        let err = extractor
            .fetch_page(0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Connection { offset: 0, .. }));
        assert_eq!(err.table().map(|t| t.table.as_str()), Some("events"));
    }

    /// Reader whose rows cannot be decoded.
    struct UndecodableReader {
        fetches: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SourceReader for UndecodableReader {
        async fn list_tables(&self, _schema: &str) -> Result<Vec<Table>> {
            Ok(Vec::new())
        }

        async fn fetch_page(
            &self,
            table: &Table,
            offset: u64,
            _limit: usize,
        ) -> Result<Vec<Vec<SqlValue>>> {
            self.fetches
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(MigrateError::schema(
                &TableIdentity::new(&table.schema, &table.name),
                format!("cannot decode column 'kind' (Text) at offset {}", offset),
            ))
        }

        async fn row_count(&self, _schema: &str, _table: &str) -> Result<i64> {
            Ok(0)
        }

        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }

        fn db_type(&self) -> &str {
            "undecodable"
        }
    }

    #[tokio::test]
    async fn test_decode_error_fails_page_without_retry() {
        let (_, entry) = events_entry(5);
        let reader = Arc::new(UndecodableReader {
            fetches: std::sync::atomic::AtomicUsize::new(0),
        });
        let extractor =
            RowExtractor::new(reader.clone(), &entry, 10, RetryPolicy::immediate(3)).unwrap();

        let err = extractor
            .fetch_page(0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Schema { .. }));
        assert_eq!(err.table(), Some(&TableIdentity::new("ds", "events")));
        assert!(err.to_string().contains("'kind'"));
        assert_eq!(
            reader.fetches.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_cancelled_stream_reports_cancelled() {
        let (reader, entry) = events_entry(5);
        let extractor = RowExtractor::new(reader, &entry, 10, RetryPolicy::immediate(1)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut rx = extractor.stream(0, 1, cancel);
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Err(MigrateError::Cancelled)));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_schema_checks() {
        let (_, mut entry) = events_entry(0);
        entry.table.primary_key.clear();
        let err = check_schema(&entry.identity, &entry.table).unwrap_err();
        assert!(matches!(err, MigrateError::Schema { .. }));

        let (_, mut entry) = events_entry(0);
        entry
            .table
            .columns
            .push(Column::new("shape", SourceType::from_pg("geometry"), 3));
        let err = check_schema(&entry.identity, &entry.table).unwrap_err();
        assert!(err.to_string().contains("shape"));
    }
}
