//! JSON-lines target writer.
//!
//! Each table lands in `<output_dir>/<dataset>/<table>.jsonl`, one JSON
//! object per row keyed by destination field name, next to a
//! `<table>.schema.json` describing the fields. Rows are written to a temp
//! file that is renamed into place on commit.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

use crate::core::{TableIdentity, TableWriteSession, TargetRow, TargetSchema, TargetWriter};
use crate::error::{MigrateError, Result};

/// Writes tables as JSON-lines files.
#[derive(Debug, Clone)]
pub struct JsonlWriter {
    output_dir: PathBuf,
}

impl JsonlWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn dataset_dir(&self, table: &TableIdentity) -> PathBuf {
        self.output_dir.join(&table.dataset)
    }

    /// Path of a table's data file.
    pub fn data_path(&self, table: &TableIdentity) -> PathBuf {
        self.dataset_dir(table).join(format!("{}.jsonl", table.table))
    }

    /// Path of a table's schema file.
    pub fn schema_path(&self, table: &TableIdentity) -> PathBuf {
        self.dataset_dir(table)
            .join(format!("{}.schema.json", table.table))
    }
}

#[async_trait]
impl TargetWriter for JsonlWriter {
    async fn begin(
        &self,
        table: &TableIdentity,
        schema: &TargetSchema,
    ) -> Result<Box<dyn TableWriteSession>> {
        let dir = self.dataset_dir(table);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| MigrateError::sink(table, format!("creating {}: {}", dir.display(), e)))?;

        let temp_path = dir.join(format!(
            ".{}.jsonl.{}.tmp",
            table.table,
            uuid::Uuid::new_v4().simple()
        ));
        let file = fs::File::create(&temp_path).await.map_err(|e| {
            MigrateError::sink(table, format!("creating {}: {}", temp_path.display(), e))
        })?;

        debug!("{}: staging rows in {}", table, temp_path.display());
        Ok(Box::new(JsonlSession {
            table: table.clone(),
            schema: schema.clone(),
            out: BufWriter::new(file),
            temp_path,
            data_path: self.data_path(table),
            schema_path: self.schema_path(table),
            staged: 0,
        }))
    }

    async fn row_count(&self, table: &TableIdentity) -> Result<Option<i64>> {
        let path = self.data_path(table);
        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut lines = BufReader::new(file).lines();
        let mut count = 0i64;
        while let Some(line) = lines.next_line().await? {
            if !line.trim().is_empty() {
                count += 1;
            }
        }
        Ok(Some(count))
    }

    async fn test_connection(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir).await?;
        let marker = self.output_dir.join(".dlp-import-write-check");
        fs::write(&marker, b"ok").await?;
        fs::remove_file(&marker).await?;
        Ok(())
    }

    fn kind(&self) -> &str {
        "jsonl"
    }
}

struct JsonlSession {
    table: TableIdentity,
    schema: TargetSchema,
    out: BufWriter<fs::File>,
    temp_path: PathBuf,
    data_path: PathBuf,
    schema_path: PathBuf,
    staged: u64,
}

impl JsonlSession {
    fn encode(&self, row: &TargetRow) -> Result<Vec<u8>> {
        let object: serde_json::Map<String, serde_json::Value> = self
            .schema
            .fields
            .iter()
            .zip(&row.values)
            .map(|(field, value)| (field.name.clone(), value.to_json()))
            .collect();
        let mut line = serde_json::to_vec(&object)?;
        line.push(b'\n');
        Ok(line)
    }

    async fn publish(&mut self) -> Result<()> {
        self.out.flush().await?;
        self.out.get_ref().sync_all().await?;
        fs::rename(&self.temp_path, &self.data_path).await?;
        write_atomic(&self.schema_path, &serde_json::to_vec_pretty(&self.schema)?).await
    }
}

#[async_trait]
impl TableWriteSession for JsonlSession {
    async fn write(&mut self, rows: Vec<TargetRow>) -> Result<()> {
        for row in &rows {
            let line = self.encode(row)?;
            self.out
                .write_all(&line)
                .await
                .map_err(|e| MigrateError::sink(&self.table, e))?;
        }
        self.staged += rows.len() as u64;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<u64> {
        let mut this = self;
        if let Err(e) = this.publish().await {
            remove_quietly(&this.temp_path).await;
            return Err(MigrateError::sink(&this.table, e));
        }
        info!(
            "{}: wrote {} rows to {}",
            this.table,
            this.staged,
            this.data_path.display()
        );
        Ok(this.staged)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let JsonlSession { out, temp_path, .. } = *self;
        drop(out);
        remove_quietly(&temp_path).await;
        Ok(())
    }
}

/// Write a file via a sibling temp file and rename.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, contents).await?;
    fs::rename(&temp, path).await?;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SqlValue, TargetField, TargetType};
    use tempfile::TempDir;

    fn schema() -> TargetSchema {
        TargetSchema {
            fields: vec![
                TargetField {
                    name: "id".into(),
                    source_column: "id".into(),
                    field_type: TargetType::Int64,
                    nullable: false,
                },
                TargetField {
                    name: "ssn".into(),
                    source_column: "ssn".into(),
                    field_type: TargetType::String,
                    nullable: true,
                },
            ],
        }
    }

    fn row(id: i64, ssn: Option<&str>) -> TargetRow {
        TargetRow {
            table: TableIdentity::new("analytics", "customers"),
            offset: id as u64,
            values: vec![SqlValue::I64(id), SqlValue::from(ssn)],
        }
    }

    #[tokio::test]
    async fn test_commit_publishes_rows_and_schema() {
        let dir = TempDir::new().unwrap();
        let writer = JsonlWriter::new(dir.path());
        let id = TableIdentity::new("analytics", "customers");

        let mut session = writer.begin(&id, &schema()).await.unwrap();
        session
            .write(vec![row(1, Some("TOK_a")), row(2, None)])
            .await
            .unwrap();
        assert_eq!(writer.row_count(&id).await.unwrap(), None);
        assert_eq!(session.commit().await.unwrap(), 2);

        let text = std::fs::read_to_string(writer.data_path(&id)).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0], serde_json::json!({"id": 1, "ssn": "TOK_a"}));
        assert_eq!(lines[1], serde_json::json!({"id": 2, "ssn": null}));

        let schema_json: TargetSchema =
            serde_json::from_slice(&std::fs::read(writer.schema_path(&id)).unwrap()).unwrap();
        assert_eq!(schema_json, schema());
        assert_eq!(writer.row_count(&id).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_abort_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let writer = JsonlWriter::new(dir.path());
        let id = TableIdentity::new("analytics", "customers");

        let mut first = writer.begin(&id, &schema()).await.unwrap();
        first.write(vec![row(1, Some("x"))]).await.unwrap();
        first.commit().await.unwrap();

        let mut second = writer.begin(&id, &schema()).await.unwrap();
        second
            .write(vec![row(5, None), row(6, None)])
            .await
            .unwrap();
        second.abort().await.unwrap();

        assert_eq!(writer.row_count(&id).await.unwrap(), Some(1));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("analytics"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_connection_creates_output_dir() {
        let dir = TempDir::new().unwrap();
        let writer = JsonlWriter::new(dir.path().join("nested/out"));
        writer.test_connection().await.unwrap();
        assert!(dir.path().join("nested/out").is_dir());
    }
}
