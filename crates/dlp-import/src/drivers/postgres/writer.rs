//! PostgreSQL target writer.
//!
//! Each table write session holds one pooled connection. Rows are streamed
//! into a session-local temp table with text COPY; commit swaps them into the
//! destination table in a single transaction (create if needed, truncate,
//! insert). Until then the destination is untouched.

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::{Object, Pool};
use futures::SinkExt;
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::{
    SqlValue, TableIdentity, TableWriteSession, TargetRow, TargetSchema, TargetType, TargetWriter,
};
use crate::drivers::common::{connect_pool, qualify_table, quote_ident, PgEndpoint};
use crate::error::{MigrateError, Result};

/// PostgreSQL target writer implementation.
pub struct PostgresWriter {
    pool: Pool,
}

impl PostgresWriter {
    /// Create a new PostgreSQL writer from configuration.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let pool = connect_pool(&PgEndpoint::from(config), max_conns, "target").await?;
        Ok(Self { pool })
    }

    async fn client(&self, what: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, format!("getting connection for {}", what)))
    }
}

#[async_trait]
impl TargetWriter for PostgresWriter {
    async fn begin(
        &self,
        table: &TableIdentity,
        schema: &TargetSchema,
    ) -> Result<Box<dyn TableWriteSession>> {
        let client = self.client("begin").await?;
        let staging = staging_name(table);

        let ddl = format!(
            "DROP TABLE IF EXISTS {staging}; CREATE TEMP TABLE {staging} ({})",
            column_defs(schema, false),
            staging = quote_ident(&staging)
        );
        client
            .batch_execute(&ddl)
            .await
            .map_err(|e| MigrateError::sink(table, format!("creating staging table: {}", e)))?;

        debug!("{}: staging rows in {}", table, staging);
        Ok(Box::new(PostgresWriteSession {
            client,
            table: table.clone(),
            schema: schema.clone(),
            staging,
            staged: 0,
        }))
    }

    async fn row_count(&self, table: &TableIdentity) -> Result<Option<i64>> {
        let client = self.client("row_count").await?;

        let exists = client
            .query_opt(
                "SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
                &[&table.dataset, &table.table],
            )
            .await?
            .is_some();
        if !exists {
            return Ok(None);
        }

        let query = format!(
            "SELECT COUNT(*)::int8 FROM {}",
            qualify_table(&table.dataset, &table.table)
        );
        let row = client.query_one(&query, &[]).await?;
        Ok(Some(row.get::<_, i64>(0)))
    }

    async fn test_connection(&self) -> Result<()> {
        let client = self.client("test_connection").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn kind(&self) -> &str {
        "postgres"
    }
}

/// Staged write of one table.
struct PostgresWriteSession {
    client: Object,
    table: TableIdentity,
    schema: TargetSchema,
    staging: String,
    staged: u64,
}

impl PostgresWriteSession {
    fn column_list(&self) -> String {
        self.schema
            .fields
            .iter()
            .map(|f| quote_ident(&f.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn publish(&mut self) -> Result<u64> {
        let target = qualify_table(&self.table.dataset, &self.table.table);
        let cols = self.column_list();

        let tx = self.client.transaction().await?;
        tx.batch_execute(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(&self.table.dataset)
        ))
        .await?;
        tx.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            target,
            column_defs(&self.schema, true)
        ))
        .await?;
        tx.batch_execute(&format!("TRUNCATE TABLE {}", target))
            .await?;
        let inserted = tx
            .execute(
                &format!(
                    "INSERT INTO {} ({}) SELECT {} FROM {}",
                    target,
                    cols,
                    cols,
                    quote_ident(&self.staging)
                ),
                &[],
            )
            .await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn drop_staging(&self) {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(&self.staging));
        if let Err(e) = self.client.batch_execute(&sql).await {
            warn!("{}: failed to drop staging table: {}", self.table, e);
        }
    }
}

#[async_trait]
impl TableWriteSession for PostgresWriteSession {
    async fn write(&mut self, rows: Vec<TargetRow>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let copy_sql = format!(
            "COPY {} ({}) FROM STDIN",
            quote_ident(&self.staging),
            self.column_list()
        );
        let sink = self
            .client
            .copy_in(&copy_sql)
            .await
            .map_err(|e| MigrateError::sink(&self.table, format!("COPY init: {}", e)))?;

        let mut buf = String::with_capacity(rows.len() * 128);
        for row in &rows {
            encode_copy_row(&mut buf, &row.values);
        }

        tokio::pin!(sink);
        sink.send(Bytes::from(buf))
            .await
            .map_err(|e| MigrateError::sink(&self.table, format!("COPY send: {}", e)))?;
        sink.finish()
            .await
            .map_err(|e| MigrateError::sink(&self.table, format!("COPY finish: {}", e)))?;

        self.staged += rows.len() as u64;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<u64> {
        let mut this = self;
        let result = this.publish().await;
        this.drop_staging().await;
        let written = result.map_err(|e| MigrateError::sink(&this.table, e))?;
        if written != this.staged {
            warn!(
                "{}: staged {} rows but published {}",
                this.table, this.staged, written
            );
        }
        info!("{}: replaced destination contents ({} rows)", this.table, written);
        Ok(written)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.drop_staging().await;
        debug!("{}: discarded {} staged rows", self.table, self.staged);
        Ok(())
    }
}

/// Temp table name for a destination table.
fn staging_name(table: &TableIdentity) -> String {
    format!("_dlp_staging_{}", table.table)
}

/// Column definitions for CREATE TABLE.
fn column_defs(schema: &TargetSchema, with_nullability: bool) -> String {
    schema
        .fields
        .iter()
        .map(|f| {
            let null = if with_nullability && !f.nullable {
                " NOT NULL"
            } else {
                ""
            };
            format!("{} {}{}", quote_ident(&f.name), pg_type(f.field_type), null)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// PostgreSQL column type for a warehouse type.
fn pg_type(t: TargetType) -> &'static str {
    match t {
        TargetType::String => "text",
        TargetType::Int64 => "bigint",
        TargetType::Float64 => "double precision",
        TargetType::Numeric => "numeric",
        TargetType::Bool => "boolean",
        TargetType::Bytes => "bytea",
        TargetType::Date => "date",
        TargetType::Time => "time",
        TargetType::Datetime => "timestamp",
        TargetType::Timestamp => "timestamptz",
    }
}

/// Append one row in COPY text format.
fn encode_copy_row(buf: &mut String, values: &[SqlValue]) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            buf.push('\t');
        }
        buf.push_str(&value_to_text(value));
    }
    buf.push('\n');
}

/// Convert SqlValue to text for COPY.
fn value_to_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::I16(i) => i.to_string(),
        SqlValue::I32(i) => i.to_string(),
        SqlValue::I64(i) => i.to_string(),
        SqlValue::F32(f) => f.to_string(),
        SqlValue::F64(f) => f.to_string(),
        SqlValue::Text(s) => escape_copy_text(s),
        SqlValue::Bytes(b) => format!("\\\\x{}", hex::encode(b)),
        SqlValue::Uuid(u) => u.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        SqlValue::DateTimeOffset(dto) => dto.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
    }
}

/// Escape text for PostgreSQL COPY.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TargetField;

    #[test]
    fn test_escape_copy_text() {
        assert_eq!(escape_copy_text("hello"), "hello");
        assert_eq!(escape_copy_text("tab\there"), "tab\\there");
        assert_eq!(escape_copy_text("new\nline"), "new\\nline");
        assert_eq!(escape_copy_text("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_encode_copy_row() {
        let mut buf = String::new();
        encode_copy_row(
            &mut buf,
            &[
                SqlValue::I64(1),
                SqlValue::Null,
                SqlValue::from("a\tb"),
                SqlValue::Bytes(vec![0xab]),
                SqlValue::Bool(false),
            ],
        );
        assert_eq!(buf, "1\t\\N\ta\\tb\t\\\\xab\tf\n");
    }

    #[test]
    fn test_column_defs() {
        let schema = TargetSchema {
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
        };
        assert_eq!(
            column_defs(&schema, true),
            "\"id\" bigint NOT NULL, \"ssn\" text"
        );
        assert_eq!(column_defs(&schema, false), "\"id\" bigint, \"ssn\" text");
    }

    #[test]
    fn test_staging_name() {
        assert_eq!(
            staging_name(&TableIdentity::new("ds", "customers")),
            "_dlp_staging_customers"
        );
    }
}
