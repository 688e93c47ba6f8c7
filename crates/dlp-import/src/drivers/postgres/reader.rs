//! PostgreSQL source reader.
//!
//! Implements [`SourceReader`] over a deadpool-postgres pool. Pages are read
//! with `ORDER BY <primary key> LIMIT .. OFFSET ..` so every row has a stable
//! offset within its table.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::types::Type;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::{Column, SourceReader, SourceType, SqlValue, Table, TableIdentity};
use crate::drivers::common::{connect_pool, qualify_table, quote_ident, PgEndpoint};
use crate::error::{MigrateError, Result};

/// PostgreSQL source reader implementation.
pub struct PostgresReader {
    pool: Pool,
}

impl PostgresReader {
    /// Create a new PostgreSQL reader from configuration.
    pub async fn new(config: &SourceConfig, max_conns: usize) -> Result<Self> {
        let pool = connect_pool(&PgEndpoint::from(config), max_conns, "source").await?;
        Ok(Self { pool })
    }

    async fn client(&self, what: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, format!("getting connection for {}", what)))
    }

    /// Load columns for a table.
    async fn load_columns(&self, table: &mut Table) -> Result<()> {
        let client = self.client("load_columns").await?;

        let query = r#"
            SELECT
                column_name,
                udt_name,
                CASE WHEN is_nullable = 'YES' THEN true ELSE false END,
                ordinal_position::int4
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = client.query(query, &[&table.schema, &table.name]).await?;
        for row in rows {
            table.columns.push(Column {
                name: row.get::<_, String>(0),
                data_type: SourceType::from_pg(&row.get::<_, String>(1)),
                is_nullable: row.get::<_, bool>(2),
                ordinal_pos: row.get::<_, i32>(3),
            });
        }

        debug!(
            "Loaded {} columns for {}",
            table.columns.len(),
            table.full_name()
        );
        Ok(())
    }

    /// Load primary key for a table.
    async fn load_primary_key(&self, table: &mut Table) -> Result<()> {
        let client = self.client("load_primary_key").await?;

        let query = r#"
            SELECT a.attname
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
            WHERE n.nspname = $1
              AND t.relname = $2
              AND c.contype = 'p'
              AND a.attnum = ANY(c.conkey)
            ORDER BY array_position(c.conkey, a.attnum)
        "#;

        let rows = client.query(query, &[&table.schema, &table.name]).await?;
        table.primary_key = rows.iter().map(|r| r.get::<_, String>(0)).collect();

        debug!(
            "Primary key for {}: {:?}",
            table.full_name(),
            table.primary_key
        );
        Ok(())
    }

    /// Load the planner's row estimate for a table.
    async fn load_row_count(&self, table: &mut Table) -> Result<()> {
        let client = self.client("load_row_count").await?;

        let query = r#"
            SELECT COALESCE(c.reltuples, 0)::int8
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2
        "#;

        let row = client
            .query_one(query, &[&table.schema, &table.name])
            .await?;
        table.row_count = row.get::<_, i64>(0).max(0);
        Ok(())
    }
}

#[async_trait]
impl SourceReader for PostgresReader {
    async fn list_tables(&self, schema: &str) -> Result<Vec<Table>> {
        let client = self.client("list_tables").await?;

        let query = r#"
            SELECT table_schema, table_name
            FROM information_schema.tables
            WHERE table_type = 'BASE TABLE'
              AND table_schema = $1
            ORDER BY table_name
        "#;

        let rows = client.query(query, &[&schema]).await?;
        drop(client);

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let mut table = Table {
                schema: row.get::<_, String>(0),
                name: row.get::<_, String>(1),
                columns: Vec::new(),
                primary_key: Vec::new(),
                row_count: 0,
            };

            self.load_columns(&mut table).await?;
            self.load_primary_key(&mut table).await?;
            self.load_row_count(&mut table).await?;
            tables.push(table);
        }

        info!("Extracted {} tables from schema '{}'", tables.len(), schema);
        Ok(tables)
    }

    async fn fetch_page(
        &self,
        table: &Table,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Vec<SqlValue>>> {
        let client = self.client("fetch_page").await?;

        let sql = build_page_query(table, offset, limit);
        let rows = client.query(&sql, &[]).await?;

        let mut page = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let values = table
                .columns
                .iter()
                .enumerate()
                .map(|(idx, column)| {
                    let at = DecodeSite {
                        table,
                        column,
                        offset: offset + i as u64,
                    };
                    convert_pg_row_value(row, idx, &at)
                })
                .collect::<Result<Vec<_>>>()?;
            page.push(values);
        }
        Ok(page)
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let client = self.client("row_count").await?;
        let query = format!("SELECT COUNT(*)::int8 FROM {}", qualify_table(schema, table));
        let row = client.query_one(&query, &[]).await?;
        Ok(row.get::<_, i64>(0))
    }

    async fn test_connection(&self) -> Result<()> {
        let client = self.client("test_connection").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// SELECT for one page in primary-key order.
fn build_page_query(table: &Table, offset: u64, limit: usize) -> String {
    let cols = table
        .columns
        .iter()
        .map(select_expr)
        .collect::<Vec<_>>()
        .join(", ");
    let order = table
        .primary_key
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {} FROM {} ORDER BY {} LIMIT {} OFFSET {}",
        cols,
        qualify_table(&table.schema, &table.name),
        order,
        limit,
        offset
    )
}

/// Column expression; JSON is read as text.
fn select_expr(col: &Column) -> String {
    match col.data_type {
        SourceType::Json => format!("{}::text", quote_ident(&col.name)),
        _ => quote_ident(&col.name),
    }
}

/// Where a value is being decoded, for error reports.
struct DecodeSite<'a> {
    table: &'a Table,
    column: &'a Column,
    offset: u64,
}

impl DecodeSite<'_> {
    /// Turn a driver decode failure into a table-level schema error.
    ///
    /// A value that cannot be decoded is never replaced with NULL.
    fn check<T, E: std::fmt::Display>(
        &self,
        result: std::result::Result<Option<T>, E>,
    ) -> Result<Option<T>> {
        result.map_err(|e| {
            MigrateError::schema(
                &TableIdentity::new(&self.table.schema, &self.table.name),
                format!(
                    "cannot decode column '{}' ({:?}) at offset {}: {}",
                    self.column.name, self.column.data_type, self.offset, e
                ),
            )
        })
    }
}

/// PostgreSQL's single-byte `"char"` type, read as a one-character string.
fn pg_char_to_text(byte: i8) -> String {
    char::from(byte as u8).to_string()
}

/// Convert a PostgreSQL row value to SqlValue.
fn convert_pg_row_value(
    row: &tokio_postgres::Row,
    idx: usize,
    at: &DecodeSite<'_>,
) -> Result<SqlValue> {
    let value: SqlValue = match &at.column.data_type {
        SourceType::Bool => at.check(row.try_get::<_, Option<bool>>(idx))?.into(),
        SourceType::I16 => at.check(row.try_get::<_, Option<i16>>(idx))?.into(),
        SourceType::I32 => at.check(row.try_get::<_, Option<i32>>(idx))?.into(),
        SourceType::I64 => at.check(row.try_get::<_, Option<i64>>(idx))?.into(),
        SourceType::F32 => at
            .check(row.try_get::<_, Option<f32>>(idx))?
            .map_or(SqlValue::Null, SqlValue::F32),
        SourceType::F64 => at.check(row.try_get::<_, Option<f64>>(idx))?.into(),
        SourceType::Decimal => at
            .check(row.try_get::<_, Option<rust_decimal::Decimal>>(idx))?
            .into(),
        SourceType::Bytes => at.check(row.try_get::<_, Option<Vec<u8>>>(idx))?.into(),
        SourceType::Uuid => at.check(row.try_get::<_, Option<uuid::Uuid>>(idx))?.into(),
        SourceType::Date => at
            .check(row.try_get::<_, Option<chrono::NaiveDate>>(idx))?
            .into(),
        SourceType::Time => at
            .check(row.try_get::<_, Option<chrono::NaiveTime>>(idx))?
            .map_or(SqlValue::Null, SqlValue::Time),
        SourceType::DateTime => at
            .check(row.try_get::<_, Option<chrono::NaiveDateTime>>(idx))?
            .into(),
        SourceType::DateTimeOffset => at
            .check(row.try_get::<_, Option<chrono::DateTime<chrono::FixedOffset>>>(idx))?
            .map_or(SqlValue::Null, SqlValue::DateTimeOffset),
        SourceType::Text if row.columns()[idx].type_() == &Type::CHAR => at
            .check(row.try_get::<_, Option<i8>>(idx))?
            .map(pg_char_to_text)
            .into(),
        SourceType::Text | SourceType::Json | SourceType::Unsupported(_) => {
            at.check(row.try_get::<_, Option<String>>(idx))?.into()
        }
    };
    Ok(value)
}
