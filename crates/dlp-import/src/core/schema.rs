//! Source table and column metadata.
//!
//! Column types are normalized into [`SourceType`] at discovery time so the
//! extractor and projector never have to parse driver type strings.

use serde::{Deserialize, Serialize};

/// Normalized source column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Decimal,
    Text,
    Bytes,
    Uuid,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
    Json,
    /// A type the extractor cannot read; carries the driver's type name.
    Unsupported(String),
}

impl SourceType {
    /// Map a PostgreSQL `udt_name` to a normalized type.
    pub fn from_pg(udt_name: &str) -> Self {
        match udt_name.to_lowercase().as_str() {
            "bool" | "boolean" => SourceType::Bool,
            "int2" | "smallint" => SourceType::I16,
            "int4" | "integer" | "int" => SourceType::I32,
            "int8" | "bigint" => SourceType::I64,
            "float4" | "real" => SourceType::F32,
            "float8" | "double precision" => SourceType::F64,
            "numeric" | "decimal" => SourceType::Decimal,
            "text" | "varchar" | "bpchar" | "char" | "name" | "citext" => SourceType::Text,
            "bytea" => SourceType::Bytes,
            "uuid" => SourceType::Uuid,
            "date" => SourceType::Date,
            "time" => SourceType::Time,
            "timestamp" => SourceType::DateTime,
            "timestamptz" => SourceType::DateTimeOffset,
            "json" | "jsonb" => SourceType::Json,
            other => SourceType::Unsupported(other.to_string()),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, SourceType::Unsupported(_))
    }

    /// Whether the type can be used for stable primary-key ordering.
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            SourceType::I16
                | SourceType::I32
                | SourceType::I64
                | SourceType::Decimal
                | SourceType::Text
                | SourceType::Uuid
                | SourceType::Date
                | SourceType::DateTime
                | SourceType::DateTimeOffset
        )
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Normalized data type.
    pub data_type: SourceType,

    /// Whether the column is nullable.
    pub is_nullable: bool,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: SourceType, ordinal_pos: i32) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_nullable: true,
            ordinal_pos,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }
}

/// Source table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Source schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<Column>,

    /// Primary key column names in key order.
    pub primary_key: Vec<String>,

    /// Approximate row count.
    pub row_count: i64,
}

impl Table {
    /// Get the fully qualified source table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Find a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Column names in ordinal order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Columns whose type the extractor cannot read.
    pub fn unsupported_columns(&self) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| !c.data_type.is_supported())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers() -> Table {
        Table {
            schema: "public".into(),
            name: "customers".into(),
            columns: vec![
                Column::new("id", SourceType::I64, 1).not_null(),
                Column::new("name", SourceType::Text, 2),
                Column::new("shape", SourceType::from_pg("geometry"), 3),
            ],
            primary_key: vec!["id".into()],
            row_count: 10,
        }
    }

    #[test]
    fn test_pg_type_mapping() {
        assert_eq!(SourceType::from_pg("int8"), SourceType::I64);
        assert_eq!(SourceType::from_pg("VARCHAR"), SourceType::Text);
        assert_eq!(SourceType::from_pg("timestamptz"), SourceType::DateTimeOffset);
        assert_eq!(
            SourceType::from_pg("tsvector"),
            SourceType::Unsupported("tsvector".into())
        );
    }

    #[test]
    fn test_table_helpers() {
        let table = customers();
        assert_eq!(table.full_name(), "public.customers");
        assert!(table.has_pk());
        assert!(table.column("NAME").is_some());
        assert_eq!(table.unsupported_columns().len(), 1);
        assert_eq!(table.column_names(), vec!["id", "name", "shape"]);
    }

    #[test]
    fn test_orderable_types() {
        assert!(SourceType::I32.is_orderable());
        assert!(SourceType::Text.is_orderable());
        assert!(!SourceType::F64.is_orderable());
        assert!(!SourceType::Bytes.is_orderable());
    }
}
