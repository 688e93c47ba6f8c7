//! Destination warehouse schema.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::schema::SourceType;

/// Warehouse column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetType {
    String,
    Int64,
    Float64,
    Numeric,
    Bool,
    Bytes,
    Date,
    Time,
    Datetime,
    Timestamp,
}

impl TargetType {
    /// Warehouse type for an untokenized source column.
    ///
    /// Returns `None` for unsupported source types.
    pub fn for_source(source: &SourceType) -> Option<Self> {
        let t = match source {
            SourceType::Bool => TargetType::Bool,
            SourceType::I16 | SourceType::I32 | SourceType::I64 => TargetType::Int64,
            SourceType::F32 | SourceType::F64 => TargetType::Float64,
            SourceType::Decimal => TargetType::Numeric,
            SourceType::Text | SourceType::Uuid | SourceType::Json => TargetType::String,
            SourceType::Bytes => TargetType::Bytes,
            SourceType::Date => TargetType::Date,
            SourceType::Time => TargetType::Time,
            SourceType::DateTime => TargetType::Datetime,
            SourceType::DateTimeOffset => TargetType::Timestamp,
            SourceType::Unsupported(_) => return None,
        };
        Some(t)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::String => "STRING",
            TargetType::Int64 => "INT64",
            TargetType::Float64 => "FLOAT64",
            TargetType::Numeric => "NUMERIC",
            TargetType::Bool => "BOOL",
            TargetType::Bytes => "BYTES",
            TargetType::Date => "DATE",
            TargetType::Time => "TIME",
            TargetType::Datetime => "DATETIME",
            TargetType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetField {
    /// Destination column name.
    pub name: String,
    /// Source column this field is read from.
    pub source_column: String,
    pub field_type: TargetType,
    pub nullable: bool,
}

/// Ordered destination schema for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSchema {
    pub fields: Vec<TargetField>,
}

impl TargetSchema {
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_mapping() {
        assert_eq!(TargetType::for_source(&SourceType::I16), Some(TargetType::Int64));
        assert_eq!(TargetType::for_source(&SourceType::Uuid), Some(TargetType::String));
        assert_eq!(
            TargetType::for_source(&SourceType::DateTimeOffset),
            Some(TargetType::Timestamp)
        );
        assert_eq!(
            TargetType::for_source(&SourceType::Unsupported("xml".into())),
            None
        );
    }

    #[test]
    fn test_target_type_serde_uppercase() {
        let json = serde_json::to_string(&TargetType::Float64).unwrap();
        assert_eq!(json, "\"FLOAT64\"");
    }
}
