//! Shaping tokenized rows into the destination schema.

use std::collections::{BTreeMap, HashSet};

use rust_decimal::Decimal;

use crate::catalog::CatalogEntry;
use crate::core::{
    SqlValue, TableIdentity, TargetField, TargetRow, TargetSchema, TargetType, TokenizedRow,
};
use crate::error::{MigrateError, Result};

/// Maps rows of one table onto its destination schema.
#[derive(Debug, Clone)]
pub struct RowProjector {
    identity: TableIdentity,
    schema: TargetSchema,
}

impl RowProjector {
    /// Derive the destination schema for a catalog entry.
    ///
    /// `renames` maps source column names to destination names. Columns
    /// selected for de-identification are typed `STRING`.
    pub fn new(entry: &CatalogEntry, renames: Option<&BTreeMap<String, String>>) -> Result<Self> {
        let identity = entry.identity.clone();
        let table = &entry.table;

        if let Some(renames) = renames {
            for column in renames.keys() {
                if table.column(column).is_none() {
                    return Err(MigrateError::Config(format!(
                        "column_renames for '{}' names unknown column '{}'",
                        table.name, column
                    )));
                }
            }
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            let field_type = if entry.policy.strategy(&column.name).is_none() {
                TargetType::for_source(&column.data_type).ok_or_else(|| {
                    MigrateError::schema(
                        &identity,
                        format!(
                            "column '{}' has unsupported type {:?}",
                            column.name, column.data_type
                        ),
                    )
                })?
            } else {
                TargetType::String
            };

            let name = renames
                .and_then(|r| lookup_rename(r, &column.name))
                .unwrap_or(&column.name)
                .clone();
            if !seen.insert(name.to_lowercase()) {
                return Err(MigrateError::Config(format!(
                    "table '{}' maps two columns to destination name '{}'",
                    table.name, name
                )));
            }

            fields.push(TargetField {
                name,
                source_column: column.name.clone(),
                field_type,
                nullable: column.is_nullable,
            });
        }

        Ok(Self {
            identity,
            schema: TargetSchema { fields },
        })
    }

    pub fn schema(&self) -> &TargetSchema {
        &self.schema
    }

    /// Coerce a tokenized row into destination field order and types.
    pub fn project(&self, row: TokenizedRow) -> Result<TargetRow> {
        let offset = row.offset;
        if row.values.len() != self.schema.len() {
            return Err(MigrateError::Projection {
                table: self.identity.clone(),
                offset,
                column: "*".into(),
                message: format!(
                    "row has {} values, schema has {} fields",
                    row.values.len(),
                    self.schema.len()
                ),
            });
        }

        let values = row
            .values
            .into_iter()
            .zip(&self.schema.fields)
            .map(|(value, field)| {
                coerce(value, field).map_err(|message| MigrateError::Projection {
                    table: self.identity.clone(),
                    offset,
                    column: field.source_column.clone(),
                    message,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TargetRow {
            table: self.identity.clone(),
            offset,
            values,
        })
    }

    /// Source column names for the values of a projected row, in order.
    pub fn reverse_columns(&self, row: &TargetRow) -> Vec<String> {
        self.schema
            .fields
            .iter()
            .take(row.values.len())
            .map(|f| f.source_column.clone())
            .collect()
    }
}

fn lookup_rename<'a>(renames: &'a BTreeMap<String, String>, column: &str) -> Option<&'a String> {
    renames
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(column))
        .map(|(_, v)| v)
}

fn coerce(value: SqlValue, field: &TargetField) -> std::result::Result<SqlValue, String> {
    if value.is_null() {
        return if field.nullable {
            Ok(SqlValue::Null)
        } else {
            Err("NULL in non-nullable field".into())
        };
    }

    let coerced = match (field.field_type, value) {
        (TargetType::String, v @ SqlValue::Text(_)) => v,
        (TargetType::String, SqlValue::Uuid(u)) => SqlValue::Text(u.hyphenated().to_string()),

        (TargetType::Int64, SqlValue::I16(v)) => SqlValue::I64(i64::from(v)),
        (TargetType::Int64, SqlValue::I32(v)) => SqlValue::I64(i64::from(v)),
        (TargetType::Int64, v @ SqlValue::I64(_)) => v,

        (TargetType::Float64, SqlValue::F32(v)) => SqlValue::F64(f64::from(v)),
        (TargetType::Float64, v @ SqlValue::F64(_)) => v,

        (TargetType::Numeric, v @ SqlValue::Decimal(_)) => v,
        (TargetType::Numeric, SqlValue::I16(v)) => SqlValue::Decimal(Decimal::from(v)),
        (TargetType::Numeric, SqlValue::I32(v)) => SqlValue::Decimal(Decimal::from(v)),
        (TargetType::Numeric, SqlValue::I64(v)) => SqlValue::Decimal(Decimal::from(v)),

        (TargetType::Bool, v @ SqlValue::Bool(_)) => v,
        (TargetType::Bytes, v @ SqlValue::Bytes(_)) => v,
        (TargetType::Date, v @ SqlValue::Date(_)) => v,
        (TargetType::Time, v @ SqlValue::Time(_)) => v,
        (TargetType::Datetime, v @ SqlValue::DateTime(_)) => v,
        (TargetType::Timestamp, v @ SqlValue::DateTimeOffset(_)) => v,

        (target, other) => {
            return Err(format!(
                "cannot store {} value in {} field '{}'",
                other.type_name(),
                target,
                field.name
            ))
        }
    };
    Ok(coerced)
}
