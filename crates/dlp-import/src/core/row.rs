//! Row values flowing between pipeline stages.
//!
//! Each stage consumes its input row and produces a new one; rows are never
//! mutated in place by a later stage.

use std::sync::Arc;

use super::identity::TableIdentity;
use super::value::SqlValue;

/// A row read from the source, tagged with its table and offset.
///
/// Column names are shared across all rows of a page through an `Arc`, so a
/// row costs only its values.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub table: TableIdentity,
    /// Position of this row within the table's stable ordering.
    pub offset: u64,
    pub columns: Arc<[String]>,
    pub values: Vec<SqlValue>,
}

impl SourceRow {
    pub fn new(
        table: TableIdentity,
        offset: u64,
        columns: Arc<[String]>,
        values: Vec<SqlValue>,
    ) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self {
            table,
            offset,
            columns,
            values,
        }
    }

    /// Look up a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Iterate `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// A source row whose policy-selected columns carry tokens.
///
/// Same column set and order as the [`SourceRow`] it came from; columns with
/// no de-identification strategy keep their original values.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedRow {
    pub table: TableIdentity,
    pub offset: u64,
    pub columns: Arc<[String]>,
    pub values: Vec<SqlValue>,
    /// Indexes of columns whose values were replaced.
    pub tokenized: Vec<usize>,
}

impl TokenizedRow {
    /// Wrap a source row that needed no replacements.
    pub fn passthrough(row: SourceRow) -> Self {
        Self {
            table: row.table,
            offset: row.offset,
            columns: row.columns,
            values: row.values,
            tokenized: Vec::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Drop the tokenization bookkeeping and view the row as a source row.
    pub fn into_source_shape(self) -> SourceRow {
        SourceRow::new(self.table, self.offset, self.columns, self.values)
    }
}

/// A row shaped to its destination schema.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRow {
    pub table: TableIdentity,
    pub offset: u64,
    /// Values ordered by the destination schema's fields.
    pub values: Vec<SqlValue>,
}

/// One page of rows fetched from the source.
#[derive(Debug, Clone)]
pub struct Page {
    /// Offset of the first row in the page.
    pub offset: u64,
    pub rows: Vec<SourceRow>,
    /// No rows exist past this page.
    pub is_last: bool,
}

impl Page {
    /// An empty end-of-table page.
    pub fn end(offset: u64) -> Self {
        Self {
            offset,
            rows: Vec::new(),
            is_last: true,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Offset of the first row after this page.
    pub fn next_offset(&self) -> u64 {
        self.offset + self.rows.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> SourceRow {
        SourceRow::new(
            TableIdentity::new("ds", "t"),
            4,
            Arc::from(vec!["id".to_string(), "name".to_string()]),
            vec![SqlValue::I64(1), SqlValue::from("Ann")],
        )
    }

    #[test]
    fn test_source_row_lookup() {
        let row = row();
        assert_eq!(row.get("name"), Some(&SqlValue::from("Ann")));
        assert_eq!(row.get("missing"), None);
        let cols: Vec<_> = row.iter().map(|(c, _)| c).collect();
        assert_eq!(cols, vec!["id", "name"]);
    }

    #[test]
    fn test_passthrough_round_trip() {
        let original = row();
        let tokenized = TokenizedRow::passthrough(original.clone());
        assert!(tokenized.tokenized.is_empty());
        assert_eq!(tokenized.into_source_shape(), original);
    }

    #[test]
    fn test_page_offsets() {
        let page = Page {
            offset: 100,
            rows: vec![row(), row()],
            is_last: false,
        };
        assert_eq!(page.next_offset(), 102);
        assert!(Page::end(7).is_empty());
        assert!(Page::end(7).is_last);
    }
}
