// ABOUTME: Change records delivered by a change stream and the row images decoded from them
// ABOUTME: Row images keep source column order plus a name index built once

use std::collections::HashMap;
use std::fmt;

use canal_client::protocol;
use prost::Message;

use crate::sql::{quote_mysql_ident, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    RowChange,
    TransactionBegin,
    TransactionEnd,
    /// Heartbeats and GTID markers.
    Other,
}

impl EntryKind {
    pub fn carries_rows(&self) -> bool {
        matches!(self, EntryKind::RowChange)
    }
}

/// Source schema and table, the key of the primary key map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedTable {
    pub schema: String,
    pub table: String,
}

impl QualifiedTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

/// Renders as `` `schema`.`table` ``.
impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            quote_mysql_ident(&self.schema),
            quote_mysql_ident(&self.table)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub schema: String,
    pub table: String,
    pub event_kind: EventKind,
    pub entry_kind: EntryKind,
}

/// A captured change as delivered by the stream. The payload stays encoded
/// until translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

impl ChangeRecord {
    pub fn table(&self) -> QualifiedTable {
        QualifiedTable::new(&self.header.schema, &self.header.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub value: SqlValue,
    /// Whether the source marked the column as part of the row key.
    pub is_key: bool,
}

impl Column {
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowImage {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
}

impl RowImage {
    pub fn new(columns: Vec<Column>) -> Self {
        let mut index = HashMap::with_capacity(columns.len());
        for (pos, column) in columns.iter().enumerate() {
            // first occurrence wins
            index.entry(column.name.clone()).or_insert(pos);
        }
        Self { columns, index }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&pos| &self.columns[pos])
    }

    /// First column the source flagged as a key column.
    pub fn source_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.is_key)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Before and after images of one changed row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPair {
    pub before: RowImage,
    pub after: RowImage,
}

/// Decode a Canal `RowChange` payload into row pairs.
pub fn decode_rows(payload: &[u8]) -> Result<Vec<RowPair>, prost::DecodeError> {
    let change = protocol::RowChange::decode(payload)?;
    Ok(change
        .row_datas
        .into_iter()
        .map(|row| RowPair {
            before: image_from_columns(row.before_columns),
            after: image_from_columns(row.after_columns),
        })
        .collect())
}

fn image_from_columns(columns: Vec<protocol::Column>) -> RowImage {
    RowImage::new(
        columns
            .into_iter()
            .map(|c| Column {
                value: if c.is_null.unwrap_or(false) {
                    SqlValue::Null
                } else {
                    SqlValue::Text(c.value)
                },
                name: c.name,
                is_key: c.is_key,
            })
            .collect(),
    )
}
