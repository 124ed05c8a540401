// ABOUTME: Resolves the identity column of each replicated table from destination metadata
// ABOUTME: Built once per session; tables without a primary key are simply absent

use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::change::QualifiedTable;
use crate::destination::Destination;

/// One primary key column as reported by the destination's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl KeyColumn {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
        }
    }
}

/// Query listing primary key columns for `schema_count` schemas.
pub fn key_columns_query(schema_count: usize) -> String {
    let placeholders = vec!["?"; schema_count].join(",");
    format!(
        "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA IN ({}) AND COLUMN_KEY = 'PRI' \
         ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION",
        placeholders
    )
}

#[derive(Debug, Clone, Default)]
pub struct PrimaryKeyMap {
    keys: HashMap<QualifiedTable, String>,
}

impl PrimaryKeyMap {
    /// Load the map from the destination's catalog.
    pub async fn load<D>(destination: &mut D, schemas: &[String]) -> Result<Self>
    where
        D: Destination + ?Sized,
    {
        let rows = destination
            .primary_key_columns(schemas)
            .await
            .context("Failed to query primary key metadata")?;
        let map = Self::from_rows(rows);
        tracing::info!(
            "Resolved primary keys for {} tables in {} schemas",
            map.len(),
            schemas.len()
        );
        Ok(map)
    }

    /// Build the map from catalog rows ordered by ordinal position.
    ///
    /// With a composite key the first column is the identity column.
    pub fn from_rows(rows: impl IntoIterator<Item = KeyColumn>) -> Self {
        let mut keys: HashMap<QualifiedTable, String> = HashMap::new();
        for row in rows {
            let table = QualifiedTable::new(row.schema, row.table);
            match keys.get(&table) {
                Some(identity) => {
                    tracing::debug!(
                        "{} has a composite primary key; using `{}`, ignoring `{}`",
                        table,
                        identity,
                        row.column
                    );
                }
                None => {
                    keys.insert(table, row.column);
                }
            }
        }
        Self { keys }
    }

    pub fn get(&self, table: &QualifiedTable) -> Option<&str> {
        self.keys.get(table).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_key_column_wins() {
        let map = PrimaryKeyMap::from_rows(vec![
            KeyColumn::new("shop", "order_items", "order_id"),
            KeyColumn::new("shop", "order_items", "line_no"),
            KeyColumn::new("shop", "orders", "id"),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get(&QualifiedTable::new("shop", "order_items")),
            Some("order_id")
        );
        assert_eq!(map.get(&QualifiedTable::new("shop", "orders")), Some("id"));
    }

    #[test]
    fn tables_are_scoped_by_schema() {
        let map = PrimaryKeyMap::from_rows(vec![
            KeyColumn::new("a", "users", "id"),
            KeyColumn::new("b", "users", "uuid"),
        ]);
        assert_eq!(map.get(&QualifiedTable::new("a", "users")), Some("id"));
        assert_eq!(map.get(&QualifiedTable::new("b", "users")), Some("uuid"));
        assert_eq!(map.get(&QualifiedTable::new("c", "users")), None);
    }

    #[test]
    fn query_has_one_placeholder_per_schema() {
        let query = key_columns_query(3);
        assert!(query.contains("TABLE_SCHEMA IN (?,?,?)"));
        assert!(query.contains("COLUMN_KEY = 'PRI'"));
        assert!(query.contains("ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION"));
    }
}
