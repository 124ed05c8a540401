// ABOUTME: Translates captured row changes into parameterized INSERT/UPDATE/DELETE statements
// ABOUTME: One statement per changed row; values are bound, identifiers backquoted

use serde::Deserialize;
use thiserror::Error;

use crate::change::{decode_rows, ChangeRecord, EventKind, QualifiedTable, RowImage, RowPair};
use crate::primary_keys::PrimaryKeyMap;
use crate::sql::{quote_mysql_ident, MutationKind, SqlStatement, SqlValue};

/// Column name and parameter used when a table's identity cannot be resolved.
pub const PLACEHOLDER: &str = "?";

/// What to do with an Update/Delete on a table that has no known identity column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityFallback {
    /// Emit the statement with a `` `?` `` predicate that matches nothing useful.
    #[default]
    Placeholder,
    /// Use the first before-image column the source flagged as a key.
    SourceKey,
    /// Reject the row.
    Skip,
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("failed to decode row change for {table}: {source}")]
    Decode {
        table: QualifiedTable,
        #[source]
        source: prost::DecodeError,
    },
    #[error("no identity column known for {table}, row skipped")]
    UnresolvedIdentity { table: QualifiedTable },
}

/// Statements for one record, in row order, plus rows that produced none.
#[derive(Debug, Default)]
pub struct Translation {
    pub statements: Vec<SqlStatement>,
    pub rejected: Vec<TranslateError>,
}

impl Translation {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.rejected.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntryTranslator {
    fallback: IdentityFallback,
}

impl EntryTranslator {
    pub fn new(fallback: IdentityFallback) -> Self {
        Self { fallback }
    }

    pub fn translate(
        &self,
        record: &ChangeRecord,
        keys: &PrimaryKeyMap,
    ) -> Result<Translation, TranslateError> {
        if !record.header.entry_kind.carries_rows() {
            return Ok(Translation::default());
        }
        let kind = match record.header.event_kind {
            EventKind::Insert => MutationKind::Insert,
            EventKind::Update => MutationKind::Update,
            EventKind::Delete => MutationKind::Delete,
            EventKind::Other => return Ok(Translation::default()),
        };

        let table = record.table();
        let rows = decode_rows(&record.payload).map_err(|source| TranslateError::Decode {
            table: table.clone(),
            source,
        })?;
        let identity = keys.get(&table);

        let mut translation = Translation::default();
        for row in &rows {
            let statement = match kind {
                MutationKind::Insert => Ok(insert(&table, &row.after)),
                MutationKind::Update => self.update(&table, identity, row),
                MutationKind::Delete => self.delete(&table, identity, &row.before),
            };
            match statement {
                Ok(statement) => translation.statements.push(statement),
                Err(e) => translation.rejected.push(e),
            }
        }
        Ok(translation)
    }

    fn update(
        &self,
        table: &QualifiedTable,
        identity: Option<&str>,
        row: &RowPair,
    ) -> Result<SqlStatement, TranslateError> {
        let (key, key_value) = self.predicate(table, identity, &row.before)?;

        let assignments: Vec<String> = row
            .after
            .columns()
            .iter()
            .map(|c| format!("{}=?", quote_mysql_ident(&c.name)))
            .collect();
        let mut columns: Vec<String> = row.after.columns().iter().map(|c| c.name.clone()).collect();
        let mut params: Vec<SqlValue> =
            row.after.columns().iter().map(|c| c.value.clone()).collect();
        columns.push(key.clone());
        params.push(key_value);

        Ok(SqlStatement {
            table: table.clone(),
            kind: MutationKind::Update,
            sql: format!(
                "UPDATE {} SET {} WHERE {}=?",
                table,
                assignments.join(","),
                quote_mysql_ident(&key)
            ),
            columns,
            params,
        })
    }

    fn delete(
        &self,
        table: &QualifiedTable,
        identity: Option<&str>,
        before: &RowImage,
    ) -> Result<SqlStatement, TranslateError> {
        let (key, key_value) = self.predicate(table, identity, before)?;
        Ok(SqlStatement {
            table: table.clone(),
            kind: MutationKind::Delete,
            sql: format!("DELETE FROM {} WHERE {}=?", table, quote_mysql_ident(&key)),
            columns: vec![key],
            params: vec![key_value],
        })
    }

    /// Identity column and its before-image value for the WHERE clause.
    fn predicate(
        &self,
        table: &QualifiedTable,
        identity: Option<&str>,
        before: &RowImage,
    ) -> Result<(String, SqlValue), TranslateError> {
        if let Some(column) = identity {
            let value = match before.get(column) {
                Some(c) => c.value.clone(),
                None => {
                    tracing::warn!(
                        "Identity column `{}` missing from before-image of {}; binding NULL",
                        column,
                        table
                    );
                    SqlValue::Null
                }
            };
            return Ok((column.to_string(), value));
        }

        match self.fallback {
            IdentityFallback::Placeholder => Ok(placeholder()),
            IdentityFallback::SourceKey => Ok(before
                .source_key()
                .map(|c| (c.name.clone(), c.value.clone()))
                .unwrap_or_else(placeholder)),
            IdentityFallback::Skip => Err(TranslateError::UnresolvedIdentity {
                table: table.clone(),
            }),
        }
    }
}

fn placeholder() -> (String, SqlValue) {
    (PLACEHOLDER.to_string(), SqlValue::from(PLACEHOLDER))
}

fn insert(table: &QualifiedTable, after: &RowImage) -> SqlStatement {
    let names: Vec<String> = after
        .columns()
        .iter()
        .map(|c| quote_mysql_ident(&c.name))
        .collect();
    let markers = vec!["?"; names.len()].join(",");
    SqlStatement {
        table: table.clone(),
        kind: MutationKind::Insert,
        sql: format!(
            "INSERT INTO {}({}) VALUES ({})",
            table,
            names.join(","),
            markers
        ),
        columns: after.columns().iter().map(|c| c.name.clone()).collect(),
        params: after.columns().iter().map(|c| c.value.clone()).collect(),
    }
}
