// ABOUTME: Parameterized statements handed to the destination and their bound values
// ABOUTME: Identifiers are always backquoted; values are never interpolated into SQL text

use serde::Serialize;
use std::fmt;

use crate::change::QualifiedTable;

/// A bound statement parameter.
///
/// Captured values arrive as text, so text is the only non-null variant;
/// the destination casts it to the column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Null => None,
            SqlValue::Text(s) => Some(s),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

/// One row mutation rendered for the destination.
///
/// `columns[i]` names the column `params[i]` is bound to, which lets
/// drivers other than a SQL server interpret the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    pub table: QualifiedTable,
    pub kind: MutationKind,
    pub sql: String,
    pub columns: Vec<String>,
    pub params: Vec<SqlValue>,
}

impl SqlStatement {
    /// Parameters as a JSON array, used in verbose output and failure logs.
    pub fn params_json(&self) -> String {
        serde_json::to_string(&self.params).unwrap_or_else(|_| format!("{:?}", self.params))
    }

    /// The line printed per statement in verbose mode.
    pub fn verbose_line(&self) -> String {
        format!("sql=[{}] params={}", self.sql, self.params_json())
    }
}

/// Quote a MySQL identifier (database, table, column)
///
/// MySQL uses backticks for identifier quoting. Escapes embedded backticks
/// by doubling them.
///
/// # Examples
///
/// ```
/// use canal_relay::sql::quote_mysql_ident;
/// assert_eq!(quote_mysql_ident("users"), "`users`");
/// assert_eq!(quote_mysql_ident("user`name"), "`user``name`");
/// ```
pub fn quote_mysql_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('`');
    for ch in identifier.chars() {
        if ch == '`' {
            quoted.push('`');
        }
        quoted.push(ch);
    }
    quoted.push('`');
    quoted
}
