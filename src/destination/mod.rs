// ABOUTME: Destination seam: statement execution, commit and key metadata
// ABOUTME: The MySQL driver lives in mysql.rs; tests substitute in-memory destinations

pub mod mysql;

use anyhow::Result;
use async_trait::async_trait;

use crate::apply::ExecError;
use crate::primary_keys::KeyColumn;
use crate::sql::SqlStatement;

pub use mysql::MysqlDestination;

/// A database the relay writes into.
///
/// Statements run inside an implicit transaction that only `commit` ends;
/// a failed statement must not poison the statements after it.
#[async_trait]
pub trait Destination: Send {
    /// Primary key columns of every table in `schemas`, ordered by schema,
    /// table and ordinal position.
    async fn primary_key_columns(&mut self, schemas: &[String]) -> Result<Vec<KeyColumn>>;

    /// Execute one statement, returning the affected row count.
    async fn execute(&mut self, statement: &SqlStatement) -> Result<u64, ExecError>;

    async fn commit(&mut self) -> Result<(), ExecError>;

    async fn close(&mut self) -> Result<()>;
}
