// ABOUTME: MySQL destination backed by a single mysql_async connection with autocommit off
// ABOUTME: Driver errors are classified so the sync loop can report them uniformly

use anyhow::{Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, Params, Value};

use super::Destination;
use crate::apply::{ExecError, FailureKind};
use crate::config::DestinationConfig;
use crate::primary_keys::{key_columns_query, KeyColumn};
use crate::sql::{SqlStatement, SqlValue};

pub struct MysqlDestination {
    conn: Option<Conn>,
}

impl MysqlDestination {
    pub async fn connect(config: &DestinationConfig) -> Result<Self> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.host.as_str())
            .tcp_port(config.port)
            .user(Some(config.username.as_str()))
            .pass(Some(config.password.as_str()))
            .init(vec!["SET NAMES utf8mb4", "SET autocommit=0"]);

        let conn = Conn::new(opts).await.with_context(|| {
            format!(
                "Failed to connect to destination MySQL at {}:{}",
                config.host, config.port
            )
        })?;
        tracing::info!(
            "Connected to destination MySQL: {}:{}",
            config.host,
            config.port
        );
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut Conn, ExecError> {
        self.conn
            .as_mut()
            .ok_or_else(|| ExecError::new(FailureKind::Connectivity, "connection already closed"))
    }
}

#[async_trait]
impl Destination for MysqlDestination {
    async fn primary_key_columns(&mut self, schemas: &[String]) -> Result<Vec<KeyColumn>> {
        if schemas.is_empty() {
            return Ok(Vec::new());
        }
        let query = key_columns_query(schemas.len());
        let params: Vec<Value> = schemas.iter().map(|s| Value::from(s.as_str())).collect();
        let conn = self.conn().map_err(anyhow::Error::new)?;
        let rows: Vec<(String, String, String)> = conn
            .exec(query, Params::Positional(params))
            .await
            .context("Primary key metadata query failed")?;
        Ok(rows
            .into_iter()
            .map(|(schema, table, column)| KeyColumn::new(schema, table, column))
            .collect())
    }

    async fn execute(&mut self, statement: &SqlStatement) -> Result<u64, ExecError> {
        let params = if statement.params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(statement.params.iter().map(to_mysql_value).collect())
        };
        let conn = self.conn()?;
        conn.exec_drop(statement.sql.as_str(), params)
            .await
            .map_err(exec_error)?;
        Ok(conn.affected_rows())
    }

    async fn commit(&mut self) -> Result<(), ExecError> {
        self.conn()?.query_drop("COMMIT").await.map_err(exec_error)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect()
                .await
                .context("Failed to close destination connection")?;
        }
        Ok(())
    }
}

fn to_mysql_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Text(s) => Value::from(s.as_str()),
    }
}

fn exec_error(err: mysql_async::Error) -> ExecError {
    let kind = match &err {
        mysql_async::Error::Server(server) => classify_server_code(server.code),
        mysql_async::Error::Io(_) => FailureKind::Connectivity,
        _ => FailureKind::Other,
    };
    ExecError::new(kind, err.to_string())
}

/// Map a MySQL server error code to a failure kind.
pub(crate) fn classify_server_code(code: u16) -> FailureKind {
    match code {
        // duplicate key, foreign key, NOT NULL, missing default
        1062 | 1216 | 1217 | 1451 | 1452 | 1048 | 1364 => FailureKind::Constraint,
        // unknown database, table or column
        1049 | 1054 | 1146 => FailureKind::MissingObject,
        1064 | 1149 => FailureKind::Syntax,
        // server shutting down or connection lost
        1053 | 2006 | 2013 => FailureKind::Connectivity,
        _ => FailureKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_server_errors() {
        assert_eq!(classify_server_code(1062), FailureKind::Constraint);
        assert_eq!(classify_server_code(1452), FailureKind::Constraint);
        assert_eq!(classify_server_code(1146), FailureKind::MissingObject);
        assert_eq!(classify_server_code(1054), FailureKind::MissingObject);
        assert_eq!(classify_server_code(1064), FailureKind::Syntax);
        assert_eq!(classify_server_code(2013), FailureKind::Connectivity);
        assert_eq!(classify_server_code(1205), FailureKind::Other);
    }

    #[test]
    fn null_binds_as_sql_null() {
        assert_eq!(to_mysql_value(&SqlValue::Null), Value::NULL);
        assert_eq!(
            to_mysql_value(&SqlValue::from("x")),
            Value::Bytes(b"x".to_vec())
        );
    }
}
