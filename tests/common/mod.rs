#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use canal_client::protocol;
use canal_relay::apply::{ExecError, FailureKind};
use canal_relay::change::{ChangeRecord, EntryKind, EventKind, RecordHeader};
use canal_relay::destination::Destination;
use canal_relay::primary_keys::KeyColumn;
use canal_relay::source::{ChangeBatch, ChangeStreamSource};
use canal_relay::sql::{MutationKind, SqlStatement, SqlValue};
use canal_relay::sync::Clock;
use prost::Message;
use tokio::sync::broadcast;

#[derive(Debug, Default)]
pub struct SourceLog {
    pub polls: usize,
    pub acks: Vec<i64>,
    pub rollbacks: Vec<i64>,
    pub disconnects: usize,
}

/// Replays scripted poll results, then requests shutdown and returns empty batches.
pub struct ScriptedSource {
    script: VecDeque<Result<ChangeBatch>>,
    shutdown: broadcast::Sender<()>,
    pub log: Arc<Mutex<SourceLog>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<ChangeBatch>>, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            script: script.into(),
            shutdown,
            log: Arc::new(Mutex::new(SourceLog::default())),
        }
    }
}

#[async_trait]
impl ChangeStreamSource for ScriptedSource {
    async fn poll(&mut self, _max_records: usize, _timeout: Duration) -> Result<ChangeBatch> {
        self.log.lock().unwrap().polls += 1;
        let next = self.script.pop_front();
        if self.script.is_empty() {
            let _ = self.shutdown.send(());
        }
        next.unwrap_or_else(|| Ok(ChangeBatch::default()))
    }

    async fn ack(&mut self, batch_id: i64) -> Result<()> {
        self.log.lock().unwrap().acks.push(batch_id);
        Ok(())
    }

    async fn rollback(&mut self, batch_id: i64) -> Result<()> {
        self.log.lock().unwrap().rollbacks.push(batch_id);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.log.lock().unwrap().disconnects += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DestinationLog {
    pub executed: Vec<SqlStatement>,
    pub commits: usize,
    pub closes: usize,
    /// Rows by key value, each row a column -> value map.
    pub rows: BTreeMap<String, BTreeMap<String, SqlValue>>,
}

/// In-memory destination holding a single table keyed by `key_column`.
pub struct MemoryDestination {
    key_column: String,
    fail_statements: HashSet<usize>,
    fail_commit: bool,
    pub log: Arc<Mutex<DestinationLog>>,
}

impl MemoryDestination {
    pub fn new(key_column: &str) -> Self {
        Self {
            key_column: key_column.to_string(),
            fail_statements: HashSet::new(),
            fail_commit: false,
            log: Arc::new(Mutex::new(DestinationLog::default())),
        }
    }

    pub fn failing_statement(mut self, index: usize) -> Self {
        self.fail_statements.insert(index);
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }
}

fn key_text(value: &SqlValue) -> String {
    value.as_text().unwrap_or("NULL").to_string()
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn primary_key_columns(&mut self, schemas: &[String]) -> Result<Vec<KeyColumn>> {
        Ok(schemas
            .iter()
            .map(|schema| KeyColumn::new(schema.as_str(), "t", self.key_column.as_str()))
            .collect())
    }

    async fn execute(&mut self, statement: &SqlStatement) -> Result<u64, ExecError> {
        let mut log = self.log.lock().unwrap();
        let index = log.executed.len();
        log.executed.push(statement.clone());
        if self.fail_statements.contains(&index) {
            return Err(ExecError::new(
                FailureKind::Constraint,
                "Duplicate entry for key 'PRIMARY'",
            ));
        }

        match statement.kind {
            MutationKind::Insert => {
                let row: BTreeMap<String, SqlValue> = statement
                    .columns
                    .iter()
                    .cloned()
                    .zip(statement.params.iter().cloned())
                    .collect();
                let key = row
                    .get(&self.key_column)
                    .map(key_text)
                    .ok_or_else(|| ExecError::new(FailureKind::Constraint, "missing key"))?;
                log.rows.insert(key, row);
                Ok(1)
            }
            MutationKind::Update => {
                let (key, assignments) = statement
                    .params
                    .split_last()
                    .ok_or_else(|| ExecError::new(FailureKind::Syntax, "no predicate"))?;
                let Some(row) = log.rows.get_mut(&key_text(key)) else {
                    return Ok(0);
                };
                for (column, value) in statement.columns.iter().zip(assignments) {
                    row.insert(column.clone(), value.clone());
                }
                Ok(1)
            }
            MutationKind::Delete => {
                let key = statement
                    .params
                    .first()
                    .ok_or_else(|| ExecError::new(FailureKind::Syntax, "no predicate"))?;
                Ok(log.rows.remove(&key_text(key)).map_or(0, |_| 1))
            }
        }
    }

    async fn commit(&mut self) -> Result<(), ExecError> {
        if self.fail_commit {
            return Err(ExecError::new(FailureKind::Connectivity, "server has gone away"));
        }
        self.log.lock().unwrap().commits += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Records requested waits and returns immediately.
#[derive(Clone, Default)]
pub struct ManualClock {
    pub sleeps: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait]
impl Clock for ManualClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

pub fn column(name: &str, value: Option<&str>, is_key: bool) -> protocol::Column {
    protocol::Column {
        name: name.to_string(),
        value: value.unwrap_or_default().to_string(),
        is_null: Some(value.is_none()),
        is_key,
        ..Default::default()
    }
}

pub fn row_record(
    schema: &str,
    event_kind: EventKind,
    before: Vec<protocol::Column>,
    after: Vec<protocol::Column>,
) -> ChangeRecord {
    let payload = protocol::RowChange {
        row_datas: vec![protocol::RowData {
            before_columns: before,
            after_columns: after,
            ..Default::default()
        }],
        ..Default::default()
    }
    .encode_to_vec();
    ChangeRecord {
        header: RecordHeader {
            schema: schema.to_string(),
            table: "t".to_string(),
            event_kind,
            entry_kind: EntryKind::RowChange,
        },
        payload,
    }
}

pub fn boundary(entry_kind: EntryKind) -> ChangeRecord {
    ChangeRecord {
        header: RecordHeader {
            schema: "db".to_string(),
            table: String::new(),
            event_kind: EventKind::Other,
            entry_kind,
        },
        payload: Vec::new(),
    }
}

pub fn batch(id: i64, records: Vec<ChangeRecord>) -> Result<ChangeBatch> {
    Ok(ChangeBatch {
        id: Some(id),
        records,
    })
}
