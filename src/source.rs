// ABOUTME: Change stream seam and its Canal implementation
// ABOUTME: Batches are delivered unacknowledged; the sync loop acks or rolls back each one

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use canal_client::protocol::{Entry, EntryType, EventType};
use canal_client::{CanalClient, Subscription};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::change::{ChangeRecord, EntryKind, EventKind, RecordHeader};
use crate::config::CanalConfig;

/// One poll result. `id` is `None` when the source had nothing to deliver.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    pub id: Option<i64>,
    pub records: Vec<ChangeRecord>,
}

#[async_trait]
pub trait ChangeStreamSource: Send {
    /// Fetch up to `max_records`, waiting at most `timeout` for them.
    async fn poll(&mut self, max_records: usize, timeout: Duration) -> Result<ChangeBatch>;

    /// Confirm a batch so it is never redelivered.
    async fn ack(&mut self, batch_id: i64) -> Result<()>;

    /// Return a batch to the stream for redelivery.
    async fn rollback(&mut self, batch_id: i64) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

pub struct CanalSource<S = TcpStream> {
    client: CanalClient<S>,
}

impl CanalSource<TcpStream> {
    /// Connect and authenticate. The source is not subscribed yet.
    pub async fn connect(config: &CanalConfig) -> Result<Self> {
        let options = canal_client::ClientOptions {
            read_timeout: config.read_timeout(),
            ..Default::default()
        };
        let client = CanalClient::connect(
            &config.host,
            config.port,
            config.connect_timeout(),
            options,
        )
        .await
        .with_context(|| {
            format!(
                "Failed to connect to canal server at {}:{}",
                config.host, config.port
            )
        })?;
        tracing::info!("Connected to canal server: {}:{}", config.host, config.port);

        let mut source = Self { client };
        source
            .client
            .authenticate(&config.username, &config.password)
            .await
            .context("Canal authentication failed")?;
        Ok(source)
    }
}

impl<S> CanalSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(client: CanalClient<S>) -> Self {
        Self { client }
    }

    pub async fn subscribe(&mut self, subscription: Subscription) -> Result<()> {
        let destination = subscription.destination.clone();
        self.client
            .subscribe(subscription)
            .await
            .with_context(|| format!("Failed to subscribe to canal destination '{}'", destination))
    }
}

#[async_trait]
impl<S> ChangeStreamSource for CanalSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn poll(&mut self, max_records: usize, timeout: Duration) -> Result<ChangeBatch> {
        let fetch_size = i32::try_from(max_records).unwrap_or(i32::MAX);
        let wait = (!timeout.is_zero()).then_some(timeout);
        let batch = self
            .client
            .get_without_ack(fetch_size, wait)
            .await
            .context("Failed to fetch batch from canal")?;
        Ok(ChangeBatch {
            id: batch.has_id().then_some(batch.id),
            records: batch.entries.into_iter().map(record_from_entry).collect(),
        })
    }

    async fn ack(&mut self, batch_id: i64) -> Result<()> {
        self.client
            .ack(batch_id)
            .await
            .with_context(|| format!("Failed to ack canal batch {}", batch_id))
    }

    async fn rollback(&mut self, batch_id: i64) -> Result<()> {
        self.client
            .rollback(batch_id)
            .await
            .with_context(|| format!("Failed to roll back canal batch {}", batch_id))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .context("Failed to disconnect from canal")
    }
}

/// An absent entry type reads as a row change; an absent event type is not
/// a row mutation, so such records are discarded by translation.
pub fn record_from_entry(entry: Entry) -> ChangeRecord {
    let entry_kind = match entry.entry_type.map(EntryType::try_from) {
        None | Some(Ok(EntryType::RowData)) => EntryKind::RowChange,
        Some(Ok(EntryType::TransactionBegin)) => EntryKind::TransactionBegin,
        Some(Ok(EntryType::TransactionEnd)) => EntryKind::TransactionEnd,
        Some(_) => EntryKind::Other,
    };
    let header = entry.header.unwrap_or_default();
    let event_kind = match header.event_type.map(EventType::try_from) {
        Some(Ok(EventType::Insert)) => EventKind::Insert,
        Some(Ok(EventType::Update)) => EventKind::Update,
        Some(Ok(EventType::Delete)) => EventKind::Delete,
        _ => EventKind::Other,
    };
    ChangeRecord {
        header: RecordHeader {
            schema: header.schema_name,
            table: header.table_name,
            event_kind,
            entry_kind,
        },
        payload: entry.store_value,
    }
}
