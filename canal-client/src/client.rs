use std::time::Duration;

use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::CanalError;
use crate::frame::{read_packet, write_packet, DEFAULT_MAX_FRAME_SIZE};
use crate::protocol::{
    Ack, ClientAck, ClientAuth, ClientRollback, Compression, Entry, Get, Handshake, Messages,
    Packet, PacketType, Sub, TIME_UNIT_MILLISECONDS,
};

/// Batch id the server returns when it had nothing to deliver.
pub const EMPTY_BATCH_ID: i64 = -1;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long to wait for any server reply, on top of a `Get` wait.
    pub read_timeout: Duration,
    pub max_frame_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub client_id: String,
    pub destination: String,
    pub filter: String,
}

/// One `Get` response. Entries are still encoded change records.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: i64,
    pub entries: Vec<Entry>,
}

impl Batch {
    fn empty() -> Self {
        Self {
            id: EMPTY_BATCH_ID,
            entries: Vec::new(),
        }
    }

    /// Whether the server assigned a real batch that must be acked or rolled back.
    pub fn has_id(&self) -> bool {
        self.id != EMPTY_BATCH_ID
    }
}

/// A session with a Canal server.
///
/// The session is strictly request/response: every call writes one packet
/// and, where the protocol defines a reply, reads exactly one packet back.
pub struct CanalClient<S = TcpStream> {
    stream: S,
    options: ClientOptions,
    handshake: Handshake,
    subscription: Option<Subscription>,
}

impl CanalClient<TcpStream> {
    /// Open a TCP connection and complete the server handshake.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        options: ClientOptions,
    ) -> Result<Self, CanalError> {
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| CanalError::Timeout(connect_timeout))??;
        stream.set_nodelay(true)?;
        tracing::debug!("Connected to canal server at {}:{}", host, port);
        Self::handshake(stream, options).await
    }
}

impl<S> CanalClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wait for the server's greeting on an already-open stream.
    pub async fn handshake(stream: S, options: ClientOptions) -> Result<Self, CanalError> {
        let mut client = Self {
            stream,
            options,
            handshake: Handshake::default(),
            subscription: None,
        };
        let packet = client.receive().await?;
        expect_type(&packet, PacketType::Handshake, "handshake")?;
        client.handshake = Handshake::decode(packet.body.as_slice())
            .map_err(|e| CanalError::decode("handshake", e))?;
        tracing::debug!(
            "Received canal handshake ({} seed bytes)",
            client.handshake.seeds.len()
        );
        Ok(client)
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    /// Log in. The idle timeouts are left unset so the server keeps its own
    /// session idle limit.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), CanalError> {
        let auth = ClientAuth {
            username: username.to_string(),
            password: password.as_bytes().to_vec(),
            ..Default::default()
        };
        self.send(PacketType::ClientAuthentication, &auth).await?;
        self.expect_ack("authentication").await
    }

    pub async fn subscribe(&mut self, subscription: Subscription) -> Result<(), CanalError> {
        let sub = Sub {
            destination: subscription.destination.clone(),
            client_id: subscription.client_id.clone(),
            filter: subscription.filter.clone(),
        };
        self.send(PacketType::Subscription, &sub).await?;
        self.expect_ack("subscription").await?;
        tracing::debug!(
            "Subscribed to canal destination '{}' as client {} with filter {}",
            subscription.destination,
            subscription.client_id,
            subscription.filter
        );
        self.subscription = Some(subscription);
        Ok(())
    }

    /// Fetch up to `fetch_size` entries without acknowledging them.
    ///
    /// With `wait` set the server holds the request until it has a full batch
    /// or the wait elapses; without it the server answers immediately.
    pub async fn get_without_ack(
        &mut self,
        fetch_size: i32,
        wait: Option<Duration>,
    ) -> Result<Batch, CanalError> {
        let sub = self
            .subscription
            .as_ref()
            .ok_or(CanalError::NotSubscribed)?;
        let (wait_ms, unit) = match wait {
            Some(wait) => (
                wait.as_millis().min(i64::MAX as u128) as i64,
                TIME_UNIT_MILLISECONDS,
            ),
            None => (-1, -1),
        };
        let get = Get {
            destination: sub.destination.clone(),
            client_id: sub.client_id.clone(),
            fetch_size,
            timeout: Some(wait_ms),
            unit: Some(unit),
            auto_ack: Some(false),
        };
        self.send(PacketType::Get, &get).await?;

        let budget = self.options.read_timeout + wait.unwrap_or_default();
        let packet = self.receive_within(budget).await?;
        match PacketType::try_from(packet.packet_type).ok() {
            Some(PacketType::Messages) => {
                ensure_uncompressed(&packet)?;
                let messages = Messages::decode(packet.body.as_slice())
                    .map_err(|e| CanalError::decode("messages", e))?;
                let entries = messages
                    .messages
                    .iter()
                    .map(|raw| Entry::decode(raw.as_slice()))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| CanalError::decode("entry", e))?;
                Ok(Batch {
                    id: messages.batch_id,
                    entries,
                })
            }
            Some(PacketType::Ack) => {
                check_ack(&packet, "get")?;
                Ok(Batch::empty())
            }
            _ => Err(CanalError::UnexpectedPacket {
                expected: "messages",
                actual: packet.packet_type,
            }),
        }
    }

    /// Confirm a batch. The server sends no reply.
    pub async fn ack(&mut self, batch_id: i64) -> Result<(), CanalError> {
        let sub = self
            .subscription
            .as_ref()
            .ok_or(CanalError::NotSubscribed)?;
        let ack = ClientAck {
            destination: sub.destination.clone(),
            client_id: sub.client_id.clone(),
            batch_id,
        };
        self.send(PacketType::ClientAck, &ack).await
    }

    /// Ask the server to redeliver a batch. The server sends no reply.
    pub async fn rollback(&mut self, batch_id: i64) -> Result<(), CanalError> {
        let sub = self
            .subscription
            .as_ref()
            .ok_or(CanalError::NotSubscribed)?;
        let rollback = ClientRollback {
            destination: sub.destination.clone(),
            client_id: sub.client_id.clone(),
            batch_id,
        };
        self.send(PacketType::ClientRollback, &rollback).await
    }

    /// Close the write half; the server drops the session on EOF.
    pub async fn disconnect(&mut self) -> Result<(), CanalError> {
        self.subscription = None;
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn send<M: Message>(&mut self, packet_type: PacketType, body: &M) -> Result<(), CanalError> {
        let packet = Packet {
            packet_type: packet_type as i32,
            body: body.encode_to_vec(),
            ..Default::default()
        };
        timeout(
            self.options.read_timeout,
            write_packet(&mut self.stream, &packet),
        )
        .await
        .map_err(|_| CanalError::Timeout(self.options.read_timeout))?
    }

    async fn receive(&mut self) -> Result<Packet, CanalError> {
        let budget = self.options.read_timeout;
        self.receive_within(budget).await
    }

    async fn receive_within(&mut self, budget: Duration) -> Result<Packet, CanalError> {
        let max = self.options.max_frame_size;
        timeout(budget, read_packet(&mut self.stream, max))
            .await
            .map_err(|_| CanalError::Timeout(budget))?
    }

    async fn expect_ack(&mut self, operation: &'static str) -> Result<(), CanalError> {
        let packet = self.receive().await?;
        expect_type(&packet, PacketType::Ack, "ack")?;
        check_ack(&packet, operation)
    }
}

fn expect_type(packet: &Packet, expected: PacketType, name: &'static str) -> Result<(), CanalError> {
    if packet.packet_type == expected as i32 {
        Ok(())
    } else {
        Err(CanalError::UnexpectedPacket {
            expected: name,
            actual: packet.packet_type,
        })
    }
}

fn check_ack(packet: &Packet, operation: &'static str) -> Result<(), CanalError> {
    let ack = Ack::decode(packet.body.as_slice()).map_err(|e| CanalError::decode("ack", e))?;
    match ack.error_code {
        Some(code) if code > 0 => Err(CanalError::Rejected {
            operation,
            code,
            message: ack.error_message,
        }),
        _ => Ok(()),
    }
}

fn ensure_uncompressed(packet: &Packet) -> Result<(), CanalError> {
    match packet.compression {
        None => Ok(()),
        Some(c) if c == Compression::None as i32 || c == Compression::CompatibleProto2 as i32 => {
            Ok(())
        }
        Some(other) => Err(CanalError::UnsupportedCompression(other)),
    }
}
