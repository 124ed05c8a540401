//! Length-prefixed framing: every packet on the wire is a 4-byte big-endian
//! length followed by that many bytes of an encoded [`Packet`].

use prost::Message;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CanalError;
use crate::protocol::Packet;

/// Upper bound on a single frame unless the caller configures another one.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), CanalError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| CanalError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Vec<u8>, CanalError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(CanalError::Closed),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_size {
        return Err(CanalError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; len];
    match reader.read_exact(&mut body).await {
        Ok(_) => Ok(body),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(CanalError::Closed),
        Err(e) => Err(e.into()),
    }
}

pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), CanalError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &packet.encode_to_vec()).await
}

pub async fn read_packet<R>(reader: &mut R, max_frame_size: usize) -> Result<Packet, CanalError>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(reader, max_frame_size).await?;
    Packet::decode(frame.as_slice()).map_err(|e| CanalError::decode("packet", e))
}
