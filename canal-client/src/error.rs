use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanalError {
    #[error("i/o error talking to canal server: {0}")]
    Io(#[from] std::io::Error),

    #[error("canal server closed the connection")]
    Closed,

    #[error("no response from canal server within {0:?}")]
    Timeout(Duration),

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("failed to decode canal {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    #[error("expected a {expected} packet, got packet type {actual}")]
    UnexpectedPacket { expected: &'static str, actual: i32 },

    #[error("canal payload uses unsupported compression {0}")]
    UnsupportedCompression(i32),

    #[error("canal server rejected {operation} (code {code}): {message}")]
    Rejected {
        operation: &'static str,
        code: i32,
        message: String,
    },

    #[error("client has no active subscription")]
    NotSubscribed,
}

impl CanalError {
    pub(crate) fn decode(what: &'static str, source: prost::DecodeError) -> Self {
        CanalError::Decode { what, source }
    }
}
