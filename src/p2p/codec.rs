//! Frame codec: 4-byte big-endian length prefix, JSON body.
//!
//! Reads run under a 30 s deadline, writes pack prefix and body into one
//! buffer and flush atomically under a 10 s deadline. An oversize frame
//! closes the connection.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::p2p::message::Message;

/// Frames above this close the connection.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum P2pError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds limit")]
    OversizeFrame(usize),
    #[error("read deadline exceeded")]
    ReadTimeout,
    #[error("write deadline exceeded")]
    WriteTimeout,
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("network id mismatch: ours {ours}, theirs {theirs}")]
    NetworkMismatch { ours: String, theirs: String },
    #[error("handshake expected, got message type {0}")]
    BadHandshake(u8),
    #[error("peer disconnected")]
    Disconnected,
}

pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, P2pError> {
    let mut len_buf = [0u8; 4];
    timeout(READ_TIMEOUT, reader.read_exact(&mut len_buf))
        .await
        .map_err(|_| P2pError::ReadTimeout)?
        .map_err(map_eof)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(P2pError::OversizeFrame(len));
    }
    let mut body = vec![0u8; len];
    timeout(READ_TIMEOUT, reader.read_exact(&mut body))
        .await
        .map_err(|_| P2pError::ReadTimeout)?
        .map_err(map_eof)?;
    Ok(serde_json::from_slice(&body)?)
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), P2pError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(P2pError::OversizeFrame(body.len()));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    timeout(WRITE_TIMEOUT, async {
        writer.write_all(&frame).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| P2pError::WriteTimeout)?
    .map_err(P2pError::from)
}

fn map_eof(err: std::io::Error) -> P2pError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        P2pError::Disconnected
    } else {
        P2pError::Io(err)
    }
}
