// Wire Protocol - Framed postcard messages for the TCP connector
//
// Frame: [len: u32 big-endian][postcard payload of len bytes]
//
// Every exchange is unary: the client opens a connection, writes one
// RpcRequest frame, reads one RpcResponse frame, and closes.

use crate::model::{DataRequest, DataResponse, IndexMap, MemberId};
use crate::transport::ConnectorError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default listening port of a networked member
pub const DEFAULT_PORT: u16 = 41120;

/// Default upper bound of one frame's payload
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Identity and advertised address of a networked member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: MemberId,
    pub address: String,
}

impl ServerInfo {
    pub fn new(id: MemberId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

// ============================================================================
// RPC MESSAGES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    /// "Who are you?"
    Who,
    /// Register the caller as a peer of the callee
    BackConnect(ServerInfo),
    /// Push a digest into the callee's inbound-digest mailbox
    CollectIndexMap(IndexMap),
    /// Pull items from the callee's store
    GetData(DataRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResponse<I> {
    Server(ServerInfo),
    Ack,
    Data(DataResponse<I>),
    Error(String),
}

impl<I> RpcResponse<I> {
    /// Short name used in "unexpected response" errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Server(_) => "Server",
            Self::Ack => "Ack",
            Self::Data(_) => "Data",
            Self::Error(_) => "Error",
        }
    }
}

// ============================================================================
// FRAMING
// ============================================================================

/// Encode `message` and write it as one frame
pub async fn write_frame<W, T>(
    writer: &mut W,
    message: &T,
    max_frame_size: usize,
) -> Result<(), ConnectorError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = postcard::to_allocvec(message)?;
    if payload.len() > max_frame_size || payload.len() > u32::MAX as usize {
        return Err(ConnectorError::FrameTooLarge {
            size: payload.len(),
            max: max_frame_size,
        });
    }

    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it
pub async fn read_frame<R, T>(reader: &mut R, max_frame_size: usize) -> Result<T, ConnectorError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > max_frame_size {
        return Err(ConnectorError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(postcard::from_bytes(&payload)?)
}
