//! Partition Transport Wire Protocol
//!
//! Length-framed messages over TCP. All integers are big-endian.
//!
//! - Request: `u32 len | bincode(PartitionRequest)`
//! - Response: `u8 status | u32 block_count | block_count × (u32 len | payload)`
//!
//! A `NotFound` response is the zero-length sentinel: status `1` with `block_count = 0`.

use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::types::TaskGroupId;
use crate::shuffle::types::SubRangeSpan;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Asks for every block of `producer` whose sub-range lies in `span`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionRequest {
    pub producer: TaskGroupId,
    pub span: SubRangeSpan,
}

impl PartitionRequest {
    /// Rejects spans no response could carry: empty ones, and ones whose per-block length
    /// headers alone would exceed `max_frame_bytes`.
    pub fn validate(&self, max_frame_bytes: u32) -> RuntimeResult<()> {
        if self.span.start >= self.span.end {
            return Err(RuntimeError::Protocol(format!(
                "empty span {} requested for {}",
                self.span, self.producer
            )));
        }
        if self.span.len() as u64 * 4 > max_frame_bytes as u64 {
            return Err(RuntimeError::Protocol(format!(
                "span {} of {} is wider than a {} byte frame can carry",
                self.span, self.producer, max_frame_bytes
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseStatus {
    Ok = 0,
    NotFound = 1,
    BadRequest = 2,
}

impl TryFrom<u8> for ResponseStatus {
    type Error = RuntimeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::NotFound),
            2 => Ok(Self::BadRequest),
            other => Err(RuntimeError::Protocol(format!(
                "unknown response status {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionResponse {
    /// Block payloads in sub-range order.
    Blocks(Vec<Vec<u8>>),
    NotFound,
    BadRequest,
}

pub async fn write_request<W>(writer: &mut W, request: &PartitionRequest) -> RuntimeResult<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = bincode::serialize(request)?;
    writer.write_u32(encoded.len() as u32).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next request. Returns `None` once the peer has closed the connection.
pub async fn read_request<R>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> RuntimeResult<Option<PartitionRequest>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > max_frame_bytes {
        return Err(RuntimeError::Protocol(format!(
            "request frame of {} bytes exceeds limit {}",
            len, max_frame_bytes
        )));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    let request = bincode::deserialize(&buf)?;
    Ok(Some(request))
}

pub async fn write_response<W, B>(
    writer: &mut W,
    status: ResponseStatus,
    blocks: &[B],
) -> RuntimeResult<()>
where
    W: AsyncWrite + Unpin,
    B: AsRef<[u8]>,
{
    let count = u32::try_from(blocks.len())
        .map_err(|_| RuntimeError::Protocol(format!("{} blocks do not fit a frame", blocks.len())))?;
    writer.write_u8(status as u8).await?;
    writer.write_u32(count).await?;
    for block in blocks {
        let payload = block.as_ref();
        let len = u32::try_from(payload.len()).map_err(|_| {
            RuntimeError::Protocol(format!("block of {} bytes does not fit a frame", payload.len()))
        })?;
        writer.write_u32(len).await?;
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

pub async fn read_response<R>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> RuntimeResult<PartitionResponse>
where
    R: AsyncRead + Unpin,
{
    let status = ResponseStatus::try_from(reader.read_u8().await?)?;
    let count = reader.read_u32().await?;

    match status {
        ResponseStatus::NotFound => return Ok(PartitionResponse::NotFound),
        ResponseStatus::BadRequest => return Ok(PartitionResponse::BadRequest),
        ResponseStatus::Ok => {}
    }

    let mut blocks = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let len = reader.read_u32().await?;
        if len > max_frame_bytes {
            return Err(RuntimeError::Protocol(format!(
                "block frame of {} bytes exceeds limit {}",
                len, max_frame_bytes
            )));
        }
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;
        blocks.push(payload);
    }
    Ok(PartitionResponse::Blocks(blocks))
}
