//! Wire framing
//!
//! Every message travels as a 4-byte big-endian length prefix followed by
//! a JSON body.

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Largest accepted frame body (1 MiB)
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Serialize a message into a length-prefixed frame
pub fn encode<T: Serialize>(message: &T) -> io::Result<BytesMut> {
    let body = serde_json::to_vec(message).map_err(|e| invalid_data(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(invalid_data(format!(
            "frame of {} bytes exceeds limit of {}",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf)
}

/// Write one framed message and flush
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(message)?;
    trace!("Writing frame of {} bytes", frame.len() - 4);
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Read one framed message
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf).await?;
    let length = u32::from_be_bytes(length_buf) as usize;
    if length > MAX_FRAME_LEN {
        return Err(invalid_data(format!(
            "frame of {} bytes exceeds limit of {}",
            length, MAX_FRAME_LEN
        )));
    }

    let mut body = BytesMut::zeroed(length);
    reader.read_exact(&mut body).await?;
    trace!("Read frame of {} bytes", length);

    serde_json::from_slice(&body).map_err(|e| invalid_data(e.to_string()))
}
