//! Length-prefixed record framing over async byte streams
// (c) 2025 Ross Younger
//!
//! Two framing widths are in use. Header, FileInfo and Transaction records
//! travel as `u16 big-endian length || bytes[length]`; the Message payload as
//! `u32 big-endian length || bytes[length]`. A zero length is legal on the
//! wire but no useful record decodes from it.
//!
//! Reads either return exactly the advertised number of bytes or fail:
//! * EOF before any of the length prefix arrives is a clean end of stream
//!   ([`Error::ConnectionClosed`]);
//! * EOF anywhere else is [`Error::ShortRead`].
//!
//! Writes emit the prefix and payload as one contiguous buffer, so a record
//! reaches the transport as a single logical write.

use std::future::Future;

use bytes::BytesMut;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Width of the length prefix framing a record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameWidth {
    /// 16-bit big-endian length prefix
    U16,
    /// 32-bit big-endian length prefix
    U32,
}

impl FrameWidth {
    /// Number of bytes the prefix itself occupies on the wire.
    #[must_use]
    pub const fn prefix_len(self) -> usize {
        match self {
            FrameWidth::U16 => 2,
            FrameWidth::U32 => 4,
        }
    }

    /// The largest record this width can frame.
    #[must_use]
    pub const fn limit(self) -> usize {
        match self {
            FrameWidth::U16 => u16::MAX as usize,
            FrameWidth::U32 => u32::MAX as usize,
        }
    }
}

/// I/O for every record taking part in the protocol.
///
/// Records are encoded with BARE and are expected to use the provided method
/// implementations; only [`WIDTH`](Self::WIDTH) varies per type.
pub trait WireRecord: Serialize + DeserializeOwned + Send + Sync {
    /// Width of this record's length prefix.
    const WIDTH: FrameWidth;

    /// Serializes this record into a byte vector (unframed).
    fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_bare::to_vec(self)?)
    }

    /// Creates this record from a slice of exactly the right size.
    fn from_slice(slice: &[u8]) -> Result<Self> {
        Ok(serde_bare::from_slice(slice)?)
    }

    /// Reads a length prefix, then this record as payload.
    fn read_framed<R>(recv: &mut R) -> impl Future<Output = Result<Self>> + Send
    where
        R: AsyncRead + Unpin + Send,
    {
        async move {
            let size = read_length_prefix(recv, Self::WIDTH).await?;
            let mut buffer = BytesMut::zeroed(size);
            read_exact_counted(recv, &mut buffer).await?;
            Self::from_slice(&buffer)
        }
    }

    /// Writes a length prefix, then this record as payload, as one
    /// contiguous buffer.
    fn write_framed<W>(&self, send: &mut W) -> impl Future<Output = Result<()>> + Send
    where
        W: AsyncWrite + Unpin + Send,
    {
        async move {
            let payload = self.to_vec()?;
            let frame = frame_record(&payload, Self::WIDTH)?;
            send.write_all(&frame).await.map_err(Error::from_stream_io)
        }
    }
}

/// Assembles `prefix || payload` into one buffer.
///
/// Fails with [`Error::LengthMismatch`] if the payload does not fit the
/// prefix width.
pub fn frame_record(payload: &[u8], width: FrameWidth) -> Result<Vec<u8>> {
    let size = payload.len();
    if size > width.limit() {
        return Err(Error::LengthMismatch {
            size,
            limit: width.limit(),
        });
    }
    let mut buffer = Vec::with_capacity(width.prefix_len() + size);
    match width {
        #[allow(clippy::cast_possible_truncation)] // checked above
        FrameWidth::U16 => buffer.extend_from_slice(&(size as u16).to_be_bytes()),
        #[allow(clippy::cast_possible_truncation)] // checked above
        FrameWidth::U32 => buffer.extend_from_slice(&(size as u32).to_be_bytes()),
    }
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

/// Reads a frame's length prefix.
///
/// EOF before the first byte means the remote finished the stream cleanly.
async fn read_length_prefix<R>(recv: &mut R, width: FrameWidth) -> Result<usize>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buffer = [0u8; 4];
    let wanted = width.prefix_len();
    let got = read_counted(recv, &mut buffer[..wanted]).await?;
    if got == 0 {
        return Err(Error::ConnectionClosed);
    }
    if got < wanted {
        return Err(Error::ShortRead { wanted, got });
    }
    Ok(match width {
        FrameWidth::U16 => u16::from_be_bytes([buffer[0], buffer[1]]) as usize,
        FrameWidth::U32 => u32::from_be_bytes(buffer) as usize,
    })
}

/// Reads until `buffer` is full or the stream ends; returns the byte count.
async fn read_counted<R>(recv: &mut R, buffer: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + Send,
{
    let mut got = 0;
    while got < buffer.len() {
        let n = recv
            .read(&mut buffer[got..])
            .await
            .map_err(Error::from_stream_io)?;
        if n == 0 {
            break;
        }
        got += n;
    }
    Ok(got)
}

/// Fills `buffer` exactly, or fails with [`Error::ShortRead`].
pub(crate) async fn read_exact_counted<R>(recv: &mut R, buffer: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let wanted = buffer.len();
    let got = read_counted(recv, buffer).await?;
    if got < wanted {
        return Err(Error::ShortRead { wanted, got });
    }
    Ok(())
}
