use std::io;
use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// Maximum serialized message size (4 MiB).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Write a length-prefixed JSON encoded message to the provided async writer.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_vec(message).map_err(FrameError::Encode)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge {
            len: payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    writer.write_u32_le(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame, returning `None` when the peer closed the stream on a
/// frame boundary.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let read = reader.read(&mut header[filled..]).await?;
        if read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        filled += read;
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    serde_json::from_slice::<T>(&buf)
        .map(Some)
        .map_err(FrameError::Malformed)
}

/// Read a frame that must be present; end-of-stream is reported as [`FrameError::Closed`].
pub async fn read_message<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    read_frame(reader).await?.ok_or(FrameError::Closed)
}

/// Convenience wrapper that binds a transport type to the shared codec helpers.
pub struct FramedStream<T, Incoming = (), Outgoing = ()> {
    inner: T,
    _marker_in: PhantomData<Incoming>,
    _marker_out: PhantomData<Outgoing>,
}

impl<T, Incoming, Outgoing> FramedStream<T, Incoming, Outgoing>
where
    T: AsyncRead + AsyncWrite + Unpin,
    Incoming: DeserializeOwned,
    Outgoing: Serialize,
{
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            _marker_in: PhantomData,
            _marker_out: PhantomData,
        }
    }

    pub async fn send(&mut self, message: &Outgoing) -> Result<(), FrameError> {
        write_message(&mut self.inner, message).await
    }

    pub async fn recv(&mut self) -> Result<Option<Incoming>, FrameError> {
        read_frame(&mut self.inner).await
    }

    /// Half-close the write side so the peer observes end-of-stream.
    pub async fn finish(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
