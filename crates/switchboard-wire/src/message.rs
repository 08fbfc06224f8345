//! Multipart message framing.
//!
//! Each message is prefixed with a 4-byte big-endian body length. The body
//! holds a 2-byte big-endian frame count followed by every frame as a 4-byte
//! big-endian length and its bytes.

use crate::transport::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use switchboard_types::Frames;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum encoded body size (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Maximum number of frames in one message.
pub const MAX_FRAMES: usize = 64;

/// Encode a message to bytes (4-byte length + body).
pub fn encode_frames(frames: &[Bytes]) -> Result<Bytes, WireError> {
    if frames.len() > MAX_FRAMES {
        return Err(WireError::TooManyFrames {
            count: frames.len(),
            max: MAX_FRAMES,
        });
    }
    let body_len: usize = 2 + frames.iter().map(|f| 4 + f.len()).sum::<usize>();
    if body_len > MAX_MESSAGE_SIZE as usize {
        return Err(WireError::MessageTooLarge {
            size: body_len as u64,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(4 + body_len);
    buf.put_u32(body_len as u32);
    buf.put_u16(frames.len() as u16);
    for frame in frames {
        buf.put_u32(frame.len() as u32);
        buf.extend_from_slice(frame);
    }
    Ok(buf.freeze())
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Split a body into its frames. Frames are zero-copy slices of `body`.
pub fn decode_frames(mut body: Bytes) -> Result<Frames, WireError> {
    if body.remaining() < 2 {
        return Err(WireError::Malformed("missing frame count"));
    }
    let count = body.get_u16() as usize;
    if count > MAX_FRAMES {
        return Err(WireError::TooManyFrames {
            count,
            max: MAX_FRAMES,
        });
    }
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        if body.remaining() < 4 {
            return Err(WireError::Malformed("truncated frame header"));
        }
        let len = body.get_u32() as usize;
        if body.remaining() < len {
            return Err(WireError::Malformed("truncated frame"));
        }
        frames.push(body.split_to(len));
    }
    if body.has_remaining() {
        return Err(WireError::Malformed("trailing bytes after last frame"));
    }
    Ok(frames)
}

/// Write a framed message to a stream.
pub async fn write_frames<W>(writer: &mut W, frames: &[Bytes]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = encode_frames(frames)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message from a stream.
pub async fn read_frames<R>(reader: &mut R) -> Result<Frames, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len as u64,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    decode_frames(Bytes::from(body))
}
