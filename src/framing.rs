//! Length-prefixed binary framing (§C1) over any `AsyncRead`/`AsyncWrite`
//! stream, notably a `UnixStream`.
//!
//! Every frame is a big-endian 32-bit length prefix followed by that many
//! bytes of a `bincode`-serialised [`Frame`]. This deliberately is not
//! newline-delimited JSON: an earlier design attempted that and suffered
//! "incomplete input" failures once a payload crossed a buffer boundary on
//! a large conversation log. A length prefix makes the frame boundary exact
//! regardless of payload size.

use crate::error::{AgoError, AgoResult};
use crate::protocol::Frame;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected outright; the connection is
/// considered malformed rather than merely slow.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// What `read_frame` observed: either a frame arrived, or the peer closed
/// the connection cleanly between frames (a terminal, non-error condition).
pub enum DecodeOutcome {
    Frame(Frame),
    Eof,
}

/// Encode `frame` as a length-prefixed byte buffer ready to write whole.
pub fn encode(frame: &Frame) -> AgoResult<Vec<u8>> {
    let body = bincode::serialize(frame).map_err(|e| AgoError::DecodeFailure(e.to_string()))?;
    let len = u32::try_from(body.len()).map_err(|_| {
        AgoError::DecodeFailure(format!("frame of {} bytes exceeds u32 length prefix", body.len()))
    })?;
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Write one frame to `writer`, flushing after.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> AgoResult<()> {
    let buf = encode(frame)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from `reader`. Returns `Eof` if the peer closed the
/// connection before sending any bytes of a new frame (a clean terminal
/// condition, not an error); a close mid-frame, or a length prefix over
/// [`MAX_FRAME_BYTES`], is a decode failure and the caller should drop the
/// connection.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> AgoResult<DecodeOutcome> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(DecodeOutcome::Eof),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(AgoError::DecodeFailure(format!(
            "frame length {len} exceeds maximum of {MAX_FRAME_BYTES} bytes"
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            AgoError::DecodeFailure("connection closed mid-frame".to_string())
        } else {
            AgoError::Io(e)
        }
    })?;

    let frame = bincode::deserialize(&body).map_err(|e| AgoError::DecodeFailure(e.to_string()))?;
    Ok(DecodeOutcome::Frame(frame))
}
