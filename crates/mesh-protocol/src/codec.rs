//! Framing for envelopes on a byte channel.
//!
//! Wire format: `[4-byte big-endian length][JSON payload]`. Frames above
//! [`MAX_FRAME_SIZE`] are refused on both sides.

use crate::message::Envelope;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload size of a single frame (1 MiB).
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Remote side closed the stream between frames
    #[error("Connection closed")]
    ConnectionClosed,

    /// Underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Length prefix of zero
    #[error("Empty frame")]
    EmptyFrame,

    /// Length prefix above the limit
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: u32 },

    /// Payload is not a known message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Serialization of an outgoing message failed
    #[error("Encode failed: {0}")]
    Encode(String),
}

impl CodecError {
    /// True when the channel is still frame-aligned and can keep being read.
    ///
    /// A bad payload inside a well-formed frame only costs that one message;
    /// anything else leaves the stream unusable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidMessage(_) | Self::EmptyFrame)
    }
}

/// Serialize an envelope into a complete frame, length prefix included.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails and
/// [`CodecError::FrameTooLarge`] if the payload exceeds the limit.
pub fn encode_envelope(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let payload = serde_json::to_vec(envelope).map_err(|e| CodecError::Encode(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or(CodecError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_SIZE,
        })?;

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    buf.put_u32(len);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Parse a frame payload (without the length prefix).
///
/// # Errors
///
/// Returns [`CodecError::InvalidMessage`] for malformed JSON, a missing
/// common field or an unknown `type` tag.
pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, CodecError> {
    serde_json::from_slice(payload).map_err(|e| CodecError::InvalidMessage(e.to_string()))
}

/// Read the next frame payload from a stream.
///
/// # Errors
///
/// [`CodecError::ConnectionClosed`] on a clean EOF, [`CodecError::EmptyFrame`]
/// or [`CodecError::FrameTooLarge`] for a bad prefix, [`CodecError::Io`] otherwise.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes, CodecError> {
    let mut len_buf = [0u8; LENGTH_PREFIX];
    reader.read_exact(&mut len_buf).await.map_err(map_eof)?;

    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Err(CodecError::EmptyFrame);
    }
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            len: len as usize,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(map_eof)?;
    Ok(Bytes::from(payload))
}

/// Write an already-encoded frame and flush.
///
/// # Errors
///
/// Returns [`CodecError::Io`] if the stream rejects the write.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Bytes,
) -> Result<(), CodecError> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

fn map_eof(e: std::io::Error) -> CodecError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        CodecError::ConnectionClosed
    } else {
        CodecError::Io(e)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::message::MeshMessage;
    use common::types::PeerId;
    use std::io::Cursor;

    fn chat(content: &str) -> Envelope {
        Envelope::new(
            PeerId::from("A"),
            MeshMessage::Chat {
                content: content.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_frames_preserve_order_on_one_stream() {
        let mut buf = Vec::new();
        for text in ["one", "two", "three"] {
            let frame = encode_envelope(&chat(text)).unwrap();
            write_frame(&mut buf, &frame).await.unwrap();
        }

        let mut cursor = Cursor::new(buf);
        for expected in ["one", "two", "three"] {
            let payload = read_frame(&mut cursor).await.unwrap();
            let envelope = decode_envelope(&payload).unwrap();
            assert_eq!(
                envelope.message,
                MeshMessage::Chat {
                    content: expected.to_string()
                }
            );
        }

        let end = read_frame(&mut cursor).await;
        assert!(matches!(end, Err(CodecError::ConnectionClosed)));
    }

    #[test]
    fn test_encoded_frame_has_big_endian_prefix() {
        let frame = encode_envelope(&chat("hi")).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - LENGTH_PREFIX);
    }

    #[tokio::test]
    async fn test_empty_frame_is_recoverable() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 0]);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CodecError::EmptyFrame));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_fatal() {
        let len = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(len.to_vec());
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_unknown_type_is_invalid_message() {
        let err = decode_envelope(br#"{"type":"nope","sender":"A","timestamp":1}"#).unwrap_err();
        assert!(matches!(err, CodecError::InvalidMessage(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_missing_sender_is_invalid_message() {
        let err = decode_envelope(br#"{"type":"peer_leaving","timestamp":1}"#).unwrap_err();
        assert!(matches!(err, CodecError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_truncated_payload_reports_closed() {
        let mut bytes = 10u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(bytes);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CodecError::ConnectionClosed));
    }
}
