//! Length-delimited JSON codec for TCP streams.
//!
//! Wire format: 4-byte big-endian length prefix + serde JSON payload.
//! A stream that ends inside a frame is `ConnectionClosed`, never a parse error.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::Message;
use crate::{ProtocolError, MAX_MESSAGE_BYTES};

/// Length prefix size in bytes.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Most buffer space reserved ahead of bytes actually received. A header
/// alone never commits a full frame's worth of memory.
const READ_AHEAD_BYTES: usize = 64 * 1024;

/// Codec for framing Message values over a byte stream.
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least the length prefix
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek at the length
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > MAX_MESSAGE_BYTES {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_MESSAGE_BYTES,
            });
        }

        // Check if we have the full message
        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            src.reserve((total - src.len()).min(READ_AHEAD_BYTES));
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let msg_bytes = src.split_to(length);

        let message: Message = serde_json::from_slice(&msg_bytes)?;
        Ok(Some(message))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            // Peer closed mid-frame
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;

        if payload.len() > MAX_MESSAGE_BYTES {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_BYTES,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

/// Encode one message into a standalone frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = BytesMut::new();
    MessageCodec.encode(message.clone(), &mut buf)?;
    Ok(buf.to_vec())
}

/// Decode the first frame in `bytes`, returning the message and the number
/// of bytes it occupied. Fewer bytes than the frame declares is treated as
/// the peer having closed mid-message.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), ProtocolError> {
    let mut buf = BytesMut::from(bytes);
    let before = buf.len();
    match MessageCodec.decode(&mut buf)? {
        Some(message) => Ok((message, before - buf.len())),
        None => Err(ProtocolError::ConnectionClosed),
    }
}

/// Read exactly one frame from a stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_BYTES,
        });
    }

    // Grows as the body arrives
    let mut buf = Vec::with_capacity(len.min(READ_AHEAD_BYTES));
    AsyncReadExt::take(&mut *reader, len as u64)
        .read_to_end(&mut buf)
        .await?;
    if buf.len() < len {
        return Err(ProtocolError::ConnectionClosed);
    }

    let message: Message = serde_json::from_slice(&buf)?;
    Ok(message)
}

/// Write one frame and flush it.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
