//! Length-prefixed framing over a byte stream.
//!
//! # Wire format
//!
//! ```text
//! [4 bytes BE: payload_len][payload_len bytes: payload]
//! ```
//!
//! `payload_len` is capped at [`MAX_FRAME_SIZE`]. A header announcing more
//! is rejected as a protocol error without buffering the payload.

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec, LengthDelimitedCodecError};

use crate::MAX_FRAME_SIZE;
use crate::error::WireError;
use crate::messages::Message;

/// Reads and writes framed [`Message`]s on a stream.
///
/// A partially received frame is dropped together with the framer; nothing
/// is carried across connections.
pub struct Framer<S> {
    inner: Framed<S, LengthDelimitedCodec>,
}

impl<S> Framer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .big_endian()
            .max_frame_length(MAX_FRAME_SIZE)
            .new_codec();
        Self {
            inner: Framed::new(stream, codec),
        }
    }

    /// Writes one frame and flushes it to the transport.
    pub async fn write_frame(&mut self, payload: Bytes) -> Result<(), WireError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(WireError::Protocol(format!(
                "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
                payload.len()
            )));
        }
        self.inner.send(payload).await.map_err(classify)
    }

    /// Reads the next complete frame.
    ///
    /// Returns [`WireError::ConnectionClosed`] when the peer closed the
    /// stream on a frame boundary. EOF in the middle of a frame surfaces as
    /// an I/O error.
    pub async fn read_frame(&mut self) -> Result<BytesMut, WireError> {
        match self.inner.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(classify(e)),
            None => Err(WireError::ConnectionClosed),
        }
    }

    /// Encodes and writes a message.
    pub async fn write_message(&mut self, msg: &Message) -> Result<(), WireError> {
        self.write_frame(msg.encode()?).await
    }

    /// Reads and decodes the next message.
    pub async fn read_message(&mut self) -> Result<Message, WireError> {
        let frame = self.read_frame().await?;
        Message::decode(frame.freeze())
    }

    /// Flushes pending frames and shuts down the write side.
    pub async fn close(&mut self) -> Result<(), WireError> {
        SinkExt::<Bytes>::close(&mut self.inner)
            .await
            .map_err(classify)
    }

    /// Returns the underlying transport.
    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }
}

/// Separates codec limit violations from transport failures.
fn classify(e: std::io::Error) -> WireError {
    let oversized = e
        .get_ref()
        .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>());
    if oversized {
        WireError::Protocol(format!("frame exceeds {MAX_FRAME_SIZE} bytes"))
    } else {
        WireError::Io(e)
    }
}
