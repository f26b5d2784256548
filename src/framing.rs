//! Wire framing for chat messages.
//!
//! The secure channel delivers an ordered byte stream with no message
//! boundaries of its own, so every logical message is sent as one frame:
//! a `u32` little-endian length prefix followed by that many payload bytes.
//! The payload is the textual line `"<name>: <body>"`, or the bare
//! termination sentinel.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::error::SessionError;

/// Reserved literal that ends the session. Compared for exact equality,
/// never as a prefix or pattern.
pub const TERMINATION_SENTINEL: &str = "EXIT";

/// Separator between the display name and the body on the wire.
const NAME_SEPARATOR: &str = ": ";

/// Upper bound on a single frame's payload. Chat lines never approach this;
/// a larger prefix means the stream is desynchronized.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// A decoded chat message: the sender's claimed display name plus free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Display name the peer embedded in the frame.
    pub name: String,
    /// Free-text body.
    pub body: String,
}

impl std::fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.name, NAME_SEPARATOR, self.body)
    }
}

/// One logical frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A chat message.
    Message(ChatMessage),
    /// The termination sentinel.
    Exit,
}

impl Frame {
    /// Build a message frame from the local identity and an input line.
    pub fn message(name: impl Into<String>, body: impl Into<String>) -> Self {
        Frame::Message(ChatMessage {
            name: name.into(),
            body: body.into(),
        })
    }

    /// Encode to the payload bytes of one frame.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Message(msg) => msg.to_string().into_bytes(),
            Frame::Exit => TERMINATION_SENTINEL.as_bytes().to_vec(),
        }
    }

    /// Decode one frame payload.
    ///
    /// Failures here are recoverable: the receiver logs them and keeps
    /// listening for the next frame.
    pub fn decode(payload: &[u8]) -> Result<Self, SessionError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| SessionError::Framing(format!("invalid UTF-8: {e}")))?;

        if text == TERMINATION_SENTINEL {
            return Ok(Frame::Exit);
        }

        let (name, body) = text.split_once(NAME_SEPARATOR).ok_or_else(|| {
            SessionError::Framing(format!(
                "missing '{NAME_SEPARATOR}' separator in {:?}",
                truncate_for_log(text)
            ))
        })?;
        if name.is_empty() {
            return Err(SessionError::Framing("empty display name".into()));
        }

        Ok(Frame::Message(ChatMessage {
            name: name.to_string(),
            body: body.to_string(),
        }))
    }
}

fn truncate_for_log(text: &str) -> String {
    const LIMIT: usize = 64;
    if text.len() <= LIMIT {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < LIMIT)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    }
}

/// Writing half of a secure channel, sending one frame at a time.
///
/// Each send is fully flushed before returning, so there is exactly one
/// in-flight frame per direction.
pub struct FrameWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writing half.
    pub fn new(writer: W) -> Self {
        Self {
            inner: BufWriter::new(writer),
        }
    }

    /// Send one frame: length prefix, payload, flush.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let payload = frame.encode();
        let len = payload.len() as u32;
        self.inner.write_all(&len.to_le_bytes()).await?;
        self.inner.write_all(&payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush and shut down the write side. On a TLS stream this emits
    /// close_notify. Called exactly once, after both loops have stopped.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        self.inner.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Reading half of a secure channel, yielding one frame payload at a time.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reading half.
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Read the next complete frame payload.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly at a frame
    /// boundary. End-of-stream inside a frame is an error, as is a length
    /// prefix beyond [`MAX_FRAME_LEN`].
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        let mut len_bytes = [0u8; 4];
        let mut filled = 0;
        while filled < len_bytes.len() {
            let n = self.inner.read(&mut len_bytes[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed inside a frame header",
                )));
            }
            filled += n;
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(SessionError::FrameTooLarge(len));
        }

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        Ok(Some(payload))
    }
}
