//! `Content-Length` framed reading and writing.
//!
//! Each frame is a block of `Name: value\r\n` header lines, an empty line,
//! and a body of exactly `Content-Length` bytes of UTF-8 JSON. Header names
//! are matched case-insensitively and every header other than
//! `Content-Length` (typically `Content-Type`) is ignored.

use serde_json::Value;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tracing::trace;

use crate::error::{Error, Result};
use crate::message::Message;

/// Default upper bound on a frame body (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Longest header line accepted before the frame is considered corrupt.
const MAX_HEADER_LINE: usize = 8 * 1024;

/// Async reader for framed JSON-RPC messages.
///
/// # Examples
///
/// ```
/// use vfs_bridge_rpc::{Message, MessageReader};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> vfs_bridge_rpc::Result<()> {
/// let body = r#"{"jsonrpc":"2.0","method":"ping"}"#;
/// let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());
/// let mut reader = MessageReader::new(frame.as_bytes());
///
/// let message = reader.read_message().await?;
/// assert!(matches!(message, Some(Message::Notification(_))));
/// assert!(reader.read_message().await?.is_none());
/// # Ok(())
/// # }
/// ```
pub struct MessageReader<R> {
    reader: BufReader<R>,
    max_message_size: usize,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wrap `reader` with the default size limit.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Override the maximum accepted body size.
    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// The maximum accepted body size.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] / [`Error::InvalidMessage`] when a complete frame
    ///   was consumed but its body is unusable (see
    ///   [`Error::is_recoverable`])
    /// - [`Error::InvalidHeader`], [`Error::MessageTooLarge`],
    ///   [`Error::UnexpectedEof`] or [`Error::Io`] when the stream can no
    ///   longer be read reliably
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        let Some(content_length) = self.read_content_length().await? else {
            return Ok(None);
        };

        if content_length > self.max_message_size {
            return Err(Error::MessageTooLarge {
                length: content_length,
                limit: self.max_message_size,
            });
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::UnexpectedEof
            } else {
                Error::Io(e)
            }
        })?;

        trace!(body_len = content_length, "Read frame");

        let value: Value = serde_json::from_slice(&body)?;
        Message::from_value(value).map(Some)
    }

    /// Read header lines up to the blank separator line.
    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut saw_header = false;

        loop {
            let mut line = String::new();
            // One byte past the limit is enough to tell an oversized line apart
            let bytes_read = (&mut self.reader)
                .take(MAX_HEADER_LINE as u64 + 1)
                .read_line(&mut line)
                .await?;

            if bytes_read == 0 {
                return if saw_header {
                    Err(Error::UnexpectedEof)
                } else {
                    Ok(None)
                };
            }

            if line.len() > MAX_HEADER_LINE {
                return Err(Error::InvalidHeader(format!(
                    "header line longer than {MAX_HEADER_LINE} bytes"
                )));
            }

            // Empty line signals end of headers; stray blank lines between frames are skipped
            if line == "\r\n" || line == "\n" {
                if saw_header {
                    break;
                }
                continue;
            }

            saw_header = true;
            let (name, value) = line.split_once(':').ok_or_else(|| {
                Error::InvalidHeader(format!("malformed header line: {:?}", line.trim_end()))
            })?;

            if name.trim().eq_ignore_ascii_case("content-length") {
                let value = value.trim();
                content_length = Some(value.parse().map_err(|_| {
                    Error::InvalidHeader(format!("invalid Content-Length: {value}"))
                })?);
            }
        }

        content_length
            .map(Some)
            .ok_or_else(|| Error::InvalidHeader("missing Content-Length header".to_string()))
    }
}

/// Async writer for framed JSON-RPC messages.
pub struct MessageWriter<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    /// Wrap `writer`.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Encode, frame and flush one message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the underlying write fails.
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        let body = serde_json::to_vec(&message.to_value())?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        trace!(body_len = body.len(), "Writing frame");

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flush and shut down the write half.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
