pub mod process;

use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::{error::ClientError, protocol::MalformedMessage};

pub use process::{ProcessSlot, ProcessTransport};

/// Reads newline-terminated frames from a byte stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buffer: Vec::new(),
        }
    }

    /// Next non-blank frame, without its line terminator.
    ///
    /// A final line with no trailing newline still counts as a frame.
    pub async fn read_frame(&mut self) -> Result<String, ClientError> {
        loop {
            self.buffer.clear();
            let bytes_read = self
                .inner
                .read_until(b'\n', &mut self.buffer)
                .await
                .map_err(ClientError::Transport)?;

            if bytes_read == 0 {
                return Err(ClientError::Eof);
            }

            let line = match std::str::from_utf8(&self.buffer) {
                Ok(line) => line,
                Err(e) => {
                    let lossy = String::from_utf8_lossy(&self.buffer);
                    return Err(MalformedMessage::new(
                        None,
                        format!("frame is not valid UTF-8: {}", e),
                        lossy.trim_end_matches(&['\r', '\n'][..]),
                    )
                    .into());
                }
            };

            let line = line.trim_end_matches(&['\r', '\n'][..]);
            if line.trim().is_empty() {
                continue;
            }

            return Ok(line.to_string());
        }
    }
}

/// Writes newline-terminated frames to a byte stream, flushing each one.
pub struct FrameWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: BufWriter::new(writer),
        }
    }

    pub async fn write_line(&mut self, frame: &str) -> Result<(), ClientError> {
        let body = frame.strip_suffix('\n').unwrap_or(frame);
        if body.contains('\n') {
            return Err(ClientError::Transport(io::Error::new(
                io::ErrorKind::InvalidInput,
                "frame contains an embedded newline",
            )));
        }

        self.inner
            .write_all(body.as_bytes())
            .await
            .map_err(ClientError::Transport)?;
        self.inner
            .write_all(b"\n")
            .await
            .map_err(ClientError::Transport)?;
        self.inner.flush().await.map_err(ClientError::Transport)
    }

    /// Flush and shut down the write side. Dropping the writer afterwards
    /// closes the underlying pipe.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.inner.shutdown().await.map_err(ClientError::Transport)
    }
}
