//! DATA payload encoding: CRLF normalization and dot-stuffing.

use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};

use super::Connection;
use super::client::read_reply;
use crate::error::{Error, Result};
use crate::protocol::DataSink;
use crate::types::ReplyCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    /// Nothing written yet.
    Begin,
    /// Just after a line ending.
    BeginLine,
    /// Just after a CR.
    Cr,
    /// Inside a line.
    Data,
}

/// Incremental encoder for message content sent after `DATA`.
///
/// Bare LF becomes CRLF, a leading `.` on any line is doubled, and
/// [`DotEncoder::finish`] appends the `.` terminator line.
#[derive(Debug, Clone)]
pub struct DotEncoder {
    state: LineState,
}

impl Default for DotEncoder {
    fn default() -> Self {
        Self {
            state: LineState::Begin,
        }
    }
}

impl DotEncoder {
    /// Creates an encoder positioned at the start of the message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes `input`, appending the wire bytes to `out`.
    pub fn encode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len());
        for &b in input {
            match self.state {
                LineState::Begin | LineState::BeginLine => {
                    if b == b'.' {
                        out.push(b'.');
                    }
                    self.state = LineState::Data;
                    self.after_data_byte(b, out);
                }
                LineState::Cr => {
                    self.state = if b == b'\n' {
                        LineState::BeginLine
                    } else {
                        LineState::Data
                    };
                }
                LineState::Data => self.after_data_byte(b, out),
            }
            out.push(b);
        }
    }

    fn after_data_byte(&mut self, b: u8, out: &mut Vec<u8>) {
        match b {
            b'\r' => self.state = LineState::Cr,
            b'\n' => {
                out.push(b'\r');
                self.state = LineState::BeginLine;
            }
            _ => {}
        }
    }

    /// Appends the line ending (if needed) and the terminating `.` line.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        let tail: &[u8] = match self.state {
            LineState::BeginLine => b".\r\n",
            LineState::Cr => b"\n.\r\n",
            LineState::Begin | LineState::Data => b"\r\n.\r\n",
        };
        out.extend_from_slice(tail);
        self.state = LineState::Begin;
    }
}

/// Sink returned by the production client's `DATA` command.
///
/// Bytes written are encoded with [`DotEncoder`] and forwarded to the
/// connection; [`DataSink::close`] terminates the message and reads the
/// server's verdict.
#[derive(Debug)]
pub struct DotWriter<'a> {
    stream: &'a mut BufReader<Connection>,
    encoder: DotEncoder,
    pending: Vec<u8>,
    closed: bool,
}

impl<'a> DotWriter<'a> {
    pub(crate) fn new(stream: &'a mut BufReader<Connection>) -> Self {
        Self {
            stream,
            encoder: DotEncoder::new(),
            pending: Vec::new(),
            closed: false,
        }
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            let n = ready!(Pin::new(self.stream.get_mut()).poll_write(cx, &self.pending))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pending.drain(..n);
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for DotWriter<'_> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(io::Error::other("DATA sink already closed")));
        }
        // Previously encoded bytes go out first so the buffer stays bounded.
        ready!(this.poll_drain(cx))?;
        this.encoder.encode(buf, &mut this.pending);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(this.stream.get_mut()).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}

#[async_trait]
impl<'a> DataSink for DotWriter<'a> {
    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState("DATA sink already closed".into()));
        }
        self.closed = true;

        self.encoder.finish(&mut self.pending);
        poll_fn(|cx| self.poll_drain(cx)).await?;
        self.stream.get_mut().flush().await?;

        read_reply(self.stream).await?.expect(&[ReplyCode::OK])?;
        Ok(())
    }
}
