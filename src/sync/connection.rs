//! Device connection - an established byte stream split into a parser
//! (inbound) and a writer (outbound).
//!
//! The stream is created elsewhere (transport handshake, `sync:` service
//! request); this type only owns it for the lifetime of the client.

use crate::error::{Result, SyncError};
use crate::sync::parser::Parser;
use crate::sync::protocol::{encode_command, Tag};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// How long a close waits for the transport to accept the shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Any bidirectional byte stream usable as a device connection.
pub trait DeviceStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> DeviceStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub struct Connection<S> {
    parser: Parser<ReadHalf<S>>,
    writer: WriteHalf<S>,
    /// A command was sent and its reply has not been fully read yet
    in_flight: bool,
    closed: bool,
}

impl<S: DeviceStream> Connection<S> {
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            parser: Parser::new(reader),
            writer,
            in_flight: false,
            closed: false,
        }
    }

    /// Fail fast if no new exchange can be started.
    ///
    /// An exchange abandoned before its reply was read (its future dropped
    /// on a timeout or abort) leaves unread frames on the wire, so the read
    /// channel is ended instead of pairing them with the next request.
    pub fn ensure_usable(&mut self) -> Result<()> {
        if self.closed {
            return Err(SyncError::Closed);
        }
        if self.parser.is_ended() {
            return Err(SyncError::ChannelEnded);
        }
        if self.in_flight {
            tracing::warn!("previous exchange was abandoned, ending read channel");
            self.parser.end();
            return Err(SyncError::ChannelEnded);
        }
        Ok(())
    }

    /// Send a command + argument frame and flush it.
    ///
    /// The exchange stays in flight until [`complete_exchange`](Self::complete_exchange).
    pub async fn send_command(&mut self, tag: Tag, arg: &str) -> Result<()> {
        self.ensure_usable()?;
        self.in_flight = true;
        tracing::trace!(%tag, arg, "send command");
        self.writer.write_all(&encode_command(tag, arg)).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Mark the current exchange as answered up to its terminal frame.
    pub fn complete_exchange(&mut self) {
        self.in_flight = false;
    }

    pub fn parser(&mut self) -> &mut Parser<ReadHalf<S>> {
        &mut self.parser
    }

    /// Borrow both halves at once, for exchanges that read while writing.
    pub fn split(&mut self) -> (&mut Parser<ReadHalf<S>>, &mut WriteHalf<S>) {
        (&mut self.parser, &mut self.writer)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the connection. Returns false if it was already closed.
    pub async fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.parser.end();
        match tokio::time::timeout(CLOSE_TIMEOUT, self.writer.shutdown()).await {
            Ok(Ok(())) => tracing::debug!("connection closed"),
            Ok(Err(e)) => tracing::debug!(error = %e, "error while closing connection"),
            Err(_) => tracing::warn!("timed out closing connection"),
        }
        true
    }
}
