//! Network layer - sockets and tunnels
//!
//! A socket pairs an instruction reader with an instruction writer and a
//! shared [`Link`] tracking whether the connection is open. Sockets compose
//! by wrapping:
//! - `tcp::connect` produces the raw socket to guacd
//! - `ConfiguredSocket` performs the guacd handshake
//! - `FailoverSocket` probes for early upstream errors
//! - `FilteredSocket` applies instruction filters
//!
//! A [`Tunnel`] owns the finished socket and arbitrates access to it.

pub mod configured;
pub mod failover;
pub mod filtered;
pub mod link;
pub mod tcp;
pub mod tunnel;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::io::{InstructionReader, InstructionWriter, StreamReader, StreamWriter};

pub use configured::ConfiguredSocket;
pub use failover::{FailoverSocket, INSTRUCTION_QUEUE_LIMIT};
pub use filtered::FilteredSocket;
pub use link::Link;
pub use tunnel::{ReaderGuard, Tunnel, WriterGuard};

/// A reader and writer over one upstream connection
pub trait Socket: Send {
    /// Lifecycle handle of the underlying connection.
    fn link(&self) -> &Link;

    fn reader(&mut self) -> &mut dyn InstructionReader;

    fn writer(&mut self) -> &mut dyn InstructionWriter;

    /// Take the socket apart so its halves can be used independently.
    fn into_split(self: Box<Self>) -> SplitSocket;

    fn is_open(&self) -> bool {
        self.link().is_open()
    }

    /// Close the connection, failing any in-flight read or write.
    fn close(&self) -> bool {
        self.link().close()
    }
}

impl<S: Socket + ?Sized> Socket for Box<S> {
    fn link(&self) -> &Link {
        (**self).link()
    }

    fn reader(&mut self) -> &mut dyn InstructionReader {
        (**self).reader()
    }

    fn writer(&mut self) -> &mut dyn InstructionWriter {
        (**self).writer()
    }

    fn into_split(self: Box<Self>) -> SplitSocket {
        (*self).into_split()
    }
}

/// Socket made of independently owned halves.
pub struct SplitSocket {
    pub reader: Box<dyn InstructionReader>,
    pub writer: Box<dyn InstructionWriter>,
    pub link: Link,
}

impl SplitSocket {
    pub fn new(
        reader: Box<dyn InstructionReader>,
        writer: Box<dyn InstructionWriter>,
        link: Link,
    ) -> Self {
        Self {
            reader,
            writer,
            link,
        }
    }

    /// Socket over any duplex byte stream, with `timeout` bounding each
    /// read and write.
    pub fn from_stream<S>(stream: S, timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let link = Link::new();
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: Box::new(StreamReader::new(read_half, link.clone(), timeout)),
            writer: Box::new(StreamWriter::new(write_half, link.clone(), timeout)),
            link,
        }
    }
}

impl Socket for SplitSocket {
    fn link(&self) -> &Link {
        &self.link
    }

    fn reader(&mut self) -> &mut dyn InstructionReader {
        self.reader.as_mut()
    }

    fn writer(&mut self) -> &mut dyn InstructionWriter {
        self.writer.as_mut()
    }

    fn into_split(self: Box<Self>) -> SplitSocket {
        *self
    }
}
