//! Instruction I/O - readers and writers over byte streams
//!
//! This module provides:
//! - The `InstructionReader` and `InstructionWriter` capabilities
//! - Stream-backed implementations with I/O timeouts and close-cancellation
//! - Filtering wrappers applying a `Filter` to every instruction

pub mod filtered;
pub mod reader;
pub mod writer;

use std::io;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, TunnelError};
use crate::protocol::Instruction;

pub use filtered::{FilteredReader, FilteredWriter};
pub use reader::StreamReader;
pub use writer::StreamWriter;

/// Source of complete instructions
#[async_trait]
pub trait InstructionReader: Send {
    /// True if instruction data is already buffered, so the next read will
    /// not have to wait on the network for at least part of it.
    fn available(&self) -> bool;

    /// Read the raw bytes of the next complete instruction.
    ///
    /// Returns `Ok(None)` once the stream has ended.
    async fn read(&mut self) -> Result<Option<Bytes>>;

    /// Read and parse the next complete instruction.
    async fn read_instruction(&mut self) -> Result<Option<Instruction>> {
        match self.read().await? {
            Some(raw) => Instruction::parse(&raw).map(Some),
            None => Ok(None),
        }
    }
}

/// Sink for instructions
#[async_trait]
pub trait InstructionWriter: Send {
    /// Write a chunk of already-encoded instruction data.
    async fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Encode and write a single instruction.
    async fn write_instruction(&mut self, instruction: Instruction) -> Result<()>;
}

pub(crate) fn timed_out() -> TunnelError {
    TunnelError::UpstreamTimeout("Connection to guacd timed out.".into())
}

pub(crate) fn closed() -> TunnelError {
    TunnelError::ConnectionClosed("Connection to guacd is closed.".into())
}

/// Reclassify a transport error by what it means for the tunnel.
pub(crate) fn classify(err: TunnelError) -> TunnelError {
    match err {
        TunnelError::Io(e) => match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => timed_out(),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => {
                log::debug!("Connection to guacd lost: {}", e);
                closed()
            }
            _ => TunnelError::Server(e.to_string()),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_timeout() {
        let err = classify(io::Error::new(io::ErrorKind::TimedOut, "slow").into());
        assert!(matches!(err, TunnelError::UpstreamTimeout(_)));
    }

    #[test]
    fn test_classify_closed() {
        for kind in [io::ErrorKind::ConnectionReset, io::ErrorKind::BrokenPipe] {
            let err = classify(io::Error::new(kind, "gone").into());
            assert!(matches!(err, TunnelError::ConnectionClosed(_)));
        }
    }

    #[test]
    fn test_classify_other() {
        let err = classify(io::Error::new(io::ErrorKind::PermissionDenied, "nope").into());
        assert!(matches!(err, TunnelError::Server(ref m) if m.contains("nope")));
    }

    #[test]
    fn test_classify_passes_protocol_errors() {
        let err = classify(TunnelError::Protocol("bad".into()));
        assert!(matches!(err, TunnelError::Protocol(_)));
    }
}
