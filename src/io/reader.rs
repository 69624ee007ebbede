//! Stream reader - frames instructions out of an `AsyncRead`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::error::Result;
use crate::io::{InstructionReader, classify, closed, timed_out};
use crate::net::Link;
use crate::protocol::InstructionCodec;

/// Instruction reader over a raw byte source.
///
/// Bytes are accumulated until a complete instruction is buffered; anything
/// received past its end stays buffered for the next read.
pub struct StreamReader<R> {
    frames: FramedRead<R, InstructionCodec>,
    link: Link,
    timeout: Duration,
}

impl<R: AsyncRead> StreamReader<R> {
    /// Create a reader whose reads fail once `link` closes or after
    /// `timeout` without a complete instruction.
    pub fn new(inner: R, link: Link, timeout: Duration) -> Self {
        Self {
            frames: FramedRead::new(inner, InstructionCodec::new()),
            link,
            timeout,
        }
    }
}

#[async_trait]
impl<R> InstructionReader for StreamReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn available(&self) -> bool {
        !self.frames.read_buffer().is_empty()
    }

    async fn read(&mut self) -> Result<Option<Bytes>> {
        if !self.link.is_open() {
            return Err(closed());
        }

        let next = tokio::select! {
            _ = self.link.closed() => return Err(closed()),
            next = tokio::time::timeout(self.timeout, self.frames.next()) => next,
        };

        match next {
            Err(_) => Err(timed_out()),
            Ok(None) => Ok(None),
            Ok(Some(frame)) => frame.map(Some).map_err(classify),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelError;
    use crate::protocol::Instruction;
    use tokio::io::AsyncWriteExt;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_read_whole_instructions() {
        let (mut upstream, local) = tokio::io::duplex(1024);
        let mut reader = StreamReader::new(local, Link::new(), TIMEOUT);

        upstream.write_all(b"4.sync,3.123;3.nop;").await.unwrap();
        drop(upstream);

        assert_eq!(&reader.read().await.unwrap().unwrap()[..], b"4.sync,3.123;");
        assert!(reader.available());
        assert_eq!(reader.read_instruction().await.unwrap(), Some(Instruction::bare("nop")));
        assert!(!reader.available());
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_split_across_writes() {
        let (mut upstream, local) = tokio::io::duplex(1024);
        let mut reader = StreamReader::new(local, Link::new(), TIMEOUT);

        let wire = b"5.mouse,2.10,2.20,1.1;";
        let task = tokio::spawn(async move {
            for byte in wire {
                upstream.write_all(&[*byte]).await.unwrap();
                tokio::task::yield_now().await;
            }
            upstream
        });

        let raw = reader.read().await.unwrap().unwrap();
        assert_eq!(&raw[..], &wire[..]);
        drop(task.await.unwrap());
    }

    #[tokio::test]
    async fn test_incomplete_at_eof_is_server_error() {
        let (mut upstream, local) = tokio::io::duplex(1024);
        let mut reader = StreamReader::new(local, Link::new(), TIMEOUT);

        upstream.write_all(b"4.sync,3.12").await.unwrap();
        drop(upstream);

        assert!(matches!(reader.read().await, Err(TunnelError::Server(_))));
    }

    #[tokio::test]
    async fn test_malformed_is_protocol_error() {
        let (mut upstream, local) = tokio::io::duplex(1024);
        let mut reader = StreamReader::new(local, Link::new(), TIMEOUT);

        upstream.write_all(b"3.abc:").await.unwrap();

        assert!(matches!(reader.read().await, Err(TunnelError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_timeout() {
        let (_upstream, local) = tokio::io::duplex(1024);
        let mut reader = StreamReader::new(local, Link::new(), Duration::from_millis(20));

        assert!(matches!(reader.read().await, Err(TunnelError::UpstreamTimeout(_))));
    }

    #[tokio::test]
    async fn test_close_cancels_pending_read() {
        let (_upstream, local) = tokio::io::duplex(1024);
        let link = Link::new();
        let mut reader = StreamReader::new(local, link.clone(), TIMEOUT);

        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            link.close();
        });

        assert!(matches!(reader.read().await, Err(TunnelError::ConnectionClosed(_))));
        closer.await.unwrap();
    }
}
