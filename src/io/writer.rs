//! Stream writer - encodes instructions onto an `AsyncWrite`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio_util::codec::{Encoder, FramedWrite};

use crate::error::{Result, TunnelError};
use crate::io::{InstructionWriter, classify, closed, timed_out};
use crate::net::Link;
use crate::protocol::{Instruction, InstructionCodec};

/// Instruction writer over a raw byte sink. Every write is flushed.
pub struct StreamWriter<W> {
    frames: FramedWrite<W, InstructionCodec>,
    link: Link,
    timeout: Duration,
}

impl<W: AsyncWrite> StreamWriter<W> {
    pub fn new(inner: W, link: Link, timeout: Duration) -> Self {
        Self {
            frames: FramedWrite::new(inner, InstructionCodec::new()),
            link,
            timeout,
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> StreamWriter<W> {
    async fn send<I>(&mut self, item: I) -> Result<()>
    where
        I: Send,
        InstructionCodec: Encoder<I, Error = TunnelError>,
    {
        if !self.link.is_open() {
            return Err(closed());
        }

        tokio::select! {
            _ = self.link.closed() => Err(closed()),
            sent = tokio::time::timeout(self.timeout, self.frames.send(item)) => match sent {
                Err(_) => Err(timed_out()),
                Ok(result) => result.map_err(classify),
            },
        }
    }
}

#[async_trait]
impl<W> InstructionWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.send(Bytes::copy_from_slice(chunk)).await
    }

    async fn write_instruction(&mut self, instruction: Instruction) -> Result<()> {
        self.send(instruction).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_write_instruction_and_raw() {
        let (local, mut upstream) = tokio::io::duplex(1024);
        let mut writer = StreamWriter::new(local, Link::new(), TIMEOUT);

        writer.write_instruction(Instruction::new("select", ["1"])).await.unwrap();
        writer.write(b"3.nop;").await.unwrap();
        drop(writer);

        let mut received = Vec::new();
        upstream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"6.select,1.1;3.nop;");
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (local, _upstream) = tokio::io::duplex(1024);
        let link = Link::new();
        let mut writer = StreamWriter::new(local, link.clone(), TIMEOUT);

        link.close();
        let err = writer.write(b"3.nop;").await.unwrap_err();
        assert!(matches!(err, TunnelError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_write_to_dropped_peer_is_closed() {
        let (local, upstream) = tokio::io::duplex(16);
        drop(upstream);
        let mut writer = StreamWriter::new(local, Link::new(), TIMEOUT);

        let err = writer.write(b"3.nop;").await.unwrap_err();
        assert!(matches!(err, TunnelError::ConnectionClosed(_)));
    }
}
