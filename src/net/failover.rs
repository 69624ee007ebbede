//! Failover socket - detects upstream errors before the tunnel is handed out
//!
//! guacd reports a failed connection to the remote desktop with an `error`
//! instruction shortly after the handshake. Reading ahead until the first
//! `sync` lets such failures surface as a connect error, so the caller can
//! respond (or try another upstream) before any HTTP client is involved.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, TunnelError};
use crate::io::{InstructionReader, InstructionWriter};
use crate::net::{Link, Socket, SplitSocket};
use crate::protocol::{Instruction, opcode_of};

/// Bytes of instruction data read ahead before the connection is assumed
/// healthy even without a `sync`.
pub const INSTRUCTION_QUEUE_LIMIT: usize = 2048;

/// Socket that verified the upstream did not fail immediately.
pub struct FailoverSocket {
    reader: QueuedReader,
    writer: Box<dyn InstructionWriter>,
    link: Link,
}

impl FailoverSocket {
    /// Read ahead on `socket` until the first `sync`, the queue limit, or
    /// end-of-stream.
    ///
    /// Fails with the corresponding upstream error if guacd reports one
    /// first; the socket is closed in that case.
    pub async fn new<S: Socket + 'static>(socket: S) -> Result<Self> {
        let SplitSocket {
            mut reader,
            writer,
            link,
        } = Box::new(socket).into_split();

        let queue = match probe(reader.as_mut()).await {
            Ok(queue) => queue,
            Err(e) => {
                link.close();
                return Err(e);
            }
        };
        log::debug!("Upstream healthy after {} queued instructions.", queue.len());

        Ok(Self {
            reader: QueuedReader {
                queue,
                inner: reader,
            },
            writer,
            link,
        })
    }
}

async fn probe(reader: &mut dyn InstructionReader) -> Result<VecDeque<Bytes>> {
    let mut queue = VecDeque::new();
    let mut queued_len = 0;

    while let Some(raw) = reader.read().await? {
        match opcode_of(&raw) {
            Some("sync") => {
                queue.push_back(raw);
                break;
            }
            Some("error") => {
                if let Some(err) = upstream_error(&Instruction::parse(&raw)?) {
                    return Err(err);
                }
            }
            _ => {}
        }

        queued_len += raw.len();
        queue.push_back(raw);
        if queued_len >= INSTRUCTION_QUEUE_LIMIT {
            break;
        }
    }

    Ok(queue)
}

/// The upstream failure described by an `error` instruction, if any.
fn upstream_error(instruction: &Instruction) -> Option<TunnelError> {
    let code = instruction.arg(1)?.parse::<u32>().ok()?;
    let message = instruction.arg(0).unwrap_or_default();
    let err = TunnelError::from_upstream_code(code, message);
    if err.is_none() {
        log::debug!("Ignoring error instruction with status code {:#06x}.", code);
    }
    err
}

impl Socket for FailoverSocket {
    fn link(&self) -> &Link {
        &self.link
    }

    fn reader(&mut self) -> &mut dyn InstructionReader {
        &mut self.reader
    }

    fn writer(&mut self) -> &mut dyn InstructionWriter {
        self.writer.as_mut()
    }

    fn into_split(self: Box<Self>) -> SplitSocket {
        SplitSocket::new(Box::new(self.reader), self.writer, self.link)
    }
}

/// Replays the read-ahead queue before reading from the wrapped reader.
struct QueuedReader {
    queue: VecDeque<Bytes>,
    inner: Box<dyn InstructionReader>,
}

#[async_trait]
impl InstructionReader for QueuedReader {
    fn available(&self) -> bool {
        !self.queue.is_empty() || self.inner.available()
    }

    async fn read(&mut self) -> Result<Option<Bytes>> {
        match self.queue.pop_front() {
            Some(raw) => Ok(Some(raw)),
            None => self.inner.read().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn upstream_sending(data: &[u8]) -> (SplitSocket, tokio::io::DuplexStream) {
        let (local, mut upstream) = tokio::io::duplex(64 * 1024);
        upstream.write_all(data).await.unwrap();
        (SplitSocket::from_stream(local, Duration::from_secs(5)), upstream)
    }

    #[tokio::test]
    async fn test_replays_through_sync_then_delegates() {
        let (socket, mut upstream) =
            upstream_sending(b"4.size,1.0,4.1024,3.768;3.img,1.1;4.sync,3.100;3.nop;").await;

        let mut failover = FailoverSocket::new(socket).await.unwrap();
        assert!(failover.reader().available());

        let reader = failover.reader();
        assert_eq!(&reader.read().await.unwrap().unwrap()[..], b"4.size,1.0,4.1024,3.768;");
        assert_eq!(&reader.read().await.unwrap().unwrap()[..], b"3.img,1.1;");
        assert_eq!(&reader.read().await.unwrap().unwrap()[..], b"4.sync,3.100;");
        assert_eq!(&reader.read().await.unwrap().unwrap()[..], b"3.nop;");

        upstream.write_all(b"5.mouse,1.1,1.2;").await.unwrap();
        let next = failover.reader().read_instruction().await.unwrap().unwrap();
        assert_eq!(next, Instruction::new("mouse", ["1", "2"]));
    }

    #[tokio::test]
    async fn test_upstream_error_fails_construction() {
        let (socket, _upstream) =
            upstream_sending(b"4.name,3.vnc;5.error,14.Host not found,3.519;").await;
        let link = socket.link.clone();

        let err = FailoverSocket::new(socket).await.err().unwrap();
        assert!(matches!(err, TunnelError::UpstreamNotFound(ref m) if m == "Host not found"));
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn test_each_upstream_code_maps() {
        let cases: [(&[u8], fn(&TunnelError) -> bool); 4] = [
            (b"5.error,3.bad,3.515;", |e| matches!(e, TunnelError::Upstream(_))),
            (b"5.error,3.bad,3.514;", |e| matches!(e, TunnelError::UpstreamTimeout(_))),
            (b"5.error,3.bad,3.519;", |e| matches!(e, TunnelError::UpstreamNotFound(_))),
            (b"5.error,3.bad,3.520;", |e| matches!(e, TunnelError::UpstreamUnavailable(_))),
        ];
        for (data, check) in cases {
            let (socket, _upstream) = upstream_sending(data).await;
            let err = FailoverSocket::new(socket).await.err().unwrap();
            assert!(check(&err), "unexpected error {:?}", err);
        }
    }

    #[tokio::test]
    async fn test_other_error_codes_are_queued() {
        let (socket, _upstream) = upstream_sending(
            b"5.error,6.denied,3.769;5.error,7.garbage,2.xx;5.error,4.bare;4.sync,1.1;",
        )
        .await;

        let mut failover = FailoverSocket::new(socket).await.unwrap();
        let reader = failover.reader();
        for _ in 0..3 {
            let ins = reader.read_instruction().await.unwrap().unwrap();
            assert_eq!(ins.opcode(), "error");
        }
        let sync = reader.read_instruction().await.unwrap().unwrap();
        assert_eq!(sync.opcode(), "sync");
    }

    #[tokio::test]
    async fn test_stops_at_queue_limit() {
        let arg = "x".repeat(500);
        let blob = Instruction::new("blob", ["0", arg.as_str()]);
        let mut data = Vec::new();
        for _ in 0..5 {
            blob.encode_into(&mut data);
        }
        let (socket, _upstream) = upstream_sending(&data).await;

        // No sync ever arrives; the probe must still return.
        let mut failover = FailoverSocket::new(socket).await.unwrap();
        let reader = failover.reader();
        for _ in 0..5 {
            assert_eq!(reader.read_instruction().await.unwrap().unwrap(), blob);
        }
    }

    #[tokio::test]
    async fn test_end_of_stream_is_success() {
        let (socket, upstream) = upstream_sending(b"3.nop;").await;
        drop(upstream);

        let mut failover = FailoverSocket::new(socket).await.unwrap();
        let reader = failover.reader();
        assert_eq!(&reader.read().await.unwrap().unwrap()[..], b"3.nop;");
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_protocol_error_propagates() {
        let (socket, _upstream) = upstream_sending(b"3x.abc;").await;
        let err = FailoverSocket::new(socket).await.err().unwrap();
        assert!(matches!(err, TunnelError::Protocol(_)));
    }
}
