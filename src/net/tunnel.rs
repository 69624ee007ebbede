//! Tunnel - one upstream connection shared by many HTTP requests
//!
//! HTTP requests come and go, but each tunnel owns exactly one socket to
//! guacd. Requests take turns through two independent roles: at most one
//! request reads from guacd at a time, and at most one writes. Waiting for a
//! role is FIFO-fair, and a reader can ask whether others are queued behind
//! it so long-running reads can yield.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{MutexGuard as ConfigGuard, PoisonError};

use tokio::sync::{Mutex, MutexGuard};

use crate::id::generate_tunnel_id;
use crate::io::{InstructionReader, InstructionWriter};
use crate::net::{Link, Socket, SplitSocket};
use crate::protocol::Configuration;

/// An upstream connection with arbitrated reader and writer access.
pub struct Tunnel {
    id: String,
    link: Link,
    reader: Mutex<Box<dyn InstructionReader>>,
    writer: Mutex<Box<dyn InstructionWriter>>,
    queued_readers: AtomicUsize,
    configuration: std::sync::Mutex<Configuration>,
}

impl Tunnel {
    /// Tunnel over `socket` with a freshly generated identifier.
    pub fn new<S: Socket + 'static>(socket: S, configuration: Configuration) -> Self {
        Self::with_id(generate_tunnel_id(), socket, configuration)
    }

    /// Tunnel over `socket` with a caller-chosen identifier.
    pub fn with_id<S: Socket + 'static>(
        id: impl Into<String>,
        socket: S,
        configuration: Configuration,
    ) -> Self {
        let SplitSocket {
            reader,
            writer,
            link,
        } = Box::new(socket).into_split();

        Self {
            id: id.into(),
            link,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            queued_readers: AtomicUsize::new(0),
            configuration: std::sync::Mutex::new(configuration),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for exclusive use of the reader role.
    pub async fn acquire_reader(&self) -> ReaderGuard<'_> {
        self.queued_readers.fetch_add(1, Ordering::AcqRel);
        // Decrements on acquisition, and also if this future is dropped
        // while still waiting.
        let _queued = QueuedReader(&self.queued_readers);
        ReaderGuard {
            guard: self.reader.lock().await,
        }
    }

    /// Wait for exclusive use of the writer role.
    pub async fn acquire_writer(&self) -> WriterGuard<'_> {
        WriterGuard {
            guard: self.writer.lock().await,
        }
    }

    /// Whether anyone is waiting for the reader role.
    pub fn has_queued_readers(&self) -> bool {
        self.queued_readers.load(Ordering::Acquire) > 0
    }

    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }

    /// Close the upstream connection. In-flight reads and writes fail with
    /// `ConnectionClosed`.
    pub fn close(&self) {
        if self.link.close() {
            log::debug!("Tunnel {} closed.", self.id);
        }
    }

    /// Locked access to the tunnel's configuration. Do not hold across
    /// an await point.
    pub fn configuration(&self) -> ConfigGuard<'_, Configuration> {
        self.configuration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

struct QueuedReader<'a>(&'a AtomicUsize);

impl Drop for QueuedReader<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Held reader role. Released on drop.
pub struct ReaderGuard<'a> {
    guard: MutexGuard<'a, Box<dyn InstructionReader>>,
}

impl ReaderGuard<'_> {
    pub fn release(self) {}
}

impl Deref for ReaderGuard<'_> {
    type Target = dyn InstructionReader;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for ReaderGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

/// Held writer role. Released on drop.
pub struct WriterGuard<'a> {
    guard: MutexGuard<'a, Box<dyn InstructionWriter>>,
}

impl WriterGuard<'_> {
    pub fn release(self) {}
}

impl Deref for WriterGuard<'_> {
    type Target = dyn InstructionWriter;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for WriterGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelError;
    use crate::protocol::Instruction;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn tunnel() -> (Arc<Tunnel>, DuplexStream) {
        let (local, upstream) = tokio::io::duplex(1024);
        let socket = SplitSocket::from_stream(local, Duration::from_secs(5));
        (Arc::new(Tunnel::new(socket, Configuration::new("vnc"))), upstream)
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_identifiers_are_unique() {
        let (a, _ua) = tunnel();
        let (b, _ub) = tunnel();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().len(), 36);
    }

    #[tokio::test]
    async fn test_reader_role_is_exclusive() {
        let (tunnel, _upstream) = tunnel();

        let held = tunnel.acquire_reader().await;
        let second = tokio::time::timeout(Duration::from_millis(50), tunnel.acquire_reader()).await;
        assert!(second.is_err());

        // Roles are independent.
        let writer = tunnel.acquire_writer().await;
        writer.release();

        held.release();
        let second = tokio::time::timeout(Duration::from_secs(1), tunnel.acquire_reader()).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_writer_role_is_exclusive() {
        let (tunnel, _upstream) = tunnel();

        let held = tunnel.acquire_writer().await;
        let second = tokio::time::timeout(Duration::from_millis(50), tunnel.acquire_writer()).await;
        assert!(second.is_err());
        drop(held);
        assert!(
            tokio::time::timeout(Duration::from_secs(1), tunnel.acquire_writer())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_has_queued_readers_while_waiting() {
        let (tunnel, _upstream) = tunnel();
        let held = tunnel.acquire_reader().await;
        assert!(!tunnel.has_queued_readers());

        let waiting = {
            let tunnel = tunnel.clone();
            tokio::spawn(async move {
                let _reader = tunnel.acquire_reader().await;
            })
        };
        wait_until(|| tunnel.has_queued_readers()).await;

        drop(held);
        waiting.await.unwrap();
        assert!(!tunnel.has_queued_readers());
    }

    #[tokio::test]
    async fn test_queued_count_survives_cancellation() {
        let (tunnel, _upstream) = tunnel();
        let _held = tunnel.acquire_reader().await;

        let waiting = {
            let tunnel = tunnel.clone();
            tokio::spawn(async move {
                let _reader = tunnel.acquire_reader().await;
            })
        };
        wait_until(|| tunnel.has_queued_readers()).await;

        waiting.abort();
        assert!(waiting.await.unwrap_err().is_cancelled());
        assert!(!tunnel.has_queued_readers());
    }

    #[tokio::test]
    async fn test_guards_reach_socket() {
        let (tunnel, mut upstream) = tunnel();

        tunnel
            .acquire_writer()
            .await
            .write_instruction(Instruction::bare("nop"))
            .await
            .unwrap();
        let mut buf = [0u8; 6];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"3.nop;");

        upstream.write_all(b"4.sync,1.1;").await.unwrap();
        let mut reader = tunnel.acquire_reader().await;
        let ins = reader.read_instruction().await.unwrap().unwrap();
        assert_eq!(ins, Instruction::new("sync", ["1"]));
        assert!(!reader.available());
    }

    #[tokio::test]
    async fn test_close_cancels_pending_read() {
        let (tunnel, _upstream) = tunnel();

        let reading = {
            let tunnel = tunnel.clone();
            tokio::spawn(async move { tunnel.acquire_reader().await.read().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tunnel.close();
        tunnel.close();
        assert!(!tunnel.is_open());
        let result = reading.await.unwrap();
        assert!(matches!(result, Err(TunnelError::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn test_configuration_access() {
        let (tunnel, _upstream) = tunnel();
        tunnel.configuration().set_parameter("error-message", "gone");
        assert_eq!(tunnel.configuration().protocol, "vnc");
        assert_eq!(tunnel.configuration().parameter("error-message"), Some("gone"));
    }
}
