//! HTTP tunnel - multiplexes browser long-poll requests onto tunnels
//!
//! This module provides:
//! - The request/response capabilities the multiplexer needs from an HTTP server
//! - The `Connector` creating tunnels for `connect` requests
//! - The tunnel registry and the multiplexer itself

pub mod multiplexer;
pub mod registry;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;

use crate::net::Tunnel;

pub use multiplexer::{DISCONNECT_INSTRUCTION, END_OF_STREAM, Multiplexer};
pub use registry::TunnelRegistry;

/// Error type returned by connectors.
///
/// A [`TunnelError`](crate::error::TunnelError) is reported to the client as
/// is; anything else becomes "no tunnel created".
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with a tunnel, e.g. after it was registered or removed.
pub type TunnelHook = Arc<dyn Fn(&Arc<Tunnel>) + Send + Sync>;

/// An incoming tunnel request
#[async_trait]
pub trait TunnelRequest: Send {
    /// The raw query string, without the leading `?`.
    fn query(&self) -> &str;

    fn header(&self, name: &str) -> Option<&str>;

    /// Read body bytes into `buf`. Returns 0 at the end of the body.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// The response to a tunnel request
///
/// Headers may only change until the response is committed, which happens
/// on the first flush.
#[async_trait]
pub trait TunnelResponse: Send {
    fn set_header(&mut self, name: &str, value: &str);

    fn set_content_type(&mut self, content_type: &str) {
        self.set_header("Content-Type", content_type);
    }

    fn set_content_length(&mut self, length: u64) {
        self.set_header("Content-Length", &length.to_string());
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Send everything written so far, committing the response.
    async fn flush(&mut self) -> io::Result<()>;

    fn is_committed(&self) -> bool;

    /// Respond with an empty body and the given HTTP status.
    async fn send_error(&mut self, status: u16) -> io::Result<()>;
}

/// Creates the tunnel for a `connect` request
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: &mut dyn TunnelRequest) -> Result<Tunnel, BoxError>;
}
