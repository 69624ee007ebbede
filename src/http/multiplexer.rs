//! HTTP multiplexer - serves the browser client's tunnel protocol
//!
//! The browser never holds a connection open for the life of a session.
//! Instead it issues:
//! - `?connect` once, receiving the new tunnel's identifier
//! - `?read:<id>` repeatedly, each response streaming instructions from guacd
//!   until another read request is waiting to take over
//! - `?write:<id>` for every batch of instructions it sends
//!
//! Anything after a further `:` in a read or write query is ignored; clients
//! append a counter to defeat caching.

use std::io;
use std::sync::Arc;

use crate::error::{Result, TunnelError};
use crate::http::{Connector, TunnelHook, TunnelRegistry, TunnelRequest, TunnelResponse};
use crate::io::InstructionReader;
use crate::net::Tunnel;
use crate::protocol::{ERROR_MESSAGE_PARAMETER, Instruction, Status, opcode_of};

/// Sent after an upstream `error` so the client disconnects.
pub const DISCONNECT_INSTRUCTION: &[u8] = b"10.disconnect;";

/// Ends every read response.
pub const END_OF_STREAM: &[u8] = b"0.;";

pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 8192;

const READ_PREFIX: &str = "read:";
const WRITE_PREFIX: &str = "write:";

/// Why a read response stopped early.
enum ReadFailure {
    Tunnel(TunnelError),
    Response(io::Error),
}

impl From<TunnelError> for ReadFailure {
    fn from(err: TunnelError) -> Self {
        ReadFailure::Tunnel(err)
    }
}

impl From<io::Error> for ReadFailure {
    fn from(err: io::Error) -> Self {
        ReadFailure::Response(err)
    }
}

/// Routes tunnel requests to the tunnels they address.
pub struct Multiplexer {
    connector: Arc<dyn Connector>,
    registry: Arc<TunnelRegistry>,
    on_connect: Option<TunnelHook>,
    write_chunk_size: usize,
}

impl Multiplexer {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Arc::new(connector),
            registry: Arc::new(TunnelRegistry::new()),
            on_connect: None,
            write_chunk_size: DEFAULT_WRITE_CHUNK_SIZE,
        }
    }

    /// Builder: register tunnels in `registry`.
    pub fn with_registry(mut self, registry: Arc<TunnelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Builder: call `hook` with every newly registered tunnel.
    pub fn with_connect_hook(
        mut self,
        hook: impl Fn(&Arc<Tunnel>) + Send + Sync + 'static,
    ) -> Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Builder: bytes read from a write request's body at a time.
    pub fn with_write_chunk_size(mut self, size: usize) -> Self {
        self.write_chunk_size = size.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    /// Serve one tunnel request.
    ///
    /// Failures are reported to the client through the response. The
    /// returned error only means the response itself could not be sent.
    pub async fn handle(
        &self,
        request: &mut dyn TunnelRequest,
        response: &mut dyn TunnelResponse,
    ) -> io::Result<()> {
        let Err(err) = self.dispatch(request, response).await else {
            return Ok(());
        };

        if err.is_client_error() {
            log::warn!("HTTP tunnel request rejected: {}", err.message());
            send_error(response, err.status(), &err.message()).await
        } else {
            log::error!("HTTP tunnel request failed: {}", err.message());
            log::debug!("Internal error in HTTP tunnel: {:?}", err);
            send_error(response, err.status(), "Internal server error.").await
        }
    }

    /// Close and deregister every tunnel.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }

    async fn dispatch(
        &self,
        request: &mut dyn TunnelRequest,
        response: &mut dyn TunnelResponse,
    ) -> Result<()> {
        let query = request.query().to_string();
        if query.is_empty() {
            return Err(TunnelError::Client("No query string provided.".into()));
        }

        if query == "connect" {
            self.connect(request, response).await
        } else if let Some(rest) = query.strip_prefix(READ_PREFIX) {
            self.read(response, tunnel_id(rest)).await
        } else if let Some(rest) = query.strip_prefix(WRITE_PREFIX) {
            self.write(request, response, tunnel_id(rest)).await
        } else {
            Err(TunnelError::Client(format!(
                "Invalid tunnel operation: {}",
                query
            )))
        }
    }

    async fn connect(
        &self,
        request: &mut dyn TunnelRequest,
        response: &mut dyn TunnelResponse,
    ) -> Result<()> {
        let tunnel = match self.connector.connect(request).await {
            Ok(tunnel) => Arc::new(tunnel),
            Err(err) => {
                return Err(match err.downcast::<TunnelError>() {
                    Ok(err) => *err,
                    Err(other) => {
                        log::debug!("Connector failed: {}", other);
                        TunnelError::ResourceNotFound("No tunnel created.".into())
                    }
                });
            }
        };

        if let Err(e) = self.registry.put(tunnel.clone()).await {
            tunnel.close();
            return Err(e);
        }
        if let Some(hook) = &self.on_connect {
            hook(&tunnel);
        }

        response.set_header("Cache-Control", "no-cache");
        response
            .write(tunnel.id().as_bytes())
            .await
            .map_err(|e| TunnelError::Server(e.to_string()))
    }

    async fn lookup(&self, id: &str) -> Result<Arc<Tunnel>> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| TunnelError::ResourceNotFound("No such tunnel.".into()))
    }

    async fn deregister(&self, tunnel: &Tunnel) {
        self.registry.remove(tunnel.id()).await;
        tunnel.close();
    }

    async fn read(&self, response: &mut dyn TunnelResponse, id: &str) -> Result<()> {
        let tunnel = self.lookup(id).await?;
        if !tunnel.is_open() {
            self.deregister(&tunnel).await;
            return Err(TunnelError::ResourceNotFound("Tunnel is closed.".into()));
        }

        // Anything but octet-stream makes some browsers buffer before
        // exposing the stream.
        response.set_content_type("application/octet-stream");
        response.set_header("Cache-Control", "no-cache");

        let mut reader = tunnel.acquire_reader().await;
        match self.stream(&tunnel, &mut *reader, response).await {
            Ok(()) => Ok(()),
            Err(ReadFailure::Response(e)) => {
                log::debug!("Error writing to HTTP response: {}", e);
                self.deregister(&tunnel).await;
                Ok(())
            }
            Err(ReadFailure::Tunnel(TunnelError::ConnectionClosed(_))) => {
                self.deregister(&tunnel).await;
                if let Err(e) = finish(response).await {
                    log::debug!("Error writing to HTTP response: {}", e);
                }
                Ok(())
            }
            Err(ReadFailure::Tunnel(e)) => {
                self.deregister(&tunnel).await;
                Err(e)
            }
        }
    }

    /// Stream instructions into the response until the upstream ends or
    /// another reader is waiting.
    async fn stream(
        &self,
        tunnel: &Tunnel,
        reader: &mut dyn InstructionReader,
        response: &mut dyn TunnelResponse,
    ) -> std::result::Result<(), ReadFailure> {
        loop {
            let Some(raw) = reader.read().await? else {
                self.deregister(tunnel).await;
                break;
            };
            response.write(&raw).await?;

            if opcode_of(&raw) == Some("error") {
                response.write(DISCONNECT_INSTRUCTION).await?;
                record_error(tunnel, &raw);
                self.deregister(tunnel).await;
                break;
            }

            // Flush only when the next read may have to wait.
            if !reader.available() {
                response.flush().await?;
            }
            if tunnel.has_queued_readers() {
                break;
            }
        }

        finish(response).await?;
        Ok(())
    }

    async fn write(
        &self,
        request: &mut dyn TunnelRequest,
        response: &mut dyn TunnelResponse,
        id: &str,
    ) -> Result<()> {
        let tunnel = self.lookup(id).await?;

        // The client ignores the body, but the default text/html would make
        // some browsers try to parse it anyway.
        response.set_content_type("application/octet-stream");
        response.set_header("Cache-Control", "no-cache");
        response.set_content_length(0);

        let mut writer = tunnel.acquire_writer().await;
        let mut buffer = vec![0u8; self.write_chunk_size];
        while tunnel.is_open() {
            let length = match request.read(&mut buffer).await {
                Ok(0) => break,
                Ok(length) => length,
                Err(e) => {
                    self.deregister(&tunnel).await;
                    return Err(TunnelError::Server(format!(
                        "I/O error reading request body: {}",
                        e
                    )));
                }
            };

            if let Err(e) = writer.write(&buffer[..length]).await {
                self.deregister(&tunnel).await;
                return Err(e);
            }
        }
        Ok(())
    }
}

/// The identifier part of a read or write query.
fn tunnel_id(rest: &str) -> &str {
    rest.split(':').next().unwrap_or(rest)
}

async fn finish(response: &mut dyn TunnelResponse) -> io::Result<()> {
    response.write(END_OF_STREAM).await?;
    response.flush().await
}

fn record_error(tunnel: &Tunnel, raw: &[u8]) {
    let message = match Instruction::parse(raw) {
        Ok(error) => error.arg(0).unwrap_or_default().to_string(),
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    };
    log::debug!("Tunnel \"{}\" ended by upstream error: {}", tunnel.id(), message);
    tunnel
        .configuration()
        .set_parameter(ERROR_MESSAGE_PARAMETER, message);
}

async fn send_error(response: &mut dyn TunnelResponse, status: Status, message: &str) -> io::Result<()> {
    if response.is_committed() {
        return Ok(());
    }
    response.set_header("Guacamole-Status-Code", &status.code().to_string());
    response.set_header("Guacamole-Error-Message", message);
    response.send_error(status.http_status()).await
}
