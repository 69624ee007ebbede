//! guacd connector - opens a tunnel to a configured connection
//!
//! The browser names the connection it wants in the `Guacamole-Connection`
//! header of its `connect` request; without one the configured default is
//! used. Each tunnel gets its own guacd connection, built up as:
//! TCP, handshake, failover probe, then the connection's opcode filters.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::TunnelError;
use crate::http::{BoxError, Connector, TunnelRequest};
use crate::net::{ConfiguredSocket, FailoverSocket, FilteredSocket, Tunnel, tcp};
use crate::protocol::{Filter, OpcodeBlocklist};

/// Request header naming the connection to open.
pub const CONNECTION_HEADER: &str = "Guacamole-Connection";

/// Connector opening guacd connections described by a [`Config`]
pub struct GuacdConnector {
    config: Arc<Config>,
}

impl GuacdConnector {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

fn blocklist(opcodes: &[String]) -> Option<Arc<dyn Filter>> {
    if opcodes.is_empty() {
        return None;
    }
    Some(Arc::new(OpcodeBlocklist::new(opcodes.iter().cloned())))
}

#[async_trait]
impl Connector for GuacdConnector {
    async fn connect(&self, request: &mut dyn TunnelRequest) -> Result<Tunnel, BoxError> {
        let requested = request.header(CONNECTION_HEADER).map(str::to_string);
        let (name, connection) = self.config.connection(requested.as_deref()).ok_or_else(|| {
            TunnelError::ResourceNotFound(match &requested {
                Some(name) => format!("No such connection: {}", name),
                None => "No connection requested.".to_string(),
            })
        })?;

        let guacd = &self.config.guacd;
        let mut configuration = connection.to_configuration();

        let socket = tcp::connect(&guacd.host, guacd.port, guacd.io_timeout()).await?;
        let socket =
            ConfiguredSocket::handshake(socket, &mut configuration, &self.config.client).await?;
        let connection_id = socket.connection_id().to_string();
        let socket = FailoverSocket::new(socket).await?;
        let socket = FilteredSocket::new(
            socket,
            blocklist(&connection.block_read),
            blocklist(&connection.block_write),
        );

        log::info!(
            "Connected to \"{}\" ({}) as guacd connection {}.",
            name,
            connection.protocol,
            connection_id
        );
        Ok(Tunnel::new(socket, configuration))
    }
}
