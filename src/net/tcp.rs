//! Plain TCP connection to guacd.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Result, TunnelError};
use crate::net::SplitSocket;

/// Connect to the guacd instance at `host:port`.
///
/// `timeout` bounds the connection attempt and every later read and write.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<SplitSocket> {
    log::debug!("Connecting to guacd at {}:{}.", host, port);

    let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Err(_) => {
            return Err(TunnelError::UpstreamTimeout(
                "Connection to guacd timed out.".into(),
            ));
        }
        Ok(Err(e)) => {
            return Err(TunnelError::Server(format!(
                "Unable to connect to guacd at {}:{}: {}",
                host, port, e
            )));
        }
        Ok(Ok(stream)) => stream,
    };
    stream.set_nodelay(true)?;

    Ok(SplitSocket::from_stream(stream, timeout))
}
