//! Configured socket - performs the guacd handshake
//!
//! The handshake selects a protocol (or an existing connection to join),
//! answers the parameter names guacd asks for from the [`Configuration`],
//! describes the client's display and media support, and waits for guacd to
//! report the connection ready.

use crate::error::{Result, TunnelError};
use crate::io::{InstructionReader, InstructionWriter};
use crate::net::{Link, Socket, SplitSocket};
use crate::protocol::{ClientInfo, Configuration, Instruction};

/// Protocol version announced to guacd.
pub const PROTOCOL_VERSION: &str = "VERSION_1_5_0";

/// Prefix of the `args` entry carrying guacd's protocol version.
const VERSION_PREFIX: &str = "VERSION_";

/// First version understanding the `timezone` handshake instruction.
const TIMEZONE_VERSION: (u32, u32, u32) = (1, 1, 0);

/// Socket to guacd that completed the handshake.
pub struct ConfiguredSocket {
    inner: SplitSocket,
    connection_id: String,
    protocol_version: Option<String>,
}

impl ConfiguredSocket {
    /// Run the handshake over `socket`, recording the resulting connection
    /// id in `configuration`.
    ///
    /// The socket is closed if the handshake fails.
    pub async fn handshake<S: Socket + 'static>(
        socket: S,
        configuration: &mut Configuration,
        client: &ClientInfo,
    ) -> Result<Self> {
        let mut inner = Box::new(socket).into_split();
        match negotiate(&mut inner, configuration, client).await {
            Ok((connection_id, protocol_version)) => {
                log::debug!(
                    "guacd connection {} ready ({}).",
                    connection_id,
                    protocol_version.as_deref().unwrap_or("legacy protocol")
                );
                configuration.connection_id = Some(connection_id.clone());
                Ok(Self {
                    inner,
                    connection_id,
                    protocol_version,
                })
            }
            Err(e) => {
                inner.close();
                Err(e)
            }
        }
    }

    /// The id guacd assigned to the connection.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// guacd's protocol version, if it announced one.
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }
}

async fn negotiate(
    socket: &mut SplitSocket,
    configuration: &Configuration,
    client: &ClientInfo,
) -> Result<(String, Option<String>)> {
    let writer = socket.writer.as_mut();
    let reader = socket.reader.as_mut();

    writer
        .write_instruction(Instruction::new("select", [configuration.selector()]))
        .await?;

    let args = expect(reader, "args").await?;
    let protocol_version = args
        .arg(0)
        .filter(|arg| arg.starts_with(VERSION_PREFIX))
        .map(str::to_string);

    writer
        .write_instruction(Instruction::new(
            "size",
            [
                client.width.to_string(),
                client.height.to_string(),
                client.dpi.to_string(),
            ],
        ))
        .await?;
    writer
        .write_instruction(Instruction::new("audio", &client.audio_mimetypes))
        .await?;
    writer
        .write_instruction(Instruction::new("video", &client.video_mimetypes))
        .await?;
    writer
        .write_instruction(Instruction::new("image", &client.image_mimetypes))
        .await?;

    if let Some(timezone) = &client.timezone {
        let supported = protocol_version
            .as_deref()
            .and_then(parse_version)
            .is_some_and(|version| version >= TIMEZONE_VERSION);
        if supported {
            writer
                .write_instruction(Instruction::new("timezone", [timezone]))
                .await?;
        }
    }

    let values = args.args().iter().enumerate().map(|(i, name)| {
        if i == 0 && name.starts_with(VERSION_PREFIX) {
            PROTOCOL_VERSION
        } else {
            configuration.parameter(name).unwrap_or_default()
        }
    });
    writer
        .write_instruction(Instruction::new("connect", values))
        .await?;

    let ready = expect(reader, "ready").await?;
    let connection_id = ready
        .arg(0)
        .ok_or_else(|| TunnelError::Server("guacd did not send a connection id.".into()))?
        .to_string();

    Ok((connection_id, protocol_version))
}

/// Read the next instruction, which must have the given opcode.
async fn expect(reader: &mut dyn InstructionReader, opcode: &str) -> Result<Instruction> {
    let instruction = reader.read_instruction().await?.ok_or_else(|| {
        TunnelError::Server(format!(
            "Connection to guacd closed while waiting for \"{}\".",
            opcode
        ))
    })?;

    if instruction.opcode() == "error" {
        let message = instruction.arg(0).unwrap_or_default();
        let err = instruction
            .arg(1)
            .and_then(|code| code.parse::<u32>().ok())
            .and_then(|code| TunnelError::from_upstream_code(code, message));
        return Err(err.unwrap_or_else(|| TunnelError::Server(format!("guacd error: {}", message))));
    }

    if instruction.opcode() != opcode {
        return Err(TunnelError::Server(format!(
            "Expected \"{}\" instruction but received \"{}\".",
            opcode,
            instruction.opcode()
        )));
    }

    Ok(instruction)
}

/// Parse `VERSION_<major>_<minor>_<patch>`.
fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.strip_prefix(VERSION_PREFIX)?.split('_');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

impl Socket for ConfiguredSocket {
    fn link(&self) -> &Link {
        self.inner.link()
    }

    fn reader(&mut self) -> &mut dyn InstructionReader {
        self.inner.reader()
    }

    fn writer(&mut self) -> &mut dyn InstructionWriter {
        self.inner.writer()
    }

    fn into_split(self: Box<Self>) -> SplitSocket {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Plays guacd's side of a handshake, returning everything it received.
    async fn fake_guacd(
        mut guacd: SplitSocket,
        args: Instruction,
        reply: Instruction,
    ) -> Vec<Instruction> {
        let mut received = Vec::new();
        received.push(guacd.reader().read_instruction().await.unwrap().unwrap());
        guacd.writer().write_instruction(args).await.unwrap();
        loop {
            let ins = guacd.reader().read_instruction().await.unwrap().unwrap();
            let done = ins.opcode() == "connect";
            received.push(ins);
            if done {
                break;
            }
        }
        guacd.writer().write_instruction(reply).await.unwrap();
        received
    }

    fn pair() -> (SplitSocket, SplitSocket) {
        let (local, upstream) = tokio::io::duplex(4096);
        (
            SplitSocket::from_stream(local, TIMEOUT),
            SplitSocket::from_stream(upstream, TIMEOUT),
        )
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("VERSION_1_5_0"), Some((1, 5, 0)));
        assert_eq!(parse_version("VERSION_1_1"), None);
        assert_eq!(parse_version("VERSION_1_x_0"), None);
        assert_eq!(parse_version("hostname"), None);
    }

    #[tokio::test]
    async fn test_handshake_with_version() {
        let (local, upstream) = pair();
        let guacd = tokio::spawn(fake_guacd(
            upstream,
            Instruction::new("args", ["VERSION_1_3_0", "hostname", "port", "password"]),
            Instruction::new("ready", ["$4f2a"]),
        ));

        let mut configuration = Configuration::new("vnc")
            .with_parameter("hostname", "desktop.local")
            .with_parameter("port", "5901");
        let client = ClientInfo {
            timezone: Some("Europe/Paris".to_string()),
            ..ClientInfo::default()
        };

        let socket = ConfiguredSocket::handshake(local, &mut configuration, &client)
            .await
            .unwrap();
        assert_eq!(socket.connection_id(), "$4f2a");
        assert_eq!(socket.protocol_version(), Some("VERSION_1_3_0"));
        assert_eq!(configuration.connection_id.as_deref(), Some("$4f2a"));

        let received = guacd.await.unwrap();
        let opcodes: Vec<&str> = received.iter().map(Instruction::opcode).collect();
        assert_eq!(
            opcodes,
            ["select", "size", "audio", "video", "image", "timezone", "connect"]
        );
        assert_eq!(received[0], Instruction::new("select", ["vnc"]));
        assert_eq!(received[1], Instruction::new("size", ["1024", "768", "96"]));
        assert_eq!(received[4], Instruction::new("image", ["image/png", "image/jpeg"]));
        assert_eq!(
            received[6],
            Instruction::new("connect", [PROTOCOL_VERSION, "desktop.local", "5901", ""])
        );
    }

    #[tokio::test]
    async fn test_legacy_guacd_gets_no_timezone() {
        let (local, upstream) = pair();
        let guacd = tokio::spawn(fake_guacd(
            upstream,
            Instruction::new("args", ["hostname"]),
            Instruction::new("ready", ["$1"]),
        ));

        let mut configuration = Configuration::new("rdp").with_parameter("hostname", "win");
        let client = ClientInfo {
            timezone: Some("UTC".to_string()),
            ..ClientInfo::default()
        };

        let socket = ConfiguredSocket::handshake(local, &mut configuration, &client)
            .await
            .unwrap();
        assert!(socket.protocol_version().is_none());

        let received = guacd.await.unwrap();
        assert!(received.iter().all(|ins| ins.opcode() != "timezone"));
        assert_eq!(received.last().unwrap(), &Instruction::new("connect", ["win"]));
    }

    #[tokio::test]
    async fn test_joining_selects_connection_id() {
        let (local, upstream) = pair();
        let guacd = tokio::spawn(fake_guacd(
            upstream,
            Instruction::new("args", ["read-only"]),
            Instruction::new("ready", ["$join"]),
        ));

        let mut configuration = Configuration::new("vnc");
        configuration.connection_id = Some("$join".to_string());
        ConfiguredSocket::handshake(local, &mut configuration, &ClientInfo::default())
            .await
            .unwrap();

        let received = guacd.await.unwrap();
        assert_eq!(received[0], Instruction::new("select", ["$join"]));
    }

    #[tokio::test]
    async fn test_upstream_error_during_handshake() {
        let (local, upstream) = pair();
        let guacd = tokio::spawn(fake_guacd(
            upstream,
            Instruction::new("args", ["hostname"]),
            Instruction::new("error", ["Connection refused", "520"]),
        ));

        let link = local.link.clone();
        let err = ConfiguredSocket::handshake(
            local,
            &mut Configuration::new("ssh"),
            &ClientInfo::default(),
        )
        .await
        .err()
        .unwrap();
        guacd.await.unwrap();

        assert!(matches!(err, TunnelError::UpstreamUnavailable(ref m) if m == "Connection refused"));
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn test_unexpected_opcode_is_server_error() {
        let (local, mut upstream) = pair();
        let guacd = tokio::spawn(async move {
            upstream.reader().read_instruction().await.unwrap();
            upstream
                .writer()
                .write_instruction(Instruction::new("sync", ["1"]))
                .await
                .unwrap();
            upstream
        });

        let err = ConfiguredSocket::handshake(
            local,
            &mut Configuration::new("vnc"),
            &ClientInfo::default(),
        )
        .await
        .err()
        .unwrap();
        drop(guacd.await.unwrap());

        assert!(matches!(err, TunnelError::Server(ref m) if m.contains("\"args\"")));
    }

    #[tokio::test]
    async fn test_eof_during_handshake_is_server_error() {
        let (local, mut upstream) = pair();
        let guacd = tokio::spawn(async move {
            upstream.reader().read_instruction().await.unwrap();
        });

        let err = ConfiguredSocket::handshake(
            local,
            &mut Configuration::new("vnc"),
            &ClientInfo::default(),
        )
        .await
        .err()
        .unwrap();
        guacd.await.unwrap();

        assert!(matches!(err, TunnelError::Server(_)));
    }
}
