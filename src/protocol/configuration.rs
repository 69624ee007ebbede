//! Per-connection configuration and client capabilities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Parameter under which a tunnel records the upstream error that ended it.
pub const ERROR_MESSAGE_PARAMETER: &str = "error-message";

/// Connection parameters sent to guacd during the handshake.
///
/// Either names a protocol for a new connection, or the id of an existing
/// connection to join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub protocol: String,
    pub connection_id: Option<String>,
    pub parameters: HashMap<String, String>,
}

impl Configuration {
    /// Configuration for a new connection using `protocol`.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            ..Self::default()
        }
    }

    /// Builder: set a parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_parameter(name, value);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(name.into(), value.into());
    }

    /// The value sent with `select`: the connection id when joining,
    /// otherwise the protocol.
    pub fn selector(&self) -> &str {
        self.connection_id.as_deref().unwrap_or(&self.protocol)
    }
}

/// What the browser client can display and play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub audio_mimetypes: Vec<String>,
    pub video_mimetypes: Vec<String>,
    pub image_mimetypes: Vec<String>,
    pub timezone: Option<String>,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            dpi: 96,
            audio_mimetypes: Vec::new(),
            video_mimetypes: Vec::new(),
            image_mimetypes: vec!["image/png".to_string(), "image/jpeg".to_string()],
            timezone: None,
        }
    }
}
