//! guac-tunnel - HTTP tunnel for the Guacamole protocol
//!
//! Relays the instruction stream between browser-resident Guacamole clients
//! and guacd. Browsers talk to the tunnel through short-lived HTTP long-poll
//! requests, which are multiplexed onto one long-lived guacd connection per
//! tunnel.

pub mod config;
pub mod connector;
pub mod error;
pub mod http;
pub mod id;
pub mod io;
pub mod net;
pub mod protocol;
pub mod server;

pub use error::{Result, TunnelError};
