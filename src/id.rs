//! ID generation utilities for guac-tunnel
//!
//! Tunnel identifiers are handed to browser clients and used to route every
//! later read and write request, so they must be unique and unguessable.

use uuid::Uuid;

/// Generate a tunnel ID
///
/// Format: random (version 4) UUID in hyphenated lowercase form
/// Example: `3f2b8c1e-9a4d-4e6f-8b2a-1c5d7e9f0a3b`
pub fn generate_tunnel_id() -> String {
    Uuid::new_v4().to_string()
}
