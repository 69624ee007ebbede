//! Guacamole protocol status codes
//!
//! Every status carries the numeric code used on the wire (in `error`
//! instructions and the `Guacamole-Status-Code` header) and the HTTP status
//! reported when the status ends an HTTP tunnel request.

/// Status codes shared by guacd, the tunnel and the browser client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Unsupported,
    ServerError,
    ServerBusy,
    UpstreamTimeout,
    UpstreamError,
    ResourceNotFound,
    ResourceConflict,
    ResourceClosed,
    UpstreamNotFound,
    UpstreamUnavailable,
    SessionConflict,
    SessionTimeout,
    SessionClosed,
    ClientBadRequest,
    ClientUnauthorized,
    ClientForbidden,
    ClientTimeout,
    ClientOverrun,
    ClientBadType,
    ClientTooMany,
}

impl Status {
    const ALL: [Status; 21] = [
        Status::Success,
        Status::Unsupported,
        Status::ServerError,
        Status::ServerBusy,
        Status::UpstreamTimeout,
        Status::UpstreamError,
        Status::ResourceNotFound,
        Status::ResourceConflict,
        Status::ResourceClosed,
        Status::UpstreamNotFound,
        Status::UpstreamUnavailable,
        Status::SessionConflict,
        Status::SessionTimeout,
        Status::SessionClosed,
        Status::ClientBadRequest,
        Status::ClientUnauthorized,
        Status::ClientForbidden,
        Status::ClientTimeout,
        Status::ClientOverrun,
        Status::ClientBadType,
        Status::ClientTooMany,
    ];

    /// Numeric Guacamole status code.
    pub fn code(self) -> u32 {
        match self {
            Status::Success => 0x0000,
            Status::Unsupported => 0x0100,
            Status::ServerError => 0x0200,
            Status::ServerBusy => 0x0201,
            Status::UpstreamTimeout => 0x0202,
            Status::UpstreamError => 0x0203,
            Status::ResourceNotFound => 0x0204,
            Status::ResourceConflict => 0x0205,
            Status::ResourceClosed => 0x0206,
            Status::UpstreamNotFound => 0x0207,
            Status::UpstreamUnavailable => 0x0208,
            Status::SessionConflict => 0x0209,
            Status::SessionTimeout => 0x020A,
            Status::SessionClosed => 0x020B,
            Status::ClientBadRequest => 0x0300,
            Status::ClientUnauthorized => 0x0301,
            Status::ClientForbidden => 0x0303,
            Status::ClientTimeout => 0x0308,
            Status::ClientOverrun => 0x030D,
            Status::ClientBadType => 0x030F,
            Status::ClientTooMany => 0x031D,
        }
    }

    /// HTTP status code reported for this status.
    pub fn http_status(self) -> u16 {
        match self {
            Status::Success => 200,
            Status::Unsupported => 501,
            Status::ServerError => 500,
            Status::ServerBusy => 503,
            Status::UpstreamTimeout => 504,
            Status::UpstreamError | Status::UpstreamNotFound | Status::UpstreamUnavailable => 502,
            Status::ResourceNotFound | Status::ResourceClosed | Status::SessionClosed => 404,
            Status::ResourceConflict | Status::SessionConflict => 409,
            Status::SessionTimeout | Status::ClientTimeout => 408,
            Status::ClientBadRequest => 400,
            Status::ClientUnauthorized | Status::ClientForbidden => 403,
            Status::ClientOverrun => 413,
            Status::ClientBadType => 415,
            Status::ClientTooMany => 429,
        }
    }

    /// Looks up a status by its numeric code.
    pub fn from_code(code: u32) -> Option<Status> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }
}
