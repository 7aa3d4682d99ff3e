//! Gateway error types with wire-code mapping.
//!
//! [`RelayError`] is the central error type for the gateway. Each variant
//! maps to a numeric error code (carried in structured error envelopes), a
//! WebSocket close code where the resolution is closing the socket, and an
//! HTTP status code for the small REST surface.
//!
//! Per-connection failures are never fatal to the process: admission and
//! rate-limit errors resolve by closing the offending socket, envelope
//! errors resolve by an error envelope on the open connection, and only a
//! listener bind failure propagates out of startup.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::ConnectionId;

/// WebSocket close codes used by the gateway.
pub mod close_code {
    /// Server is shutting down (standard "going away").
    pub const SHUTDOWN: u16 = 1001;
    /// Registry is at its connection capacity.
    pub const CAPACITY: u16 = 1013;
    /// Origin address is currently banned.
    pub const BANNED: u16 = 4003;
    /// Connection exhausted its missed-ping budget.
    pub const DEAD: u16 = 4008;
    /// Connection exceeded its rate-limit window.
    pub const RATE_LIMITED: u16 = 4029;
}

/// Structured JSON error response body for the REST surface.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`RelayError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with numeric code and close-code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          |
/// |-----------|-------------------|
/// | 1000–1999 | Validation / auth |
/// | 2000–2999 | State / not found |
/// | 3000–3999 | Server            |
/// | 429       | Rate limiting     |
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Envelope failed validation.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Authentication request was rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Envelope exceeds the configured wire-size ceiling.
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Serialized envelope size.
        size: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// No connection with the given id exists in the registry.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Registry is at its configured connection capacity.
    #[error("connection capacity of {0} exceeded")]
    CapacityExceeded(usize),

    /// Origin address is currently banned.
    #[error("origin {0} is banned")]
    OriginBanned(std::net::IpAddr),

    /// Client exceeded its rate-limit window.
    #[error("rate limit exceeded; banned for {ban_secs} s")]
    RateLimited {
        /// Duration of the resulting origin ban in seconds.
        ban_secs: u64,
    },

    /// Envelope serialization failed.
    #[error("envelope serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Listener bind failure. The only error that propagates out of
    /// server startup.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidEnvelope(_) => 1001,
            Self::AuthenticationFailed(_) => 1002,
            Self::MessageTooLarge { .. } => 1003,
            Self::UnknownConnection(_) => 2001,
            Self::CapacityExceeded(_) => 2002,
            Self::OriginBanned(_) => 2003,
            Self::RateLimited { .. } => 429,
            Self::Serialization(_) => 3001,
            Self::Bind(_) => 3002,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns the WebSocket close code for variants that resolve by
    /// closing the socket, or `None` for errors answered in-band.
    #[must_use]
    pub const fn ws_close_code(&self) -> Option<u16> {
        match self {
            Self::CapacityExceeded(_) => Some(close_code::CAPACITY),
            Self::OriginBanned(_) => Some(close_code::BANNED),
            Self::RateLimited { .. } => Some(close_code::RATE_LIMITED),
            _ => None,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidEnvelope(_) | Self::MessageTooLarge { .. } => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::UnknownConnection(_) => StatusCode::NOT_FOUND,
            Self::CapacityExceeded(_) | Self::OriginBanned(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Serialization(_) | Self::Bind(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
