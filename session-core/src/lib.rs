#![deny(missing_docs)]
//! Supervised WebSocket session engine for resilient trading connections.
//!
//! This crate owns the hardest part of talking to an exchange over a single
//! authenticated WebSocket connection: pumping frames in and out, enforcing a
//! heartbeat contract, correlating JSON-RPC requests with their responses,
//! shaping outbound traffic through a token-bucket rate limiter and, on
//! failure, rebuilding the connection without the caller's handle changing.
//!
//! The crate is deliberately narrow. It does not know how to authenticate
//! against any particular exchange, what methods exist, or how to encode
//! anything beyond the generic JSON-RPC 2.0 envelope — all of that is
//! supplied by an [`Adapter`] implementation owned by the embedding
//! application. See [`supervisor::Supervisor`] for the entry point.
//!
//! ```text
//! caller -> Supervisor -> Session Engine -> Rate Limiter -> Request Tracker -> Frame Codec -> transport
//! ```

mod adapter;
mod config;
mod engine;
mod frame;
mod jsonrpc;
/// Event-emission points only; the embedding application installs an exporter.
pub mod metrics;
mod rate_limiter;
mod registry;
mod request_tracker;
mod supervisor;
mod transport;

pub use adapter::{Adapter, ClassifiedIncoming};
pub use config::{Credentials, HeartbeatConfig, RateLimitConfig, SessionConfig, SessionConfigBuilder};
pub use engine::{ConnectionState, HeartbeatHealth};
pub use frame::{CloseReason, Frame};
pub use jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
pub use rate_limiter::{Admission, RateLimiterStatus};
pub use request_tracker::RequestOutcome;
pub use supervisor::{Supervisor, SessionHandle};

use uuid::Uuid;

/// Errors surfaced to the caller across the public API.
///
/// Per spec: errors are surfaced raw, with enough context to distinguish
/// category. Local recovery (reconnection, rate-limit queueing) never
/// reaches the caller as an error; only the outcomes below do.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No correlated response arrived within the configured `request_timeout`.
    #[error("request timed out")]
    Timeout,
    /// The rate limiter's queue was full when the request was submitted.
    #[error("rate limited: queue full")]
    RateLimited,
    /// The session was not in `Ready` state when the request was submitted.
    #[error("session is not connected")]
    NotConnected,
    /// The transport was lost while the request was in flight.
    #[error("connection lost")]
    ConnectionLost,
    /// The server answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    RpcError {
        /// Server-defined error code.
        code: i64,
        /// Human-readable message from the server.
        message: String,
    },
    /// The session exhausted `retry_count` reconnection attempts.
    #[error("max reconnection attempts exceeded")]
    MaxRetriesExceeded,
    /// A frame could not be classified as a known WebSocket frame type.
    #[error("malformed frame")]
    MalformedFrame,
    /// The configured URL could not be parsed as a WebSocket endpoint.
    #[error(transparent)]
    InvalidUri(#[from] tokio_tungstenite::tungstenite::http::uri::InvalidUri),
    /// Transport-level failure (connect, TLS, read/write).
    #[error(transparent)]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    /// The Adapter rejected the authentication response.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// `session_id` has no live engine in the registry (engine never existed
    /// or the session was already closed).
    #[error("unknown session {0}")]
    UnknownSession(Uuid),
    /// A required [`SessionConfigBuilder`] field was never set.
    #[error("missing required configuration field: {0}")]
    MissingConfig(&'static str),
}
