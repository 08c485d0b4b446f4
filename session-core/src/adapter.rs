//! The capability seam between this crate's generic engine and a specific
//! exchange's JSON-RPC dialect.
//!
//! An `Adapter` never touches the transport or the rate limiter; it only
//! builds and classifies JSON-RPC payloads. Everything it returns flows
//! through the same Frame Codec and Request Tracker as hand-issued requests.

use crate::config::Credentials;
use crate::frame::Frame;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::request_tracker::RequestOutcome;

/// Result of classifying an inbound frame against an exchange's dialect.
pub enum ClassifiedIncoming {
    /// A correlated reply to a request this crate issued.
    Response(JsonRpcResponse),
    /// A server-initiated notification (subscription data, announcements).
    Notification(JsonRpcNotification),
    /// A platform-level heartbeat probe (e.g. Deribit's `test_request`).
    /// The engine sends the carried reply request verbatim to keep the
    /// session alive; the adapter builds it since only it knows the
    /// exchange's expected acknowledgement shape.
    Heartbeat(JsonRpcRequest),
    /// A frame the adapter has no interpretation for. Logged and dropped.
    Unrecognized,
}

/// Exchange-specific glue supplied by the embedding application.
///
/// Implementations must be cheap to call from the engine's event loop: no
/// blocking I/O, no locking beyond what the implementation itself owns.
pub trait Adapter: Send + Sync {
    /// Builds the authentication request sent immediately after connecting.
    fn build_auth_request(&self, id: i64, credentials: &Credentials) -> JsonRpcRequest;

    /// Inspects the correlated response to the authentication request.
    ///
    /// Returns `Ok(())` once authenticated, or `Err(reason)` to fail the
    /// session with [`crate::Error::AuthFailed`].
    fn on_auth_response(&self, outcome: &RequestOutcome) -> Result<(), String>;

    /// Builds a subscription request for the given channels.
    fn build_subscribe(&self, id: i64, channels: &[String]) -> JsonRpcRequest;

    /// Builds an unsubscription request for the given channels.
    fn build_unsubscribe(&self, id: i64, channels: &[String]) -> JsonRpcRequest;

    /// Classifies an inbound application frame (never a control frame —
    /// those are handled by the engine before reaching the adapter).
    fn classify_incoming(&self, frame: &Frame) -> ClassifiedIncoming;
}
