//! Metrics definitions for the session engine.
//!
//! Only emission points live in this crate; the embedding application wires
//! up an exporter (Prometheus, StatsD, ...) and calls [`describe_metrics`]
//! once during startup.

/// Counter: connection attempts that failed before the WebSocket handshake
/// completed.
pub const METRICS_CONNECT_FAILED: &str = "session_core.connect.failed";
/// Counter: successful transitions into the `Ready` state.
pub const METRICS_CONNECTED: &str = "session_core.connected";
/// Counter: requests admitted immediately by the rate limiter.
pub const METRICS_RATE_LIMITER_ADMITTED: &str = "session_core.rate_limiter.admitted";
/// Counter: requests queued by the rate limiter pending tokens.
pub const METRICS_RATE_LIMITER_QUEUED: &str = "session_core.rate_limiter.queued";
/// Counter: requests rejected outright because the queue was full.
pub const METRICS_RATE_LIMITER_REJECTED: &str = "session_core.rate_limiter.rejected";
/// Counter: reconnection attempts made by an engine's own backoff loop
/// (standalone mode only — supervised engines never retry internally).
pub const METRICS_RECONNECT_ATTEMPT: &str = "session_core.reconnect.attempt";
/// Counter: missed `ping_pong` heartbeats (no Pong observed within the
/// configured interval).
pub const METRICS_HEARTBEAT_FAILURE: &str = "session_core.heartbeat.failure";
/// Counter: request outcomes, labeled `result` =
/// `ok`|`timeout`|`rate_limited`|`connection_lost`|`rpc_error`.
pub const METRICS_REQUEST_OUTCOME: &str = "session_core.request.outcome";

/// Describes all metrics used by this crate via the `metrics` crate's
/// `describe_*` functions. Call once at startup, after an exporter/recorder
/// has been installed.
pub fn describe_metrics() {
    metrics::describe_counter!(
        METRICS_CONNECT_FAILED,
        metrics::Unit::Count,
        "Number of connection attempts that failed before completing the handshake"
    );

    metrics::describe_counter!(
        METRICS_CONNECTED,
        metrics::Unit::Count,
        "Number of times a session reached the Ready state"
    );

    metrics::describe_counter!(
        METRICS_RATE_LIMITER_ADMITTED,
        metrics::Unit::Count,
        "Number of requests admitted immediately by the rate limiter"
    );

    metrics::describe_counter!(
        METRICS_RATE_LIMITER_QUEUED,
        metrics::Unit::Count,
        "Number of requests queued by the rate limiter pending tokens"
    );

    metrics::describe_counter!(
        METRICS_RATE_LIMITER_REJECTED,
        metrics::Unit::Count,
        "Number of requests rejected by the rate limiter because the queue was full"
    );

    metrics::describe_counter!(
        METRICS_RECONNECT_ATTEMPT,
        metrics::Unit::Count,
        "Number of reconnection attempts made by an engine's own backoff loop"
    );

    metrics::describe_counter!(
        METRICS_HEARTBEAT_FAILURE,
        metrics::Unit::Count,
        "Number of missed ping_pong heartbeats"
    );

    metrics::describe_counter!(
        METRICS_REQUEST_OUTCOME,
        metrics::Unit::Count,
        "Request outcomes labeled by result: ok, timeout, rate_limited, connection_lost, rpc_error"
    );
}
