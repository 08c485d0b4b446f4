//! The Supervisor owns a session's identity across reconnections.
//!
//! Where [`crate::engine`] handles transient transport failures with its own
//! bounded backoff loop ("standalone reconnection"), the Supervisor handles
//! the case where an engine task exits entirely — retries exhausted, or a
//! panic — by spawning a brand new engine with a fresh retry budget and
//! swapping it into the [`crate::registry::SessionRegistry`] under the same
//! `session_id` ("supervised reconnection"). The caller's [`SessionHandle`]
//! never changes.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::adapter::Adapter;
use crate::config::SessionConfig;
use crate::engine::{self, ConnectionState, HeartbeatHealth};
use crate::jsonrpc::JsonRpcNotification;
use crate::registry::SessionRegistry;
use crate::request_tracker::RequestOutcome;
use crate::Error;

/// Entry point for opening and managing sessions.
///
/// A single `Supervisor` can own many concurrent sessions; each [`open`]
/// call registers its engine under a freshly generated `session_id` in a
/// shared [`SessionRegistry`].
///
/// [`open`]: Supervisor::open
#[derive(Clone, Default)]
pub struct Supervisor {
    registry: SessionRegistry,
}

impl Supervisor {
    /// Builds a supervisor with an empty session registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session: spawns its engine, registers it, and starts
    /// supervising it for the lifetime of the returned handle.
    pub fn open(&self, config: SessionConfig, adapter: Arc<dyn Adapter>) -> SessionHandle {
        let session_id = Uuid::new_v4();
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        // A supervised engine never runs its own backoff loop: the supervisor
        // below is the only thing that rebuilds it, regardless of what the
        // caller set.
        let config = SessionConfig {
            reconnect_on_error: false,
            ..config
        };

        let (handle, join) = engine::spawn(config.clone(), adapter.clone(), notification_tx.clone());
        let guard = self.registry.register(session_id, handle);

        tokio::spawn(supervise(
            session_id,
            config,
            adapter,
            notification_tx,
            join,
            self.registry.clone(),
            guard,
        ));

        SessionHandle {
            session_id,
            registry: self.registry.clone(),
            notifications: Mutex::new(notification_rx),
        }
    }

    /// Closes a session by `session_id`, if still registered.
    pub fn close(&self, session_id: Uuid) {
        if let Some(handle) = self.registry.lookup(session_id) {
            handle.shutdown();
        }
        self.registry.deregister(session_id);
    }

    /// Number of currently open sessions.
    pub fn open_session_count(&self) -> usize {
        self.registry.len()
    }
}

async fn supervise(
    session_id: Uuid,
    config: SessionConfig,
    adapter: Arc<dyn Adapter>,
    notifications: mpsc::UnboundedSender<JsonRpcNotification>,
    mut join: tokio::task::JoinHandle<Result<(), Error>>,
    registry: SessionRegistry,
    guard: crate::registry::RegistrationGuard,
) {
    loop {
        let outcome = (&mut join).await;
        match outcome {
            Ok(Ok(())) => {
                tracing::debug!(%session_id, "engine shut down cleanly");
                break;
            }
            other => {
                tracing::warn!(%session_id, outcome = ?other, "engine task ended, rebuilding session");
                let (new_handle, new_join) =
                    engine::spawn(config.clone(), adapter.clone(), notifications.clone());
                if !registry.update(session_id, new_handle) {
                    tracing::debug!(%session_id, "session closed during rebuild, stopping supervision");
                    break;
                }
                join = new_join;
            }
        }
    }
    drop(guard);
}

/// Caller-facing, cloneable-by-reference handle to one open session.
///
/// Methods look up the current engine in the registry on every call, so a
/// handle transparently follows a supervised reconnection without the
/// caller noticing anything beyond the request's latency.
pub struct SessionHandle {
    session_id: Uuid,
    registry: SessionRegistry,
    notifications: Mutex<mpsc::UnboundedReceiver<JsonRpcNotification>>,
}

impl SessionHandle {
    /// The stable identifier for this session across reconnections.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Current connection state, or [`Error::UnknownSession`] if the
    /// session was already closed.
    pub fn state(&self) -> Result<ConnectionState, Error> {
        self.engine().map(|e| e.state())
    }

    /// Current `ping_pong` heartbeat health, or [`Error::UnknownSession`] if
    /// the session was already closed.
    pub fn heartbeat_health(&self) -> Result<HeartbeatHealth, Error> {
        self.engine().map(|e| e.heartbeat_health())
    }

    /// Issues a JSON-RPC call and awaits its correlated response.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Result<RequestOutcome, Error> {
        let engine = self.ready_engine()?;
        engine.call(method, params).await
    }

    /// Subscribes to additional channels on the live connection.
    pub async fn subscribe(&self, channels: Vec<String>) -> Result<RequestOutcome, Error> {
        let engine = self.ready_engine()?;
        engine.subscribe(channels).await
    }

    /// Unsubscribes from channels on the live connection.
    pub async fn unsubscribe(&self, channels: Vec<String>) -> Result<RequestOutcome, Error> {
        let engine = self.ready_engine()?;
        engine.unsubscribe(channels).await
    }

    /// Awaits the next server-initiated notification.
    pub async fn next_notification(&self) -> Option<JsonRpcNotification> {
        self.notifications.lock().await.recv().await
    }

    /// Closes the session. Idempotent.
    pub fn close(&self) {
        if let Ok(engine) = self.engine() {
            engine.shutdown();
        }
        self.registry.deregister(self.session_id);
    }

    fn engine(&self) -> Result<engine::EngineHandle, Error> {
        self.registry
            .lookup(self.session_id)
            .ok_or(Error::UnknownSession(self.session_id))
    }

    fn ready_engine(&self) -> Result<engine::EngineHandle, Error> {
        let engine = self.engine()?;
        if engine.state() != ConnectionState::Ready {
            return Err(Error::NotConnected);
        }
        Ok(engine)
    }
}
