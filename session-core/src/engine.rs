//! The Session Engine: the single task that owns a WebSocket connection
//! end to end.
//!
//! Exactly one task ever calls `ws.next()` for a given connection — every
//! other component (callers, the rate limiter, the request tracker) reaches
//! the transport only by sending a command through [`EngineHandle`]. This
//! mirrors the single-`select!`-loop shape of a state-machine event loop
//! rather than splitting reader/writer/heartbeat across separate tasks,
//! so reconnection never has to reconcile state written by two tasks at
//! once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBuilder};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::SinkExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::adapter::{Adapter, ClassifiedIncoming};
use crate::config::{HeartbeatConfig, SessionConfig};
use crate::frame::{self, Frame};
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest};
use crate::rate_limiter::{Admission, RateLimiter};
use crate::request_tracker::{RequestOutcome, RequestTracker};
use crate::transport::{self, WsStream};
use crate::Error;

/// Lifecycle state of a single engine instance, observable via
/// [`EngineHandle::state`] or [`EngineHandle::watch_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Establishing the TCP/TLS/WebSocket handshake.
    Connecting,
    /// Handshake complete, waiting on the adapter's authentication exchange.
    Authenticating,
    /// Authenticated and subscribed; normal operation.
    Ready,
    /// The transport was lost and a new connection attempt is in flight.
    Reconnecting,
    /// A caller-initiated shutdown is in progress.
    Closing,
    /// Terminal. No further state transitions occur.
    Closed,
}

/// Snapshot of `ping_pong` heartbeat health, exposed for observability.
///
/// Only meaningful under [`HeartbeatConfig::PingPong`]; other heartbeat
/// variants report the default, all-`None`/zero value.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatHealth {
    /// When the engine last sent a Ping.
    pub last_sent: Option<Instant>,
    /// When the engine last received a Ping or Pong from the peer.
    pub last_recv: Option<Instant>,
    /// Consecutive ticks with no Pong seen since the last Ping. Reaching 2
    /// forces a reconnect.
    pub failures: u32,
}

/// What an inbound frame implied about connection liveness, beyond whatever
/// routing [`handle_inbound`] already performed.
enum InboundSignal {
    /// No liveness signal.
    None,
    /// A platform-initiated heartbeat probe was answered.
    PlatformHeartbeat,
    /// A WebSocket-level Ping or Pong was observed.
    Heartbeat,
}

enum EngineCommand {
    Call {
        method: String,
        params: Option<Value>,
        reply: oneshot::Sender<Result<RequestOutcome, Error>>,
    },
    Subscribe {
        channels: Vec<String>,
        reply: oneshot::Sender<Result<RequestOutcome, Error>>,
    },
    Unsubscribe {
        channels: Vec<String>,
        reply: oneshot::Sender<Result<RequestOutcome, Error>>,
    },
    Shutdown,
}

/// Cloneable caller-facing reference to a running engine.
///
/// Cheap to clone (an `mpsc::Sender` and a `watch::Receiver`); every clone
/// talks to the same underlying task.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    heartbeat_rx: watch::Receiver<HeartbeatHealth>,
}

impl EngineHandle {
    /// Issues a JSON-RPC call and awaits its correlated response.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<RequestOutcome, Error> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::Call {
                method: method.into(),
                params,
                reply,
            })
            .await
            .map_err(|_| Error::ConnectionLost)?;
        rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Subscribes to the given channels.
    pub async fn subscribe(&self, channels: Vec<String>) -> Result<RequestOutcome, Error> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::Subscribe { channels, reply })
            .await
            .map_err(|_| Error::ConnectionLost)?;
        rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Unsubscribes from the given channels.
    pub async fn unsubscribe(&self, channels: Vec<String>) -> Result<RequestOutcome, Error> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::Unsubscribe { channels, reply })
            .await
            .map_err(|_| Error::ConnectionLost)?;
        rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Requests a graceful shutdown. Best-effort: if the engine task has
    /// already exited this is a silent no-op.
    pub fn shutdown(&self) {
        let _ = self.command_tx.try_send(EngineCommand::Shutdown);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A watch receiver for observing state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Current `ping_pong` heartbeat health snapshot.
    pub fn heartbeat_health(&self) -> HeartbeatHealth {
        *self.heartbeat_rx.borrow()
    }
}

/// Spawns the engine task and returns a handle plus a join handle the
/// supervisor uses to detect terminal failure (e.g. retries exhausted).
pub fn spawn(
    config: SessionConfig,
    adapter: Arc<dyn Adapter>,
    notifications: mpsc::UnboundedSender<JsonRpcNotification>,
) -> (EngineHandle, tokio::task::JoinHandle<Result<(), Error>>) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let (heartbeat_tx, heartbeat_rx) = watch::channel(HeartbeatHealth::default());

    let join = tokio::spawn(run(
        config,
        adapter,
        notifications,
        command_rx,
        state_tx,
        heartbeat_tx,
    ));

    (
        EngineHandle {
            command_tx,
            state_rx,
            heartbeat_rx,
        },
        join,
    )
}

enum ConnectedExit {
    Shutdown,
    Reconnect(Error),
}

type AdmissionFuture = Pin<Box<dyn Future<Output = Option<JsonRpcRequest>> + Send>>;
type ReplyFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

#[tracing::instrument(level = "info", skip_all, fields(url = %config.url))]
async fn run(
    config: SessionConfig,
    adapter: Arc<dyn Adapter>,
    notifications: mpsc::UnboundedSender<JsonRpcNotification>,
    mut command_rx: mpsc::Receiver<EngineCommand>,
    state_tx: watch::Sender<ConnectionState>,
    heartbeat_tx: watch::Sender<HeartbeatHealth>,
) -> Result<(), Error> {
    let mut backoff = reconnect_backoff(&config);

    loop {
        let _ = state_tx.send(ConnectionState::Connecting);
        let ws = match transport::connect(&config.url).await {
            Ok(ws) => ws,
            Err(err) => {
                metrics::counter!(crate::metrics::METRICS_CONNECT_FAILED).increment(1);
                if !config.reconnect_on_error {
                    let _ = state_tx.send(ConnectionState::Closed);
                    return Err(err);
                }
                match backoff.next() {
                    Some(delay) => {
                        tracing::warn!(error = %err, delay_ms = %delay.as_millis(), "connect failed, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    None => {
                        let _ = state_tx.send(ConnectionState::Closed);
                        return Err(Error::MaxRetriesExceeded);
                    }
                }
            }
        };
        backoff = reconnect_backoff(&config);

        match run_connected(
            &config,
            &adapter,
            &notifications,
            &mut command_rx,
            &state_tx,
            &heartbeat_tx,
            ws,
        )
        .await
        {
            Ok(ConnectedExit::Shutdown) => {
                let _ = state_tx.send(ConnectionState::Closed);
                return Ok(());
            }
            Ok(ConnectedExit::Reconnect(err)) => {
                if !config.reconnect_on_error {
                    let _ = state_tx.send(ConnectionState::Closed);
                    return Err(err);
                }
                metrics::counter!(crate::metrics::METRICS_RECONNECT_ATTEMPT).increment(1);
                let _ = state_tx.send(ConnectionState::Reconnecting);
                continue;
            }
            Err(err) => {
                let _ = state_tx.send(ConnectionState::Closed);
                return Err(err);
            }
        }
    }
}

fn reconnect_backoff(config: &SessionConfig) -> impl Iterator<Item = Duration> {
    ExponentialBuilder::default()
        .with_min_delay(config.backoff_initial)
        .with_max_delay(config.backoff_max)
        .with_max_times(config.retry_count as usize)
        .build()
}

/// Drives the authentication handshake, subscription, and steady-state
/// `select!` loop for a single live connection. Returns once the
/// connection should be torn down, either for a caller-initiated shutdown
/// or because it needs to be rebuilt.
async fn run_connected(
    config: &SessionConfig,
    adapter: &Arc<dyn Adapter>,
    notifications: &mpsc::UnboundedSender<JsonRpcNotification>,
    command_rx: &mut mpsc::Receiver<EngineCommand>,
    state_tx: &watch::Sender<ConnectionState>,
    heartbeat_tx: &watch::Sender<HeartbeatHealth>,
    mut ws: WsStream,
) -> Result<ConnectedExit, Error> {
    let tracker = RequestTracker::new();
    let mut limiter = RateLimiter::new(
        config.rate_limit.capacity,
        config.rate_limit.refill_rate,
        config.rate_limit.refill_interval,
        config.rate_limit.queue_max,
        Box::new(|_method: &str| 1),
    );

    let _ = state_tx.send(ConnectionState::Authenticating);
    if let Err(err) = authenticate(config, adapter, &tracker, notifications, &mut ws).await {
        tracing::warn!(error = %err, "authentication failed, reconnecting");
        tracker.drain();
        return Ok(ConnectedExit::Reconnect(err));
    }

    if !config.channels.is_empty() {
        let (id, rx) = tracker.register();
        let req = adapter.build_subscribe(id, &config.channels);
        if let Err(err) = send_request(&mut ws, &req).await {
            tracker.drain();
            return Ok(ConnectedExit::Reconnect(err));
        }
        if let Err(err) =
            wait_for_outcome(config.request_timeout, rx, &tracker, adapter, notifications, &mut ws)
                .await
        {
            tracker.drain();
            return Ok(ConnectedExit::Reconnect(err));
        }
    }

    let _ = state_tx.send(ConnectionState::Ready);
    metrics::counter!(crate::metrics::METRICS_CONNECTED).increment(1);

    let mut ping_interval = match &config.heartbeat {
        HeartbeatConfig::PingPong { interval } => Some(tokio::time::interval(*interval)),
        _ => None,
    };
    let mut stale_deadline = match &config.heartbeat {
        HeartbeatConfig::PlatformTestRequest { interval } => {
            Some(Box::pin(tokio::time::sleep(*interval)))
        }
        _ => None,
    };
    let mut refill_interval = tokio::time::interval(config.rate_limit.refill_interval);
    let mut heartbeat = HeartbeatHealth::default();

    let mut pending_admissions: FuturesUnordered<AdmissionFuture> = FuturesUnordered::new();
    let mut awaiting_replies: FuturesUnordered<ReplyFuture<'_>> = FuturesUnordered::new();

    loop {
        tokio::select! {
            biased;

            Some(cmd) = command_rx.recv() => {
                if matches!(cmd, EngineCommand::Shutdown) {
                    let _ = state_tx.send(ConnectionState::Closing);
                    let _ = ws.send(frame::close(1000, "client shutdown").into_message()).await;
                    tracker.drain();
                    return Ok(ConnectedExit::Shutdown);
                }
                dispatch_command(
                    cmd,
                    adapter,
                    &mut limiter,
                    &tracker,
                    &mut ws,
                    config.request_timeout,
                    &mut pending_admissions,
                    &mut awaiting_replies,
                ).await;
            }

            Some(request) = pending_admissions.next() => {
                if let Some(request) = request {
                    if let Err(err) = send_request(&mut ws, &request).await {
                        tracker.drain();
                        return Ok(ConnectedExit::Reconnect(err));
                    }
                }
            }

            Some(()) = awaiting_replies.next() => {}

            msg = ws.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        match handle_inbound(msg, adapter, &tracker, notifications, &mut ws).await {
                            Ok(InboundSignal::PlatformHeartbeat) => {
                                if let Some(deadline) = stale_deadline.as_mut() {
                                    deadline.as_mut().reset(tokio::time::Instant::now() + heartbeat_interval(config));
                                }
                            }
                            Ok(InboundSignal::Heartbeat) => {
                                heartbeat.last_recv = Some(Instant::now());
                                let _ = heartbeat_tx.send(heartbeat);
                            }
                            Ok(InboundSignal::None) => {}
                            Err(err) => {
                                tracing::warn!(error = %err, "inbound frame handling failed, reconnecting");
                                tracker.drain();
                                return Ok(ConnectedExit::Reconnect(err));
                            }
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "transport error, reconnecting");
                        tracker.drain();
                        return Ok(ConnectedExit::Reconnect(Error::from(err)));
                    }
                    None => {
                        tracing::warn!("transport closed, reconnecting");
                        tracker.drain();
                        return Ok(ConnectedExit::Reconnect(Error::ConnectionLost));
                    }
                }
            }

            _ = refill_interval.tick() => {
                limiter.on_tick();
            }

            _ = tick_or_pending(&mut ping_interval) => {
                if heartbeat.last_sent.is_some() && heartbeat.last_recv < heartbeat.last_sent {
                    heartbeat.failures += 1;
                    metrics::counter!(crate::metrics::METRICS_HEARTBEAT_FAILURE).increment(1);
                    if heartbeat.failures >= 2 {
                        tracing::warn!("two consecutive heartbeat failures, reconnecting");
                        tracker.drain();
                        return Ok(ConnectedExit::Reconnect(Error::ConnectionLost));
                    }
                } else {
                    heartbeat.failures = 0;
                }
                if let Err(err) = ws.send(Frame::Ping(Vec::new()).into_message()).await {
                    tracker.drain();
                    return Ok(ConnectedExit::Reconnect(Error::from(err)));
                }
                heartbeat.last_sent = Some(Instant::now());
                let _ = heartbeat_tx.send(heartbeat);
            }

            _ = sleep_or_pending(&mut stale_deadline) => {
                tracing::warn!("platform heartbeat deadline exceeded, reconnecting");
                tracker.drain();
                return Ok(ConnectedExit::Reconnect(Error::ConnectionLost));
            }
        }
    }
}

fn heartbeat_interval(config: &SessionConfig) -> Duration {
    match &config.heartbeat {
        HeartbeatConfig::PlatformTestRequest { interval } => *interval,
        _ => Duration::from_secs(30),
    }
}

async fn tick_or_pending(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_or_pending(sleep: &mut Option<Pin<Box<tokio::time::Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn authenticate(
    config: &SessionConfig,
    adapter: &Arc<dyn Adapter>,
    tracker: &RequestTracker,
    notifications: &mpsc::UnboundedSender<JsonRpcNotification>,
    ws: &mut WsStream,
) -> Result<(), Error> {
    let (id, rx) = tracker.register();
    let req = adapter.build_auth_request(id, &config.credentials);
    send_request(ws, &req).await?;
    let outcome =
        wait_for_outcome(config.request_timeout, rx, tracker, adapter, notifications, ws).await?;
    adapter
        .on_auth_response(&outcome)
        .map_err(Error::AuthFailed)
}

/// Drives the transport until `rx` resolves (the awaited request's
/// response arrives) or a fatal error occurs. Used for the handshake
/// phases, where no other command traffic is expected yet.
async fn wait_for_outcome(
    timeout: Duration,
    mut rx: oneshot::Receiver<RequestOutcome>,
    tracker: &RequestTracker,
    adapter: &Arc<dyn Adapter>,
    notifications: &mpsc::UnboundedSender<JsonRpcNotification>,
    ws: &mut WsStream,
) -> Result<RequestOutcome, Error> {
    let fut = async {
        loop {
            tokio::select! {
                biased;
                outcome = &mut rx => {
                    return outcome.map_err(|_| Error::ConnectionLost);
                }
                msg = ws.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            handle_inbound(msg, adapter, tracker, notifications, ws).await?;
                        }
                        Some(Err(err)) => return Err(Error::from(err)),
                        None => return Err(Error::ConnectionLost),
                    }
                }
            }
        }
    };
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout)?
}

async fn dispatch_command<'a>(
    cmd: EngineCommand,
    adapter: &Arc<dyn Adapter>,
    limiter: &mut RateLimiter,
    tracker: &'a RequestTracker,
    ws: &mut WsStream,
    request_timeout: Duration,
    pending_admissions: &mut FuturesUnordered<AdmissionFuture>,
    awaiting_replies: &mut FuturesUnordered<ReplyFuture<'a>>,
) {
    let (request, reply) = match cmd {
        EngineCommand::Call {
            method,
            params,
            reply,
        } => {
            let (id, rx) = tracker.register();
            (JsonRpcRequest::new(id, method, params), (rx, reply))
        }
        EngineCommand::Subscribe { channels, reply } => {
            let (id, rx) = tracker.register();
            (adapter.build_subscribe(id, &channels), (rx, reply))
        }
        EngineCommand::Unsubscribe { channels, reply } => {
            let (id, rx) = tracker.register();
            (adapter.build_unsubscribe(id, &channels), (rx, reply))
        }
        EngineCommand::Shutdown => unreachable!("handled by caller before dispatch"),
    };
    let (response_rx, reply_tx) = reply;
    let id = request.id;

    let cost = limiter.cost_of(&request.method);
    match limiter.try_consume(cost) {
        Admission::Admitted => {
            if let Err(err) = send_request(ws, &request).await {
                tracker.expire(id);
                let _ = reply_tx.send(Err(err));
                return;
            }
        }
        Admission::Queued { ready, .. } => {
            pending_admissions.push(Box::pin(async move {
                match ready.await {
                    Ok(()) => Some(request),
                    Err(_) => None,
                }
            }));
        }
        Admission::Rejected => {
            tracker.expire(id);
            metrics::counter!(crate::metrics::METRICS_REQUEST_OUTCOME, "result" => "rate_limited")
                .increment(1);
            let _ = reply_tx.send(Err(Error::RateLimited));
            return;
        }
    }

    awaiting_replies.push(Box::pin(async move {
        let outcome = tokio::time::timeout(request_timeout, response_rx).await;
        let result = match outcome {
            Ok(Ok(outcome)) => {
                let label = match &outcome {
                    RequestOutcome::Success(_) => "ok",
                    RequestOutcome::Error { .. } => "rpc_error",
                };
                metrics::counter!(crate::metrics::METRICS_REQUEST_OUTCOME, "result" => label)
                    .increment(1);
                Ok(outcome)
            }
            Ok(Err(_)) => {
                tracker.expire(id);
                metrics::counter!(crate::metrics::METRICS_REQUEST_OUTCOME, "result" => "connection_lost")
                    .increment(1);
                Err(Error::ConnectionLost)
            }
            Err(_) => {
                tracker.expire(id);
                metrics::counter!(crate::metrics::METRICS_REQUEST_OUTCOME, "result" => "timeout")
                    .increment(1);
                Err(Error::Timeout)
            }
        };
        let _ = reply_tx.send(result);
    }));
}

/// Classifies and routes a single inbound message, returning whatever
/// liveness signal it implied.
async fn handle_inbound(
    msg: tokio_tungstenite::tungstenite::Message,
    adapter: &Arc<dyn Adapter>,
    tracker: &RequestTracker,
    notifications: &mpsc::UnboundedSender<JsonRpcNotification>,
    ws: &mut WsStream,
) -> Result<InboundSignal, Error> {
    let frame = Frame::classify(msg)?;

    if frame.is_control() {
        match frame {
            Frame::Ping(payload) => {
                ws.send(Frame::Pong(payload).into_message()).await?;
                return Ok(InboundSignal::Heartbeat);
            }
            Frame::Pong(_) => {
                return Ok(InboundSignal::Heartbeat);
            }
            Frame::Close(reason) => {
                tracing::info!(?reason, "peer closed connection");
                return Err(Error::ConnectionLost);
            }
            _ => {}
        }
        return Ok(InboundSignal::None);
    }

    match adapter.classify_incoming(&frame) {
        ClassifiedIncoming::Response(resp) => {
            tracker.complete(resp.id, RequestOutcome::from(resp));
            Ok(InboundSignal::None)
        }
        ClassifiedIncoming::Notification(note) => {
            let _ = notifications.send(note);
            Ok(InboundSignal::None)
        }
        ClassifiedIncoming::Heartbeat(reply) => {
            send_request(ws, &reply).await?;
            Ok(InboundSignal::PlatformHeartbeat)
        }
        ClassifiedIncoming::Unrecognized => {
            tracing::debug!(?frame, "unrecognized inbound frame");
            Ok(InboundSignal::None)
        }
    }
}

async fn send_request(ws: &mut WsStream, req: &JsonRpcRequest) -> Result<(), Error> {
    let text = serde_json::to_string(req).map_err(|_| Error::MalformedFrame)?;
    ws.send(Frame::Text(text).into_message())
        .await
        .map_err(Error::from)
}
