//! Session configuration.
//!
//! Deliberately not clap/env-parsed: an embedding application already has its
//! own configuration surface (CLI, env, file) and should build a
//! [`SessionConfig`] from whatever it already parsed. Secrets still go
//! through `secrecy` the way the teacher's config does.

use std::time::Duration;

use secrecy::SecretString;

use crate::Error;

/// Exchange credentials used to build the authentication request.
#[derive(Clone)]
pub struct Credentials {
    /// Public client/API-key identifier.
    pub client_id: String,
    /// Secret component, scrubbed from `Debug` output and memory on drop.
    pub client_secret: SecretString,
}

impl Credentials {
    /// Builds a credential pair.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
        }
    }
}

/// The heartbeat contract to enforce against the transport.
#[derive(Debug, Clone)]
pub enum HeartbeatConfig {
    /// No application-level heartbeat; rely on TCP keepalive only.
    None,
    /// Engine-initiated WebSocket ping/pong on a fixed interval.
    PingPong {
        /// Time between consecutive pings.
        interval: Duration,
    },
    /// Platform-initiated heartbeat (e.g. Deribit's `test_request`): the
    /// engine must answer a server-sent probe within `interval` or the
    /// connection is presumed dead.
    PlatformTestRequest {
        /// Maximum time to wait for the next probe before declaring the
        /// connection stale.
        interval: Duration,
    },
}

/// Token-bucket rate limiting parameters. See [`crate::rate_limiter`].
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens held at once.
    pub capacity: u32,
    /// Tokens added per `refill_interval`.
    pub refill_rate: u32,
    /// Refill cadence.
    pub refill_interval: Duration,
    /// Maximum number of queued (not yet admitted) requests before new
    /// admissions are rejected outright.
    pub queue_max: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_rate: 10,
            refill_interval: Duration::from_secs(1),
            queue_max: 100,
        }
    }
}

/// Immutable, fully-resolved session configuration.
///
/// Built exclusively through [`SessionConfigBuilder`] so required fields
/// (`url`, `credentials`) cannot be forgotten.
#[derive(Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `wss://www.deribit.com/ws/api/v2`.
    pub url: String,
    /// Credentials used for the post-connect authentication request.
    pub credentials: Credentials,
    /// Channels to (re-)subscribe to on every successful connection.
    pub channels: Vec<String>,
    /// Heartbeat contract to enforce.
    pub heartbeat: HeartbeatConfig,
    /// Rate limiting parameters.
    pub rate_limit: RateLimitConfig,
    /// How long to wait for a correlated response before failing a request
    /// with [`crate::Error::Timeout`].
    pub request_timeout: Duration,
    /// Whether the engine retries a transport failure itself.
    ///
    /// `true` (standalone mode): on transport loss the engine runs its own
    /// backoff loop and re-authenticates/re-subscribes, up to `retry_count`
    /// attempts, before giving up. `false` (supervised mode): the engine
    /// terminates immediately with the raw failure reason instead of
    /// retrying, so a [`crate::supervisor::Supervisor`] is the only thing
    /// that ever rebuilds the connection. [`crate::supervisor::Supervisor`]
    /// forces this to `false` on every engine it opens, so the two
    /// reconnection mechanisms never run against the same failure at once.
    pub reconnect_on_error: bool,
    /// Maximum consecutive reconnection attempts before the engine gives up
    /// with [`crate::Error::MaxRetriesExceeded`]. Only consulted when
    /// `reconnect_on_error` is `true`.
    pub retry_count: u32,
    /// Initial backoff delay between reconnection attempts.
    pub backoff_initial: Duration,
    /// Upper bound on the exponential backoff delay.
    pub backoff_max: Duration,
}

/// Builder for [`SessionConfig`].
#[derive(Default)]
pub struct SessionConfigBuilder {
    url: Option<String>,
    credentials: Option<Credentials>,
    channels: Vec<String>,
    heartbeat: Option<HeartbeatConfig>,
    rate_limit: Option<RateLimitConfig>,
    request_timeout: Option<Duration>,
    reconnect_on_error: Option<bool>,
    retry_count: Option<u32>,
    backoff_initial: Option<Duration>,
    backoff_max: Option<Duration>,
}

impl SessionConfigBuilder {
    /// Starts a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the WebSocket endpoint. Required.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the credentials used to authenticate after connecting. Required.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Adds a channel to subscribe to on connect.
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(channel.into());
        self
    }

    /// Replaces the full channel subscription list.
    pub fn channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    /// Sets the heartbeat contract. Defaults to [`HeartbeatConfig::None`].
    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Sets the rate limiting parameters. Defaults to
    /// [`RateLimitConfig::default`].
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Sets the per-request timeout. Defaults to 10 seconds.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets whether the engine reconnects on its own (`true`, standalone
    /// mode) or terminates on the first transport failure (`false`,
    /// supervised mode — see [`SessionConfig::reconnect_on_error`]).
    /// Defaults to `true`. A [`crate::supervisor::Supervisor`] overrides
    /// this to `false` regardless of what's set here.
    pub fn reconnect_on_error(mut self, reconnect_on_error: bool) -> Self {
        self.reconnect_on_error = Some(reconnect_on_error);
        self
    }

    /// Sets the maximum reconnection attempts. Defaults to 5.
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Sets the initial reconnection backoff. Defaults to 500ms.
    pub fn backoff_initial(mut self, backoff: Duration) -> Self {
        self.backoff_initial = Some(backoff);
        self
    }

    /// Sets the maximum reconnection backoff. Defaults to 30 seconds.
    pub fn backoff_max(mut self, backoff: Duration) -> Self {
        self.backoff_max = Some(backoff);
        self
    }

    /// Validates and builds the final [`SessionConfig`].
    ///
    /// Fails with [`Error::InvalidUri`] if `url` is missing or not a valid
    /// `ws://`/`wss://` URI.
    pub fn build(self) -> Result<SessionConfig, Error> {
        let url = self.url.ok_or(Error::MissingConfig("url"))?;
        // Validate eagerly so a misconfigured URL fails at build() time
        // rather than on the first connection attempt.
        let _: tokio_tungstenite::tungstenite::http::Uri = url.parse()?;
        let credentials = self.credentials.ok_or(Error::MissingConfig("credentials"))?;

        Ok(SessionConfig {
            url,
            credentials,
            channels: self.channels,
            heartbeat: self.heartbeat.unwrap_or(HeartbeatConfig::None),
            rate_limit: self.rate_limit.unwrap_or_default(),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(10)),
            reconnect_on_error: self.reconnect_on_error.unwrap_or(true),
            retry_count: self.retry_count.unwrap_or(5),
            backoff_initial: self.backoff_initial.unwrap_or(Duration::from_millis(500)),
            backoff_max: self.backoff_max.unwrap_or(Duration::from_secs(30)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_defaults_for_optional_fields() {
        let config = SessionConfigBuilder::new()
            .url("wss://www.deribit.com/ws/api/v2")
            .credentials(Credentials::new("id", "secret"))
            .build()
            .unwrap();
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.rate_limit.capacity, 20);
        assert!(config.reconnect_on_error);
        assert!(matches!(config.heartbeat, HeartbeatConfig::None));
    }

    #[test]
    fn builder_rejects_malformed_url() {
        let result = SessionConfigBuilder::new()
            .url("\0not a url")
            .credentials(Credentials::new("id", "secret"))
            .build();
        assert!(result.is_err());
    }
}
