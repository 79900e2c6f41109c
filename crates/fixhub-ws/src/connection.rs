//! Event stream consumer.
//!
//! Maintains the push connection to the hub's event feed, decodes frames
//! into the bounded buffer and tracks liveness. When a reconnect policy is
//! enabled, a dropped connection is re-established with exponential backoff
//! inside the consumer task and the buffer is kept.

use crate::buffer::{EventBuffer, DEFAULT_CAPACITY};
use crate::error::{StreamError, StreamResult};
use crate::heartbeat::Heartbeat;
use crate::message::decode_frame;
use fixhub_core::{Credential, StreamEvent};
use fixhub_telemetry::Metrics;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reconnection behaviour after the push connection drops.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// When false, a closed connection stays closed until restarted.
    pub enabled: bool,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Maximum consecutive failed attempts (0 = infinite).
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Backoff before attempt `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`, plus up to 250ms of jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        delay + Duration::from_millis(jitter_ms())
    }
}

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Event feed URL, e.g. `ws://127.0.0.1:8080/ws/messages`.
    pub url: String,
    /// Number of events retained.
    pub capacity: usize,
    /// Quiet period before a ping is sent.
    pub heartbeat_interval: Duration,
    /// How long to wait for the pong.
    pub heartbeat_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            capacity: DEFAULT_CAPACITY,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Push connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Open,
    Closed,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame counters since the consumer was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub decoded: u64,
    pub dropped: u64,
    pub reconnects: u64,
}

/// Consumer of the hub's event feed.
pub struct EventStreamConsumer {
    config: StreamConfig,
    credential: Option<Credential>,
    state: RwLock<StreamState>,
    buffer: RwLock<EventBuffer>,
    heartbeat: Heartbeat,
    events_tx: broadcast::Sender<StreamEvent>,
    /// Token of the most recent `start()`.
    current: Mutex<Option<CancellationToken>>,
    decoded: AtomicU64,
    dropped: AtomicU64,
    reconnects: AtomicU64,
}

/// Handle returned by [`EventStreamConsumer::start`].
pub struct StreamHandle {
    consumer: Arc<EventStreamConsumer>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Close the push connection. Idempotent, and safe before the
    /// connection ever opened.
    pub fn stop(&self) {
        if self.token.is_cancelled() {
            return;
        }
        info!("Event stream stop requested");
        self.token.cancel();
        self.consumer.release();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the consumer task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl EventStreamConsumer {
    pub fn new(config: StreamConfig) -> Self {
        let (events_tx, _) = broadcast::channel(config.capacity.max(1));
        Self {
            heartbeat: Heartbeat::new(config.heartbeat_interval, config.heartbeat_timeout),
            buffer: RwLock::new(EventBuffer::new(config.capacity)),
            state: RwLock::new(StreamState::Connecting),
            credential: None,
            events_tx,
            current: Mutex::new(None),
            decoded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            config,
        }
    }

    /// Present `credential` as a bearer header on the handshake.
    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> StreamState {
        *self.state.read()
    }

    /// Liveness flag: true only while the connection is open.
    pub fn is_connected(&self) -> bool {
        self.state() == StreamState::Open
    }

    /// Retained events, newest first.
    pub fn events(&self) -> Vec<StreamEvent> {
        self.buffer.read().snapshot()
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }

    /// Empty the buffer (operator action).
    pub fn clear(&self) {
        self.buffer.write().clear();
        debug!("Event buffer cleared");
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            decoded: self.decoded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Receive every decoded event as it arrives.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events_tx.subscribe()
    }

    /// Open the push connection.
    ///
    /// Every start begins with an empty buffer; a connection still running
    /// from a previous start is stopped.
    pub fn start(self: &Arc<Self>) -> StreamHandle {
        let token = CancellationToken::new();
        if let Some(previous) = self.current.lock().replace(token.clone()) {
            previous.cancel();
        }
        self.buffer.write().clear();
        self.set_state(&token, StreamState::Connecting);

        let consumer = Arc::clone(self);
        let task_token = token.clone();
        let task = tokio::spawn(async move { consumer.run(task_token).await });

        StreamHandle {
            consumer: Arc::clone(self),
            token,
            task,
        }
    }

    /// Mark the connection closed on behalf of a stopped handle, unless a
    /// newer `start()` has taken over.
    fn release(&self) {
        let mut current = self.current.lock();
        // Only the stopped handle's own token can be cancelled while current
        if current.as_ref().is_some_and(CancellationToken::is_cancelled) {
            *current = None;
            *self.state.write() = StreamState::Closed;
            Metrics::stream_state(StreamState::Closed.as_str());
        }
    }

    /// State writes from a cancelled task are ignored.
    fn set_state(&self, token: &CancellationToken, state: StreamState) {
        if token.is_cancelled() {
            return;
        }
        let mut current = self.state.write();
        if *current != state {
            debug!(from = %*current, to = %state, "Event stream state");
            *current = state;
            Metrics::stream_state(state.as_str());
        }
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let policy = self.config.reconnect.clone();
        let mut attempt = 0u32;

        loop {
            if token.is_cancelled() {
                break;
            }
            self.set_state(&token, StreamState::Connecting);

            match self.connect_once(&token).await {
                Ok(()) => info!("Event stream closed"),
                Err(e) => warn!(error = %e, "Event stream error"),
            }
            // Backoff restarts after any connection that got through
            if self.state() == StreamState::Open {
                attempt = 0;
            }
            self.set_state(&token, StreamState::Closed);

            if token.is_cancelled() || !policy.enabled {
                break;
            }

            attempt += 1;
            if policy.max_attempts > 0 && attempt > policy.max_attempts {
                error!(
                    "{}",
                    StreamError::ReconnectExhausted(policy.max_attempts)
                );
                break;
            }

            let delay = policy.delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting event stream");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = token.cancelled() => break,
            }

            self.reconnects.fetch_add(1, Ordering::Relaxed);
            Metrics::stream_reconnect();
        }
        debug!("Event stream task exited");
    }

    /// One connection lifetime, from handshake to close.
    async fn connect_once(&self, token: &CancellationToken) -> StreamResult<()> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::InvalidUrl(format!("{}: {e}", self.config.url)))?;
        if let Some(credential) = &self.credential {
            let value = HeaderValue::from_str(&credential.bearer())
                .map_err(|e| StreamError::InvalidUrl(format!("bearer header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        info!(url = %self.config.url, "Connecting to event stream");
        let connect = connect_async_tls_with_config(request, None, true, None);
        let (ws_stream, _response) = tokio::select! {
            result = connect => result?,
            () = token.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        self.set_state(token, StreamState::Open);
        self.heartbeat.reset();
        info!("Event stream open");

        loop {
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "Failed to send Close frame during stop");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    self.heartbeat.record_activity();
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text, token),
                        Some(Ok(Message::Binary(data))) => {
                            match std::str::from_utf8(&data) {
                                Ok(text) => self.handle_text(text, token),
                                Err(_) => self.drop_frame("binary frame is not UTF-8"),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => self.heartbeat.record_pong(),
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason): (u16, String) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            info!(code, %reason, "Event stream closed by hub");
                            return Err(StreamError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            warn!("Event stream ended");
                            return Ok(());
                        }
                    }
                }

                () = self.heartbeat.tick() => {
                    if self.heartbeat.is_timed_out() {
                        return Err(StreamError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_ping() {
                        write.send(Message::Ping(Vec::new())).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        match decode_frame(text) {
            Ok(event) => {
                self.decoded.fetch_add(1, Ordering::Relaxed);
                Metrics::stream_event();
                self.buffer.write().push(event.clone());
                // No subscribers is fine
                let _ = self.events_tx.send(event);
            }
            Err(e) => self.drop_frame(&e.to_string()),
        }
    }

    fn drop_frame(&self, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        Metrics::stream_dropped();
        warn!(%reason, "Dropped undecodable frame");
    }
}

/// Random jitter (0-250ms).
fn jitter_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos % 250)
}
