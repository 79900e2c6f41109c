//! Session monitor.
//!
//! Polls the active-session list on a fixed interval and issues per-session
//! disconnects. Polls are independent and may overlap; a failed poll keeps
//! the last successful list in place.

use crate::client::HubClient;
use crate::error::{ApiError, ApiResult};
use crate::synchronizer::LoadingGuard;
use chrono::{DateTime, Utc};
use fixhub_core::{ActionOutcome, Confirm, Session};
use fixhub_telemetry::Metrics;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const KIND: &str = "sessions";

/// Shortest automatic poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Session monitor timing.
#[derive(Debug, Clone)]
pub struct SessionMonitorConfig {
    /// Interval between automatic polls.
    pub poll_interval: Duration,
    /// Delay before the follow-up poll after a disconnect.
    pub follow_up_delay: Duration,
}

impl Default for SessionMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            follow_up_delay: Duration::from_millis(500),
        }
    }
}

/// Live view of the hub's active sessions.
pub struct SessionMonitor {
    client: HubClient,
    config: SessionMonitorConfig,
    sessions: RwLock<Vec<Session>>,
    /// Identities with a disconnect request in flight.
    disconnecting: Mutex<HashSet<String>>,
    last_error: RwLock<Option<String>>,
    last_update: RwLock<Option<DateTime<Utc>>>,
    loading: AtomicUsize,
    shutdown: CancellationToken,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// Removes an identity from the in-flight set on drop.
struct DisconnectGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    identity: String,
}

impl Drop for DisconnectGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.identity);
    }
}

impl SessionMonitor {
    pub fn new(client: HubClient, config: SessionMonitorConfig) -> Self {
        Self {
            client,
            config,
            sessions: RwLock::new(Vec::new()),
            disconnecting: Mutex::new(HashSet::new()),
            last_error: RwLock::new(None),
            last_update: RwLock::new(None),
            loading: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            poller: Mutex::new(None),
        }
    }

    /// Start the polling timer. The first poll runs immediately.
    ///
    /// Calling this again while the timer runs, or after [`stop`](Self::stop),
    /// does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut poller = self.poller.lock();
        if poller.is_some() || self.is_stopped() {
            return;
        }

        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let period = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        if period != self.config.poll_interval {
            warn!(
                configured_ms = self.config.poll_interval.as_millis() as u64,
                "Poll interval below minimum, using {}ms",
                MIN_POLL_INTERVAL.as_millis()
            );
        }

        info!(interval_ms = period.as_millis() as u64, "Session polling started");
        *poller = Some(tokio::spawn(poll_loop(weak, shutdown, period)));
    }

    /// Cancel the polling timer and discard responses still in flight.
    /// Idempotent.
    pub fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
        }
        info!("Session polling stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.read().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire) > 0
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Time of the last successful poll.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read()
    }

    pub fn is_disconnecting(&self, identity: &str) -> bool {
        self.disconnecting.lock().contains(identity)
    }

    /// Fetch the session list once.
    pub async fn poll(&self) -> ApiResult<Vec<Session>> {
        self.ensure_live()?;
        let _loading = LoadingGuard::new(&self.loading);
        let result = self
            .client
            .get_json::<Option<Vec<Session>>>(&["api", KIND])
            .await
            .map(Option::unwrap_or_default);

        self.ensure_live()?;

        match result {
            Ok(sessions) => {
                debug!(count = sessions.len(), "Sessions polled");
                Metrics::fetch(KIND, true);
                *self.sessions.write() = sessions.clone();
                *self.last_update.write() = Some(Utc::now());
                *self.last_error.write() = None;
                Ok(sessions)
            }
            Err(e) => {
                warn!(error = %e, "Session poll failed, keeping previous list");
                Metrics::fetch(KIND, false);
                *self.last_error.write() = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Disconnect one session once the operator confirms.
    ///
    /// Only the addressed session is blocked while the request is in
    /// flight. Whatever the outcome, one follow-up poll is scheduled after
    /// the configured delay.
    pub async fn disconnect(
        self: &Arc<Self>,
        identity: &str,
        confirm: &dyn Confirm,
    ) -> ApiResult<ActionOutcome> {
        self.ensure_live()?;
        if self.is_disconnecting(identity) {
            return Err(ApiError::DisconnectInFlight(identity.to_string()));
        }

        if !confirm.confirm(&format!("Disconnect session {identity}?")) {
            debug!(%identity, "Disconnect declined");
            return Ok(ActionOutcome::Declined);
        }

        let _guard = {
            let mut set = self.disconnecting.lock();
            if !set.insert(identity.to_string()) {
                return Err(ApiError::DisconnectInFlight(identity.to_string()));
            }
            DisconnectGuard {
                set: &self.disconnecting,
                identity: identity.to_string(),
            }
        };

        info!(%identity, "Disconnecting session");
        let result = self
            .client
            .post_empty(&["api", KIND, identity, "disconnect"])
            .await
            .map_err(ApiError::into_mutation);

        self.schedule_follow_up();
        self.ensure_live()?;

        match result {
            Ok(ack) => {
                debug!(%identity, %ack, "Disconnect acknowledged");
                Metrics::mutation(KIND, "disconnect", true);
                Ok(ActionOutcome::Completed)
            }
            Err(e) => {
                warn!(%identity, error = %e, "Disconnect failed");
                Metrics::mutation(KIND, "disconnect", false);
                *self.last_error.write() = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn schedule_follow_up(self: &Arc<Self>) {
        if self.is_stopped() {
            return;
        }
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let delay = self.config.follow_up_delay;

        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(monitor) = weak.upgrade() {
                        let _ = monitor.poll().await;
                    }
                }
            }
        });
    }

    fn ensure_live(&self) -> ApiResult<()> {
        if self.is_stopped() {
            return Err(ApiError::TornDown);
        }
        Ok(())
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(monitor: Weak<SessionMonitor>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(monitor) = monitor.upgrade() else { break };
                // Failures are recorded on the monitor
                let _ = monitor.poll().await;
            }
        }
    }
    debug!("Session poll loop exited");
}
