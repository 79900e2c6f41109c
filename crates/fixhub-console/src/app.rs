//! Dashboard controller.
//!
//! Gates every component behind credential presence:
//! - Logged out: only login runs
//! - Active: one synchronizer per resource kind, the session monitor and
//!   the event stream run concurrently and independently
//!
//! Logout is the single teardown point. A 401 from any authorized call
//! forces it.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use fixhub_api::{
    ConnectionSynchronizer, CredentialHolder, FileCredentialStore, HubClient,
    ResourceSynchronizer, RouteSynchronizer, SessionMonitor,
};
use fixhub_core::{ActionOutcome, Confirm, Credential, Resource, Route};
use fixhub_ws::{EventStreamConsumer, StreamHandle, StreamState};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Top-level application phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LoggedOut,
    Active,
}

/// Components that exist only while a credential is held.
pub struct ActiveDashboard {
    pub connections: Arc<ConnectionSynchronizer>,
    pub routes: Arc<RouteSynchronizer>,
    pub sessions: Arc<SessionMonitor>,
    pub stream: Arc<EventStreamConsumer>,
    stream_handle: StreamHandle,
    /// Cancelled when this dashboard is torn down.
    ended: CancellationToken,
    auth_watch: JoinHandle<()>,
    initial_loads: Vec<JoinHandle<()>>,
}

impl ActiveDashboard {
    /// Resolves once this dashboard has been torn down.
    pub async fn ended(&self) {
        self.ended.cancelled().await;
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }

    fn teardown(&self) {
        self.ended.cancel();
        self.connections.teardown();
        self.routes.teardown();
        self.sessions.stop();
        self.stream_handle.stop();
        self.auth_watch.abort();
        for load in &self.initial_loads {
            load.abort();
        }
    }
}

/// Point-in-time view for the `watch` summary.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSummary {
    pub username: Option<String>,
    pub connections: usize,
    pub routes: usize,
    pub sessions: usize,
    pub events: usize,
    pub stream_state: StreamState,
    pub sessions_updated: Option<DateTime<Utc>>,
}

impl std::fmt::Display for DashboardSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let liveness = match self.stream_state {
            StreamState::Open => "waiting for messages",
            StreamState::Connecting => "connecting",
            StreamState::Closed => "disconnected",
        };
        write!(
            f,
            "connections={} routes={} sessions={} events={} stream={} last updated {}",
            self.connections,
            self.routes,
            self.sessions,
            self.events,
            liveness,
            self.last_updated()
        )
    }
}

impl DashboardSummary {
    /// Wall-clock time of the last session poll, or `never`.
    pub fn last_updated(&self) -> String {
        self.sessions_updated
            .map(|at| at.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string())
    }
}

/// Owns the credential gate and the lifetime of every component.
pub struct DashboardController {
    config: AppConfig,
    client: HubClient,
    active: RwLock<Option<Arc<ActiveDashboard>>>,
}

impl DashboardController {
    /// Create a controller persisting the credential to `config.credential_file`.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let store = FileCredentialStore::new(config.credential_file.clone());
        Self::with_credentials(config, CredentialHolder::new(Arc::new(store)))
    }

    pub fn with_credentials(config: AppConfig, credentials: CredentialHolder) -> AppResult<Self> {
        config.validate()?;
        let client = HubClient::new(&config.hub_url, config.request_timeout(), credentials)?;
        Ok(Self {
            config,
            client,
            active: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn client(&self) -> &HubClient {
        &self.client
    }

    pub fn phase(&self) -> Phase {
        if self.active.read().is_some() {
            Phase::Active
        } else {
            Phase::LoggedOut
        }
    }

    pub fn dashboard(&self) -> Option<Arc<ActiveDashboard>> {
        self.active.read().clone()
    }

    /// The active dashboard, or [`AppError::LoggedOut`].
    pub fn require_dashboard(&self) -> AppResult<Arc<ActiveDashboard>> {
        self.dashboard().ok_or(AppError::LoggedOut)
    }

    /// Log in and start every component. Components of a previous login are
    /// replaced.
    pub async fn login(self: &Arc<Self>, username: &str, password: &str) -> AppResult<Credential> {
        let credential = self.client.login(username, password).await?;
        self.teardown();
        self.activate()?;
        Ok(credential)
    }

    /// Start from a persisted credential, if one is held and still accepted.
    ///
    /// Returns whether the dashboard is active. A rejected credential is
    /// cleared; an unreachable hub does not clear it.
    pub async fn resume(self: &Arc<Self>) -> AppResult<bool> {
        if !self.client.credentials().is_present() {
            return Ok(false);
        }

        match self.client.validate_token().await {
            Ok(()) => {}
            Err(e) if e.is_auth() => {
                info!("Persisted credential rejected");
                self.client.credentials().logout();
                return Ok(false);
            }
            Err(e) => warn!(error = %e, "Could not validate persisted credential, continuing"),
        }

        self.activate()?;
        Ok(true)
    }

    /// Notify the hub, drop the credential and tear everything down.
    /// Idempotent.
    pub async fn logout(&self) {
        self.teardown();
        self.client.logout().await;
    }

    /// Stop every component but keep the credential (process exit).
    pub fn shutdown(&self) {
        self.teardown();
    }

    /// Counts and liveness of the active dashboard.
    pub fn summary(&self) -> Option<DashboardSummary> {
        let dashboard = self.dashboard()?;
        Some(DashboardSummary {
            username: self.client.credentials().username(),
            connections: dashboard.connections.len(),
            routes: dashboard.routes.len(),
            sessions: dashboard.sessions.snapshot().len(),
            events: dashboard.stream.len(),
            stream_state: dashboard.stream.state(),
            sessions_updated: dashboard.sessions.last_update(),
        })
    }

    /// Route at `index` in a freshly fetched list.
    pub async fn route_at(&self, index: usize) -> AppResult<Route> {
        let dashboard = self.require_dashboard()?;
        let routes = dashboard.routes.refresh().await?;
        routes.get(index).cloned().ok_or(AppError::NoSuchRoute(index))
    }

    /// Replace `expected` with `draft`, addressing it by its current index.
    pub async fn update_route(&self, expected: &Route, draft: &Route) -> AppResult<Route> {
        let dashboard = self.require_dashboard()?;
        let index = dashboard.routes.resolve_index(expected).await?;
        Ok(dashboard.routes.update(&index, draft).await?)
    }

    /// Delete `expected`, addressing it by its current index.
    pub async fn delete_route(
        &self,
        expected: &Route,
        confirm: &dyn Confirm,
    ) -> AppResult<ActionOutcome> {
        let dashboard = self.require_dashboard()?;
        let index = dashboard.routes.resolve_index(expected).await?;
        Ok(dashboard.routes.delete(&index, confirm).await?)
    }

    /// Log a summary every `telemetry.summary_interval_ms` until Ctrl-C or
    /// logout.
    pub async fn watch(&self) -> AppResult<()> {
        let dashboard = self.require_dashboard()?;
        let mut ticker = tokio::time::interval(self.config.summary_interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(summary) = self.summary() {
                        info!(
                            user = summary.username.as_deref().unwrap_or("-"),
                            connections = summary.connections,
                            routes = summary.routes,
                            sessions = summary.sessions,
                            events = summary.events,
                            stream = %summary.stream_state,
                            last_updated = %summary.last_updated(),
                            "Dashboard summary"
                        );
                        for error in [
                            dashboard.connections.last_error(),
                            dashboard.routes.last_error(),
                            dashboard.sessions.last_error(),
                        ]
                        .into_iter()
                        .flatten()
                        {
                            warn!(%error, "Component reports an error");
                        }
                    }
                }
                () = dashboard.ended() => {
                    warn!("Logged out, stopping watch");
                    return Err(AppError::LoggedOut);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    /// Build and start every component. No-op when already active.
    fn activate(self: &Arc<Self>) -> AppResult<()> {
        let mut active = self.active.write();
        if active.is_some() {
            return Ok(());
        }

        let stream_config = self.config.stream_config()?;
        let connections = Arc::new(ConnectionSynchronizer::new(self.client.clone()));
        let routes = Arc::new(RouteSynchronizer::new(self.client.clone()));
        let sessions = Arc::new(SessionMonitor::new(
            self.client.clone(),
            self.config.session_monitor_config(),
        ));
        let stream = Arc::new(
            EventStreamConsumer::new(stream_config)
                .with_credential(self.client.credentials().current()),
        );

        let ended = CancellationToken::new();
        let auth_watch = tokio::spawn(watch_auth(
            Arc::downgrade(self),
            self.client.auth_rejections(),
            ended.clone(),
        ));

        sessions.start();
        let stream_handle = stream.start();
        let initial_loads = vec![spawn_refresh(&connections), spawn_refresh(&routes)];

        info!(
            username = self.client.credentials().username().as_deref().unwrap_or("-"),
            "Dashboard active"
        );
        *active = Some(Arc::new(ActiveDashboard {
            connections,
            routes,
            sessions,
            stream,
            stream_handle,
            ended,
            auth_watch,
            initial_loads,
        }));
        Ok(())
    }

    /// Credential already rejected by the hub: drop it without notifying.
    ///
    /// Only a rejection of the credential held now counts; a late 401 for a
    /// credential that was since replaced is ignored. Returns whether the
    /// dashboard was torn down.
    fn force_logout(&self, generation: u64) -> bool {
        if !self.client.credentials().logout_if_current(generation) {
            return false;
        }
        warn!("Hub rejected the credential, logging out");
        self.teardown();
        true
    }

    fn teardown(&self) {
        let Some(dashboard) = self.active.write().take() else {
            debug!("Nothing to tear down");
            return;
        };
        dashboard.teardown();
        info!("Dashboard torn down");
    }
}

impl Drop for DashboardController {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Initial load; failures are kept on the synchronizer.
fn spawn_refresh<T: Resource>(synchronizer: &Arc<ResourceSynchronizer<T>>) -> JoinHandle<()> {
    let synchronizer = Arc::clone(synchronizer);
    tokio::spawn(async move {
        let _ = synchronizer.refresh().await;
    })
}

async fn watch_auth(
    controller: Weak<DashboardController>,
    mut rejections: watch::Receiver<Option<u64>>,
    ended: CancellationToken,
) {
    let _ = rejections.borrow_and_update();
    loop {
        tokio::select! {
            () = ended.cancelled() => return,
            changed = rejections.changed() => {
                if changed.is_err() {
                    return;
                }
                let Some(generation) = *rejections.borrow_and_update() else {
                    continue;
                };
                let Some(controller) = controller.upgrade() else {
                    return;
                };
                if controller.force_logout(generation) {
                    return;
                }
            }
        }
    }
}
