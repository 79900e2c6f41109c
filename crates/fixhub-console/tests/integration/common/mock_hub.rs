//! Mock hub for integration tests.
//!
//! Serves the REST API and the `/ws/messages` feed from one axum router:
//! - Records every request as `METHOD /path`
//! - Accepts `admin`/`admin` and issues a fresh token per login; logout
//!   revokes it
//! - Can reject every authorized call with 401 on demand
//! - Can delay reads or mutations to hold a request in flight

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use fixhub_core::{Connection, Route, Session};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "admin";

#[derive(Default)]
struct Store {
    connections: Vec<Connection>,
    routes: Vec<Route>,
    sessions: Vec<Session>,
    requests: Vec<String>,
    disconnects: Vec<String>,
    tokens: HashSet<String>,
    issued: u64,
}

impl Store {
    fn issue_token(&mut self) -> String {
        self.issued += 1;
        let token = format!("token-{}", self.issued);
        self.tokens.insert(token.clone());
        token
    }
}

struct HubState {
    store: Mutex<Store>,
    reject_all: AtomicBool,
    mutation_delay_ms: AtomicU64,
    read_delay_ms: AtomicU64,
    feed: broadcast::Sender<String>,
    feed_connections: AtomicU64,
}

type Shared = Arc<HubState>;

/// In-process hub bound to `127.0.0.1:0`.
pub struct MockHub {
    addr: SocketAddr,
    state: Shared,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockHub {
    pub async fn start() -> Self {
        let (feed, _) = broadcast::channel(1024);
        let state = Arc::new(HubState {
            store: Mutex::new(Store::default()),
            reject_all: AtomicBool::new(false),
            mutation_delay_ms: AtomicU64::new(0),
            read_delay_ms: AtomicU64::new(0),
            feed,
            feed_connections: AtomicU64::new(0),
        });

        let app = Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/logout", post(logout))
            .route("/api/auth/validate", get(validate))
            .route("/api/connections", get(list_connections).post(create_connection))
            .route(
                "/api/connections/{id}",
                put(update_connection).delete(delete_connection),
            )
            .route("/api/routes", get(list_routes).post(create_route))
            .route("/api/routes/{index}", put(update_route).delete(delete_route))
            .route("/api/sessions", get(list_sessions))
            .route("/api/sessions/{id}/disconnect", post(disconnect_session))
            .route("/ws/messages", get(self::feed))
            .layer(middleware::from_fn_with_state(state.clone(), record))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests seen so far, as `METHOD /path`.
    pub fn requests(&self) -> Vec<String> {
        self.state.store.lock().unwrap().requests.clone()
    }

    /// Number of recorded requests equal to `request`.
    pub fn count(&self, request: &str) -> usize {
        self.requests().iter().filter(|r| *r == request).count()
    }

    pub fn clear_requests(&self) {
        self.state.store.lock().unwrap().requests.clear();
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.state.store.lock().unwrap().disconnects.clone()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.state.store.lock().unwrap().routes.clone()
    }

    pub fn set_routes(&self, routes: Vec<Route>) {
        self.state.store.lock().unwrap().routes = routes;
    }

    pub fn set_sessions(&self, sessions: Vec<Session>) {
        self.state.store.lock().unwrap().sessions = sessions;
    }

    /// Issue a token as if a login had happened elsewhere.
    pub fn issue_token(&self) -> String {
        self.state.store.lock().unwrap().issue_token()
    }

    /// Answer 401 to every authorized call from now on.
    pub fn reject_all(&self, reject: bool) {
        self.state.reject_all.store(reject, Ordering::SeqCst);
    }

    pub fn delay_mutations(&self, delay: Duration) {
        self.state
            .mutation_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Hold list requests before their token is checked.
    pub fn delay_reads(&self, delay: Duration) {
        self.state
            .read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Push a text frame to every feed subscriber.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.state.feed.send(frame.into());
    }

    pub fn feed_connections(&self) -> u64 {
        self.state.feed_connections.load(Ordering::SeqCst)
    }

    pub fn feed_subscribers(&self) -> usize {
        self.state.feed.receiver_count()
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn record(State(state): State<Shared>, request: Request, next: Next) -> Response {
    let line = format!("{} {}", request.method(), request.uri().path());
    state.store.lock().unwrap().requests.push(line);
    next.run(request).await
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn authorized(state: &HubState, headers: &HeaderMap) -> Result<(), Response> {
    let known = bearer(headers)
        .is_some_and(|token| state.store.lock().unwrap().tokens.contains(token));
    if state.reject_all.load(Ordering::SeqCst) || !known {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Unauthorized" })),
        )
            .into_response());
    }
    Ok(())
}

async fn hold(delay_ms: &AtomicU64) {
    let ms = delay_ms.load(Ordering::SeqCst);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

async fn mutation_delay(state: &HubState) {
    hold(&state.mutation_delay_ms).await;
}

async fn read_delay(state: &HubState) {
    hold(&state.read_delay_ms).await;
}

async fn login(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let username = body.get("username").and_then(Value::as_str);
    let password = body.get("password").and_then(Value::as_str);
    if username == Some(USERNAME) && password == Some(PASSWORD) {
        let token = state.store.lock().unwrap().issue_token();
        Json(json!({ "token": token, "username": USERNAME, "message": "Login successful" }))
            .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "token": null, "username": null, "message": "Invalid credentials" })),
        )
            .into_response()
    }
}

async fn logout(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(token) = bearer(&headers) {
        state.store.lock().unwrap().tokens.remove(token);
    }
    Json(json!({ "message": "Logged out" })).into_response()
}

async fn validate(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    Json(json!({ "valid": true, "username": USERNAME })).into_response()
}

async fn list_connections(State(state): State<Shared>, headers: HeaderMap) -> Response {
    read_delay(&state).await;
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    Json(state.store.lock().unwrap().connections.clone()).into_response()
}

async fn create_connection(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(mut connection): Json<Connection>,
) -> Response {
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    mutation_delay(&state).await;
    connection.id = Some(uuid::Uuid::new_v4().to_string());
    state
        .store
        .lock()
        .unwrap()
        .connections
        .push(connection.clone());
    Json(connection).into_response()
}

async fn update_connection(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(mut connection): Json<Connection>,
) -> Response {
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    mutation_delay(&state).await;
    let mut store = state.store.lock().unwrap();
    match store
        .connections
        .iter_mut()
        .find(|c| c.id.as_deref() == Some(id.as_str()))
    {
        Some(slot) => {
            connection.id = Some(id);
            *slot = connection.clone();
            Json(connection).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_connection(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    mutation_delay(&state).await;
    let mut store = state.store.lock().unwrap();
    let before = store.connections.len();
    store
        .connections
        .retain(|c| c.id.as_deref() != Some(id.as_str()));
    if store.connections.len() == before {
        StatusCode::NOT_FOUND.into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn list_routes(State(state): State<Shared>, headers: HeaderMap) -> Response {
    read_delay(&state).await;
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    Json(state.store.lock().unwrap().routes.clone()).into_response()
}

fn blank_route(route: &Route) -> Option<Response> {
    if route.from.trim().is_empty() || route.to.trim().is_empty() {
        return Some(
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": "from and to are required" })),
            )
                .into_response(),
        );
    }
    None
}

async fn create_route(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(route): Json<Route>,
) -> Response {
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    if let Some(rejected) = blank_route(&route) {
        return rejected;
    }
    mutation_delay(&state).await;
    state.store.lock().unwrap().routes.push(route.clone());
    Json(route).into_response()
}

async fn update_route(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(index): Path<usize>,
    Json(route): Json<Route>,
) -> Response {
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    if let Some(rejected) = blank_route(&route) {
        return rejected;
    }
    mutation_delay(&state).await;
    let mut store = state.store.lock().unwrap();
    match store.routes.get_mut(index) {
        Some(slot) => {
            *slot = route.clone();
            Json(route).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_route(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(index): Path<usize>,
) -> Response {
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    mutation_delay(&state).await;
    let mut store = state.store.lock().unwrap();
    if index >= store.routes.len() {
        return StatusCode::NOT_FOUND.into_response();
    }
    store.routes.remove(index);
    StatusCode::NO_CONTENT.into_response()
}

async fn list_sessions(State(state): State<Shared>, headers: HeaderMap) -> Response {
    read_delay(&state).await;
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    Json(state.store.lock().unwrap().sessions.clone()).into_response()
}

async fn disconnect_session(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    mutation_delay(&state).await;
    let mut store = state.store.lock().unwrap();
    store.sessions.retain(|s| s.identity() != id);
    store.disconnects.push(id.clone());
    Json(json!({
        "status": "disconnect_initiated",
        "message": format!("Session disconnect initiated for: {id}"),
    }))
    .into_response()
}

async fn feed(
    State(state): State<Shared>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    if let Err(rejected) = authorized(&state, &headers) {
        return rejected;
    }
    let frames = state.feed.subscribe();
    state.feed_connections.fetch_add(1, Ordering::SeqCst);
    upgrade.on_upgrade(move |socket| forward(socket, frames))
}

async fn forward(mut socket: WebSocket, mut frames: broadcast::Receiver<String>) {
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }
}
