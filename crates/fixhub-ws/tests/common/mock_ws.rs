//! Mock event feed for integration tests.
//!
//! Accepts WebSocket connections, records the handshake `Authorization`
//! header and pushes frames queued by the test to every open connection.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum Push {
    Text(String),
    Close,
}

/// A mock event feed.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    push_tx: broadcast::Sender<Push>,
    connections: Arc<Mutex<u32>>,
    authorizations: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockWsServer {
    /// Start on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (push_tx, _) = broadcast::channel::<Push>(1024);
        let connections = Arc::new(Mutex::new(0));
        let authorizations = Arc::new(Mutex::new(Vec::new()));

        let push = push_tx.clone();
        let conns = connections.clone();
        let auths = authorizations.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            push.subscribe(),
                            conns.clone(),
                            auths.clone(),
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            push_tx,
            connections,
            authorizations,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws/messages", self.addr)
    }

    /// Number of completed handshakes.
    pub fn connection_count(&self) -> u32 {
        *self.connections.lock().unwrap()
    }

    /// `Authorization` header of each handshake, in order.
    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.authorizations.lock().unwrap().clone()
    }

    /// Push a text frame to every open connection.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.push_tx.send(Push::Text(text.into()));
    }

    /// Close every open connection from the server side.
    pub fn close_all(&self) {
        let _ = self.push_tx.send(Push::Close);
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    mut push_rx: broadcast::Receiver<Push>,
    connections: Arc<Mutex<u32>>,
    authorizations: Arc<Mutex<Vec<Option<String>>>>,
) {
    let record = authorizations.clone();
    let ws_stream = match accept_hdr_async(stream, move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let header = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        record.lock().unwrap().push(header);
        Ok(resp)
    })
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            return;
        }
    };

    *connections.lock().unwrap() += 1;
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            push = push_rx.recv() => match push {
                Ok(Push::Text(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Push::Close) | Err(_) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }
}
