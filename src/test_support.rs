//! In-process mocks of the push server: handshake endpoint plus websocket,
//! over plain TCP or over TLS with a self-signed certificate.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{Message as WsMessage, WebSocket as WsSocket};

use crate::config::ClientOptions;

pub(crate) const TEST_TOKEN: &str = "test-token";

const CLOSE_SENTINEL: &str = "__close__";

/// How the mock answers `1::{endpoint}` requests.
#[derive(Clone, Debug)]
pub(crate) enum AckMode {
    /// Echo the request back verbatim.
    Echo,
    /// Acknowledge a different endpoint instead.
    Other(String),
    /// Never acknowledge.
    Silent,
}

#[derive(Clone, Debug)]
pub(crate) struct MockConfig {
    pub handshake_status: StatusCode,
    pub handshake_body: String,
    pub ack_mode: AckMode,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            handshake_status: StatusCode::OK,
            handshake_body: "deadbeef:25:60:websocket".to_owned(),
            ack_mode: AckMode::Echo,
        }
    }
}

#[derive(Clone)]
struct MockState {
    config: MockConfig,
    handshakes: Arc<Mutex<Vec<HashMap<String, String>>>>,
    transports: Arc<Mutex<Vec<(String, HashMap<String, String>)>>>,
    received_tx: mpsc::UnboundedSender<String>,
    push_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
}

pub(crate) struct MockServer {
    pub addr: SocketAddr,
    received: mpsc::UnboundedReceiver<String>,
    push_tx: mpsc::UnboundedSender<String>,
    handshakes: Arc<Mutex<Vec<HashMap<String, String>>>>,
    transports: Arc<Mutex<Vec<(String, HashMap<String, String>)>>>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub(crate) async fn spawn(config: MockConfig) -> Self {
        init_tracing();

        let (received_tx, received) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let handshakes = Arc::new(Mutex::new(Vec::new()));
        let transports = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            config,
            handshakes: handshakes.clone(),
            transports: transports.clone(),
            received_tx,
            push_rx: Arc::new(tokio::sync::Mutex::new(push_rx)),
        };

        let app = Router::new()
            .route("/socket.io/1/", get(handshake))
            .route("/socket.io/1/websocket/{sid}", get(upgrade))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("mock server should bind");
        let addr = listener.local_addr().expect("mock server address");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, received, push_tx, handshakes, transports, task }
    }

    /// Plain-text options pointing at this server.
    pub(crate) fn options(&self) -> ClientOptions {
        ClientOptions::new(TEST_TOKEN)
            .with_hostname("127.0.0.1")
            .with_port(self.addr.port())
            .with_secure(false)
    }

    pub(crate) fn ws_url(&self, sid: &str) -> String {
        format!("ws://{}/socket.io/1/websocket/{sid}?Token={TEST_TOKEN}", self.addr)
    }

    /// Push a raw frame to the connected client.
    pub(crate) fn push(&self, text: &str) {
        self.push_tx.send(text.to_owned()).expect("mock push channel open");
    }

    /// Have the server close the websocket from its side.
    pub(crate) fn close_from_server(&self) {
        self.push(CLOSE_SENTINEL);
    }

    /// Next frame the client sent, or `None` after `timeout`.
    pub(crate) async fn next_received(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, self.received.recv()).await.ok().flatten()
    }

    pub(crate) fn handshakes(&self) -> Vec<HashMap<String, String>> {
        self.handshakes.lock().expect("handshakes lock").clone()
    }

    pub(crate) fn transports(&self) -> Vec<(String, HashMap<String, String>)> {
        self.transports.lock().expect("transports lock").clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

async fn handshake(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.handshakes.lock().expect("handshakes lock").push(params.clone());
    if !params.contains_key("Token") {
        return (StatusCode::UNAUTHORIZED, "token required").into_response();
    }
    (state.config.handshake_status, state.config.handshake_body.clone()).into_response()
}

async fn upgrade(
    State(state): State<MockState>,
    Path(sid): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    state.transports.lock().expect("transports lock").push((sid, params));
    ws.on_upgrade(move |socket| run_socket(socket, state))
}

async fn run_socket(mut socket: WebSocket, state: MockState) {
    if socket.send(Message::Text("1::".into())).await.is_err() {
        return;
    }

    let mut push_rx = state.push_rx.lock().await;
    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let text = text.as_str().to_owned();
                        let _ = state.received_tx.send(text.clone());
                        if text.starts_with("1::") {
                            let reply = match &state.config.ack_mode {
                                AckMode::Echo => Some(text),
                                AckMode::Other(endpoint) => Some(format!("1::{endpoint}")),
                                AckMode::Silent => None,
                            };
                            if let Some(reply) = reply {
                                if socket.send(Message::Text(reply.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(text) = push_rx.recv() => {
                if text == CLOSE_SENTINEL {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

pub(crate) const TLS_SID: &str = "tlssid";

/// Blocking TLS mock with a fresh self-signed certificate. Serves the
/// handshake with sid [`TLS_SID`] and echoes subscribe requests on the
/// websocket. Each accepted connection gets its own thread.
pub(crate) struct TlsMockServer {
    pub addr: SocketAddr,
}

impl TlsMockServer {
    pub(crate) fn spawn() -> Self {
        init_tracing();

        let config = Arc::new(self_signed_server_config());
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("tls mock should bind");
        let addr = listener.local_addr().expect("tls mock address");
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let config = config.clone();
                std::thread::spawn(move || serve_tls(stream, config));
            }
        });

        Self { addr }
    }

    /// `https`/`wss` options pointing at this server, certificate checks off.
    pub(crate) fn options(&self) -> ClientOptions {
        ClientOptions::new(TEST_TOKEN)
            .with_hostname("127.0.0.1")
            .with_port(self.addr.port())
            .with_secure(true)
            .with_tls_verify(false)
    }

    pub(crate) fn wss_url(&self) -> String {
        format!("wss://{}/socket.io/1/websocket/{TLS_SID}?Token={TEST_TOKEN}", self.addr)
    }
}

fn self_signed_server_config() -> ServerConfig {
    let key = rcgen::KeyPair::generate().expect("key pair");
    let params = rcgen::CertificateParams::new(vec!["localhost".to_owned(), "127.0.0.1".to_owned()])
        .expect("certificate params");
    let cert = params.self_signed(&key).expect("self-signed certificate");
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));

    ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key_der)
        .expect("server config")
}

type TlsStream = StreamOwned<ServerConnection, TcpStream>;

fn serve_tls(stream: TcpStream, config: Arc<ServerConfig>) {
    let Ok(conn) = ServerConnection::new(config) else { return };
    let mut tls = StreamOwned::new(conn, stream);
    // A client that rejects the certificate fails here.
    let Some(head) = read_request_head(&mut tls) else { return };

    let key = head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim().eq_ignore_ascii_case("sec-websocket-key").then(|| value.trim().to_owned())
    });
    match key {
        Some(key) => serve_websocket(tls, &key),
        None => {
            let body = format!("{TLS_SID}:25:60:websocket");
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = tls.write_all(response.as_bytes());
            tls.conn.send_close_notify();
            let _ = tls.flush();
        }
    }
}

fn read_request_head(tls: &mut TlsStream) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() > 16 * 1024 || tls.read(&mut byte).ok()? == 0 {
            return None;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).ok()
}

fn serve_websocket(mut tls: TlsStream, key: &str) {
    let accept = derive_accept_key(key.as_bytes());
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    if tls.write_all(response.as_bytes()).and_then(|()| tls.flush()).is_err() {
        return;
    }

    let mut socket = WsSocket::from_raw_socket(tls, Role::Server, None);
    if socket.send(WsMessage::text("1::")).is_err() {
        return;
    }
    while let Ok(msg) = socket.read() {
        match msg {
            WsMessage::Text(text) if text.starts_with("1::") => {
                if socket.send(WsMessage::text(text.as_str().to_owned())).is_err() {
                    break;
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
}
