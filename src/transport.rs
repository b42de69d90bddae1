//! Live websocket connection and its receive loop.
//!
//! DESIGN
//! ======
//! The connection is split once. The read half moves into a single spawned
//! receive loop; the write half sits behind an async mutex inside
//! [`FrameWriter`], the only way to put bytes on the socket. The receive loop
//! holds a clone of the writer so heartbeat replies go out from the loop
//! itself, before the next frame is read.
//!
//! LIFECYCLE
//! =========
//! 1. `Disconnected` → `Connecting` while the socket opens
//! 2. `Open` once the upgrade succeeds; the receive loop is spawned
//! 3. `close()` → `Closing`: close frame sent, loop signalled and joined
//! 4. `Closed` (terminal). A read failure also ends here; no reconnection.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use frames::Frame;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};

use crate::dispatch::Dispatcher;
use crate::error::ChannelError;
use crate::tls;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Clone, Debug)]
struct StateCell(Arc<Mutex<ConnectionState>>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(ConnectionState::Disconnected)))
    }

    fn get(&self) -> ConnectionState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: ConnectionState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Move `from` → `to`; no-op from any other state.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}

/// Outbound side of the protocol. Implemented by [`FrameWriter`]; tests
/// substitute recording sinks.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), ChannelError>;

    async fn send_frame(&self, frame: &Frame) -> Result<(), ChannelError> {
        self.send_text(frames::encode_frame(frame)).await
    }
}

/// Serialized write handle for one connection. Cheap to clone.
#[derive(Clone)]
pub struct FrameWriter {
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    state: StateCell,
}

impl FrameWriter {
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }
}

#[async_trait]
impl FrameSink for FrameWriter {
    async fn send_text(&self, text: String) -> Result<(), ChannelError> {
        if self.state.get() != ConnectionState::Open {
            return Err(ChannelError::NotOpen);
        }
        tracing::debug!(frame = %text, "channels: send frame");
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }
}

/// Owns the socket and the receive loop for one session.
pub struct TransportConnection {
    writer: FrameWriter,
    state: StateCell,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl TransportConnection {
    /// Open the websocket at `url` and start the receive loop.
    ///
    /// With `tls_verify` off, `wss` connections accept any server certificate.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Tls`] if the TLS config cannot be built and
    /// [`ChannelError::Transport`] if the socket or upgrade fails.
    pub async fn connect(url: &str, tls_verify: bool, dispatcher: Dispatcher) -> Result<Self, ChannelError> {
        let state = StateCell::new();
        state.set(ConnectionState::Connecting);

        let connector = if url.starts_with("wss://") && !tls_verify {
            Some(Connector::Rustls(Arc::new(tls::insecure_client_config()?)))
        } else {
            None
        };

        let (stream, _response) = match connect_async_tls_with_config(url, None, false, connector).await {
            Ok(connected) => connected,
            Err(e) => {
                state.set(ConnectionState::Closed);
                tracing::warn!(error = %e, "channels: transport connect failed");
                return Err(e.into());
            }
        };

        let (sink, stream) = stream.split();
        let writer = FrameWriter { sink: Arc::new(tokio::sync::Mutex::new(sink)), state: state.clone() };
        let shutdown = Arc::new(Notify::new());

        state.set(ConnectionState::Open);
        let task = tokio::spawn(receive_loop(stream, writer.clone(), dispatcher, shutdown.clone(), state.clone()));
        tracing::info!("channels: transport open");

        Ok(Self { writer, state, shutdown, task: Some(task) })
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Handle to the serialized send primitive.
    #[must_use]
    pub fn writer(&self) -> FrameWriter {
        self.writer.clone()
    }

    /// Send raw text through the serialized writer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotOpen`] unless the connection is open, or
    /// [`ChannelError::Transport`] if the write fails.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        self.writer.send_text(text.into()).await
    }

    /// Close the socket and join the receive loop. Calling it again is a no-op.
    pub async fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        if self.state.transition(ConnectionState::Open, ConnectionState::Closing) {
            let mut sink = self.writer.sink.lock().await;
            match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "channels: close frame not sent"),
                Err(_) => tracing::debug!("channels: close frame timed out"),
            }
        }

        self.shutdown.notify_one();
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "channels: receive loop ended abnormally");
        }
        self.state.set(ConnectionState::Closed);
        tracing::info!("channels: transport closed");
    }
}

impl Drop for TransportConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::warn!("channels: transport dropped without close(); aborting receive loop");
            task.abort();
            self.state.set(ConnectionState::Closed);
        }
    }
}

/// Read, decode and dispatch frames one at a time until shutdown or failure.
async fn receive_loop(
    mut stream: SplitStream<WsStream>,
    writer: FrameWriter,
    dispatcher: Dispatcher,
    shutdown: Arc<Notify>,
    state: StateCell,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.notified() => {
                tracing::debug!("channels: receive loop shutdown requested");
                break;
            }
            next = stream.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "channels: transport read failed");
                break;
            }
            None => {
                tracing::info!("channels: transport stream ended");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                tracing::debug!(frame = %text.as_str(), "channels: recv frame");
                let frame = frames::decode_frame(text.as_str());
                if let Some(reply) = dispatcher.dispatch(frame) {
                    if let Err(e) = writer.send_frame(&reply).await {
                        tracing::warn!(error = %e, "channels: reply write failed");
                        break;
                    }
                }
            }
            Message::Close(close) => {
                tracing::info!(close = ?close, "channels: server closed connection");
                break;
            }
            Message::Binary(bytes) => {
                tracing::debug!(len = bytes.len(), "channels: binary message ignored");
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    state.transition(ConnectionState::Open, ConnectionState::Closed);
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
