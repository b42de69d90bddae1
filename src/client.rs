//! Public client surface.
//!
//! DESIGN
//! ======
//! `Client` owns the session and both queues and hands the queues to the
//! dispatcher and subscription manager it builds. Every method takes `&self`,
//! so one client can be shared across tasks: a task blocked in `recv()` or
//! `subscribe()` is released as soon as another task calls `close()`, which
//! closes both queues before shutting the transport down.
//!
//! LIFECYCLE
//! =========
//! 1. `Client::new` / `with_origin_source`: queues created, nothing opened
//! 2. `connect()`: handshake, transport open, session stored
//! 3. `subscribe` / `send` / `recv` / `events` while open
//! 4. `close()`: queues closed, transport closed, session discarded
//!
//! [`Client::scoped`] runs steps 2-4 around a body so close happens on every
//! exit path; `Drop` is only a fallback that aborts the receive loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::Stream;
use futures_util::stream;

use crate::config::{ClientOptions, HarnessConfig, OriginSource};
use crate::dispatch::{Dispatcher, Event};
use crate::error::ChannelError;
use crate::negotiate::{Negotiator, Session};
use crate::queue::WaitQueue;
use crate::subscription::SubscriptionManager;
use crate::transport::{ConnectionState, FrameSink, FrameWriter, TransportConnection};

pub struct Client {
    options: ClientOptions,
    base_url: String,
    inbound: Arc<WaitQueue<Event>>,
    acks: Arc<WaitQueue<String>>,
    subscriptions: SubscriptionManager,
    session: Mutex<Option<Session>>,
    writer: Mutex<Option<FrameWriter>>,
    transport: tokio::sync::Mutex<Option<TransportConnection>>,
    closed: AtomicBool,
}

impl Client {
    /// Client whose base origin comes from [`HarnessConfig::from_env`].
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        Self::with_origin_source(options, &HarnessConfig::from_env())
    }

    /// Client whose base origin comes from `source`.
    #[must_use]
    pub fn with_origin_source<S>(options: ClientOptions, source: &S) -> Self
    where
        S: OriginSource + ?Sized,
    {
        let inbound = Arc::new(WaitQueue::new("inbound", options.inbound_capacity));
        let acks = Arc::new(WaitQueue::new("acks", options.ack_capacity));
        let subscriptions = SubscriptionManager::new(acks.clone(), options.subscribe_timeout);
        Self {
            base_url: source.base_url().to_owned(),
            options,
            inbound,
            acks,
            subscriptions,
            session: Mutex::new(None),
            writer: Mutex::new(None),
            transport: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Negotiate a session and open the transport.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::AlreadyConnected`] if a connection is already held
    /// - [`ChannelError::Closed`] after `close()`
    /// - [`ChannelError::InvalidOrigin`] / [`ChannelError::InvalidUrl`] for bad addressing
    /// - [`ChannelError::Negotiation`] if the handshake fails
    /// - [`ChannelError::Tls`] / [`ChannelError::Transport`] if the socket cannot be opened
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let mut transport = self.transport.lock().await;
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if transport.is_some() {
            return Err(ChannelError::AlreadyConnected);
        }

        let origin = self.options.resolve_origin(self.base_url.as_str())?;
        let session = Negotiator::new(&self.options)?.negotiate(&origin, &self.options.token).await?;
        let url = origin.transport_url(&self.options.transport_path, &session.sid, &session.token)?;

        let dispatcher = Dispatcher::new(self.inbound.clone(), self.acks.clone());
        let conn = TransportConnection::connect(url.as_str(), self.options.tls_verify, dispatcher).await?;
        tracing::info!(sid = %session.sid, origin = %session.origin, "channels: client connected");

        *lock(&self.writer) = Some(conn.writer());
        *lock(&self.session) = Some(session);
        *transport = Some(conn);
        Ok(())
    }

    /// Current session, if connected.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        lock(&self.session).clone()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match lock(&self.writer).as_ref() {
            Some(writer) => writer.state(),
            None if self.is_closed() => ConnectionState::Closed,
            None => ConnectionState::Disconnected,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Subscribe to each group in order, waiting for each acknowledgement.
    /// The first failure stops the sequence.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NotOpen`] before `connect()`, [`ChannelError::Closed`]
    /// after `close()`, otherwise whatever the first failing subscription returns.
    pub async fn subscribe<G>(&self, groups: &[G]) -> Result<(), ChannelError>
    where
        G: AsRef<str>,
    {
        let writer = self.open_writer()?;
        for group in groups {
            self.subscriptions.subscribe(&writer, group.as_ref()).await?;
        }
        Ok(())
    }

    /// Leave each group. No acknowledgement is awaited.
    ///
    /// # Errors
    ///
    /// Same lifecycle errors as [`Client::subscribe`], plus write failures.
    pub async fn unsubscribe<G>(&self, groups: &[G]) -> Result<(), ChannelError>
    where
        G: AsRef<str>,
    {
        let writer = self.open_writer()?;
        for group in groups {
            self.subscriptions.unsubscribe(&writer, group.as_ref()).await?;
        }
        Ok(())
    }

    /// Write raw text on the connection.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NotOpen`] / [`ChannelError::Closed`] outside the open
    /// state, [`ChannelError::Transport`] if the write fails.
    pub async fn send(&self, data: impl Into<String>) -> Result<(), ChannelError> {
        self.open_writer()?.send_text(data.into()).await
    }

    /// Pop one event.
    ///
    /// Non-blocking calls return whatever is queued. Blocking calls wait up to
    /// `timeout`, or the configured receive timeout when `None`. Returns
    /// `None` when nothing arrived in time or the client is closed.
    pub async fn recv(&self, block: bool, timeout: Option<Duration>) -> Option<Event> {
        if block {
            self.inbound.pop(timeout.unwrap_or(self.options.recv_timeout)).await
        } else {
            self.inbound.try_pop()
        }
    }

    /// Events as a stream. Each item is a blocking `recv` with the configured
    /// receive timeout; the stream ends at the first quiet period or on close.
    pub fn events(&self) -> impl Stream<Item = Event> + '_ {
        stream::unfold(self, |client| async move {
            let event = client.recv(true, None).await?;
            Some((event, client))
        })
    }

    /// Remove and return every event queued right now.
    pub fn drain(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.inbound.len());
        while let Some(event) = self.inbound.try_pop() {
            events.push(event);
        }
        events
    }

    /// Close the client. Waiters on either queue return immediately; the
    /// transport is then closed and joined. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inbound.close();
        self.acks.close();

        let conn = self.transport.lock().await.take();
        lock(&self.writer).take();
        if let Some(mut conn) = conn {
            conn.close().await;
        }
        if let Some(session) = lock(&self.session).take() {
            tracing::info!(sid = %session.sid, "channels: client closed");
        }
    }

    /// Connect, run `body`, and close on every exit path.
    ///
    /// # Errors
    ///
    /// Returns the connect error, or whatever `body` returns.
    pub async fn scoped<S, F, T>(options: ClientOptions, source: &S, body: F) -> Result<T, ChannelError>
    where
        S: OriginSource + ?Sized,
        F: AsyncFnOnce(&Client) -> Result<T, ChannelError>,
    {
        let client = Self::with_origin_source(options, source);
        if let Err(e) = client.connect().await {
            client.close().await;
            return Err(e);
        }
        let result = body(&client).await;
        client.close().await;
        result
    }

    fn open_writer(&self) -> Result<FrameWriter, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        lock(&self.writer).clone().ok_or(ChannelError::NotOpen)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        self.inbound.close();
        self.acks.close();
        if self.transport.get_mut().is_some() {
            tracing::warn!("channels: client dropped without close()");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
