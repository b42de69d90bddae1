//! Error types surfaced by the channel client.

/// Reason the initial HTTP handshake did not yield a session id.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// The handshake URL could not be built from the origin.
    #[error("invalid handshake URL: {0}")]
    InvalidUrl(String),
    /// The HTTP request itself failed (DNS, TCP, TLS, timeout).
    #[error("handshake request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("handshake returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The body did not have the `{sid}:{heartbeat}:{close}:{transports}` shape.
    #[error("malformed handshake body: {0:?}")]
    MalformedBody(String),
}

/// Error type for channel client operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The handshake failed; fatal for this `connect()` call.
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    /// The configured base origin cannot be turned into a hostname for the chosen scheme.
    #[error("invalid base origin {origin:?} for {scheme} connections")]
    InvalidOrigin { origin: String, scheme: &'static str },
    /// The transport URL could not be built.
    #[error("invalid transport URL: {0}")]
    InvalidUrl(String),
    /// Building the TLS client configuration failed.
    #[error("tls configuration failed: {0}")]
    Tls(#[from] rustls::Error),
    /// Opening or writing to the websocket failed.
    #[error("websocket transport failed: {0}")]
    Transport(Box<tokio_tungstenite::tungstenite::Error>),
    /// A write was attempted while the connection is not open.
    #[error("connection is not open")]
    NotOpen,
    /// `connect()` was called on a client that already holds a connection.
    #[error("client is already connected")]
    AlreadyConnected,
    /// The client was closed while an operation was waiting.
    #[error("client closed")]
    Closed,
    /// No acknowledgement arrived for the endpoint within the bound.
    #[error("timed out waiting for subscription ack on {endpoint:?}")]
    SubscriptionTimeout { endpoint: String },
    /// Only acknowledgements for other endpoints arrived within the bound.
    #[error("subscription ack mismatch for {endpoint:?}: got acks for {received:?}")]
    SubscriptionMismatch { endpoint: String, received: Vec<String> },
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChannelError::Transport(Box::new(e))
    }
}
