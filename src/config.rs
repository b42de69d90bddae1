//! Client options and the base-origin collaborator.

use std::time::Duration;

use reqwest::Url;

use crate::error::ChannelError;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BASE_URL: &str = "https://127.0.0.1";
pub const DEFAULT_HANDSHAKE_PATH: &str = "/socket.io/1/";
pub const DEFAULT_TRANSPORT_PATH: &str = "/socket.io/1/websocket";
pub const DEFAULT_SUBSCRIBE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RECV_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_INBOUND_CAPACITY: usize = 10_000;
pub const DEFAULT_ACK_CAPACITY: usize = 64;

/// Anything that can hand out the base origin of the system under test.
pub trait OriginSource {
    fn base_url(&self) -> &str;
}

/// Harness-wide settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub base_url: String,
}

impl HarnessConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `QE_BASE_URL`: origin of the system under test, default `https://127.0.0.1`
    #[must_use]
    pub fn from_env() -> Self {
        let base_url = std::env::var("QE_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        Self { base_url }
    }
}

impl OriginSource for HarnessConfig {
    fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl OriginSource for str {
    fn base_url(&self) -> &str {
        self
    }
}

impl OriginSource for String {
    fn base_url(&self) -> &str {
        self
    }
}

/// Connection options for [`crate::Client`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bearer/session credential sent as the `Token` query parameter.
    pub token: String,
    /// Host to connect to. Derived from the base origin when `None`.
    pub hostname: Option<String>,
    pub port: u16,
    /// Selects `https`/`wss` over `http`/`ws`.
    pub secure: bool,
    /// Verify server certificates. Off by default; test servers use self-signed certs.
    pub tls_verify: bool,
    pub handshake_path: String,
    pub transport_path: String,
    /// Bound on waiting for a subscription acknowledgement.
    pub subscribe_timeout: Duration,
    /// Wait used by the event stream for each blocking receive.
    pub recv_timeout: Duration,
    pub http_timeout: Duration,
    pub inbound_capacity: usize,
    pub ack_capacity: usize,
}

impl ClientOptions {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            hostname: None,
            port: DEFAULT_PORT,
            secure: true,
            tls_verify: false,
            handshake_path: DEFAULT_HANDSHAKE_PATH.to_owned(),
            transport_path: DEFAULT_TRANSPORT_PATH.to_owned(),
            subscribe_timeout: Duration::from_secs(DEFAULT_SUBSCRIBE_TIMEOUT_SECS),
            recv_timeout: Duration::from_secs(DEFAULT_RECV_TIMEOUT_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            ack_capacity: DEFAULT_ACK_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_tls_verify(mut self, tls_verify: bool) -> Self {
        self.tls_verify = tls_verify;
        self
    }

    #[must_use]
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Resolve the origin to connect to, taking the hostname from `source`
    /// when none was set explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidOrigin`] when the base origin does not
    /// use the scheme selected by `secure` or has no host.
    pub fn resolve_origin<S>(&self, source: &S) -> Result<Origin, ChannelError>
    where
        S: OriginSource + ?Sized,
    {
        let host = match self.hostname.as_deref().filter(|h| !h.is_empty()) {
            Some(host) => host.to_owned(),
            None => hostname_from_base_url(source.base_url(), self.secure)?,
        };
        Ok(Origin { host, port: self.port, secure: self.secure })
    }
}

/// Scheme, host and port of the server under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Origin {
    #[must_use]
    pub fn http_scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }

    #[must_use]
    pub fn ws_scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }

    /// `{scheme}://{host}:{port}` for HTTP calls.
    #[must_use]
    pub fn http_base(&self) -> String {
        format!("{}://{}:{}", self.http_scheme(), self.host, self.port)
    }

    /// Handshake URL; the token is added as a query parameter by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidUrl`] if the pieces do not form a URL.
    pub fn handshake_url(&self, path: &str) -> Result<Url, ChannelError> {
        let raw = format!("{}{}", self.http_base(), normalize_path(path));
        Url::parse(&raw).map_err(|e| ChannelError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// `{ws-scheme}://{host}:{port}{path}/{sid}?Token={token}`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidUrl`] if the pieces do not form a URL.
    pub fn transport_url(&self, path: &str, sid: &str, token: &str) -> Result<Url, ChannelError> {
        let path = normalize_path(path);
        let raw = format!(
            "{}://{}:{}{}/{sid}",
            self.ws_scheme(),
            self.host,
            self.port,
            path.trim_end_matches('/')
        );
        let mut url = Url::parse(&raw).map_err(|e| ChannelError::InvalidUrl(format!("{raw}: {e}")))?;
        url.query_pairs_mut().append_pair("Token", token);
        Ok(url)
    }
}

/// Extract the hostname from a base origin such as `https://tower.example:8043/api`.
///
/// # Errors
///
/// Returns [`ChannelError::InvalidOrigin`] when the origin does not start with
/// the scheme implied by `secure`, or has an empty host.
pub fn hostname_from_base_url(base_url: &str, secure: bool) -> Result<String, ChannelError> {
    let scheme = if secure { "https" } else { "http" };
    let invalid = || ChannelError::InvalidOrigin { origin: base_url.to_owned(), scheme };

    let rest = base_url
        .strip_prefix(scheme)
        .and_then(|rest| rest.strip_prefix("://"))
        .ok_or_else(invalid)?;
    let host = rest.split(['/', ':', '?']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(invalid());
    }
    Ok(host.to_owned())
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') { path.to_owned() } else { format!("/{path}") }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
