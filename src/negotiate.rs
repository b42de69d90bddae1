//! HTTP handshake that issues the session id for the persistent connection.

use crate::config::{ClientOptions, Origin};
use crate::error::NegotiationError;

/// An established session. Immutable once `connect()` has created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub sid: String,
    /// `{scheme}://{host}:{port}` of the server.
    pub origin: String,
    pub secure: bool,
    pub token: String,
}

/// Parsed handshake body `{sid}:{heartbeat_timeout}:{close_timeout}:{transport_csv}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub sid: String,
    pub heartbeat_timeout: Option<u64>,
    pub close_timeout: Option<u64>,
    pub transports: Vec<String>,
}

/// Parse a handshake body. Only the sid is mandatory.
///
/// # Errors
///
/// Returns [`NegotiationError::MalformedBody`] when the body has no
/// colon-delimited fields or the sid is empty.
pub fn parse_handshake(body: &str) -> Result<Handshake, NegotiationError> {
    let trimmed = body.trim();
    let Some((sid, rest)) = trimmed.split_once(':') else {
        return Err(NegotiationError::MalformedBody(trimmed.to_owned()));
    };
    if sid.is_empty() {
        return Err(NegotiationError::MalformedBody(trimmed.to_owned()));
    }

    let mut fields = rest.splitn(3, ':');
    let heartbeat_timeout = fields.next().and_then(|v| v.parse().ok());
    let close_timeout = fields.next().and_then(|v| v.parse().ok());
    let transports = fields
        .next()
        .map(|csv| {
            csv.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Ok(Handshake { sid: sid.to_owned(), heartbeat_timeout, close_timeout, transports })
}

/// Performs the handshake GET.
///
/// Owns one HTTP client, so repeated `negotiate` calls on the same negotiator
/// share its connection pool. [`Client::connect`](crate::Client::connect)
/// builds a fresh negotiator each time.
#[derive(Debug, Clone)]
pub struct Negotiator {
    http: reqwest::Client,
    handshake_path: String,
}

impl Negotiator {
    /// Build a negotiator. Certificate verification follows `options.tls_verify`.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::Http`] if the HTTP client cannot be built.
    pub fn new(options: &ClientOptions) -> Result<Self, NegotiationError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!options.tls_verify)
            .timeout(options.http_timeout)
            .build()?;
        Ok(Self { http, handshake_path: options.handshake_path.clone() })
    }

    /// Run the handshake against `origin` and return the new session.
    ///
    /// No retry; the caller decides.
    ///
    /// # Errors
    ///
    /// Returns a [`NegotiationError`] for transport failures, non-success
    /// statuses and unparsable bodies.
    pub async fn negotiate(&self, origin: &Origin, token: &str) -> Result<Session, NegotiationError> {
        let url = origin
            .handshake_url(&self.handshake_path)
            .map_err(|e| NegotiationError::InvalidUrl(e.to_string()))?;

        tracing::debug!(%url, "channels: handshake request");
        let response = self.http.get(url).query(&[("Token", token)]).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(NegotiationError::Status { status: status.as_u16(), body });
        }

        let handshake = parse_handshake(&body)?;
        tracing::info!(
            sid = %handshake.sid,
            heartbeat_timeout = ?handshake.heartbeat_timeout,
            close_timeout = ?handshake.close_timeout,
            transports = ?handshake.transports,
            "channels: handshake ok"
        );

        Ok(Session {
            sid: handshake.sid,
            origin: origin.http_base(),
            secure: origin.secure,
            token: token.to_owned(),
        })
    }
}

#[cfg(test)]
#[path = "negotiate_test.rs"]
mod tests;
