//! Text frame model and codec for the push-notification channel.
//!
//! This crate owns the wire representation used by the `channels` client.
//! A frame on the wire is `{type}:{message-id}:{endpoint}[:{data}]`; the client
//! only ever sends and recognizes frames without a message id, so every frame
//! it understands starts with `{type}::`.
//!
//! Decoding is total: any text that does not match a recognized shape becomes
//! [`Frame::Skip`] instead of an error.

use serde_json::Value;

/// Numeric frame type, the first field of every wire frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// `0`: endpoint disconnect.
    Disconnect,
    /// `1`: connect request / acknowledgement.
    Connect,
    /// `2`: heartbeat.
    Heartbeat,
    /// `5`: named event with a JSON payload.
    Event,
    /// `8`: noop.
    Noop,
}

impl FrameKind {
    /// Wire prefix for this kind, including the empty message-id field.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Disconnect => "0::",
            Self::Connect => "1::",
            Self::Heartbeat => "2::",
            Self::Event => "5::",
            Self::Noop => "8::",
        }
    }

    /// Split a raw frame into its kind and the text after the prefix.
    fn split(text: &str) -> Option<(Self, &str)> {
        [Self::Disconnect, Self::Connect, Self::Heartbeat, Self::Event, Self::Noop]
            .into_iter()
            .find_map(|kind| text.strip_prefix(kind.prefix()).map(|rest| (kind, rest)))
    }
}

/// A single decoded unit of the wire protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Connection-level connect (`1::`) sent by the server once the socket opens.
    Init,
    /// Keepalive (`2::`). Must be answered with a heartbeat of our own.
    Heartbeat,
    /// Endpoint connect (`1::{endpoint}`). Outbound it is a subscribe request,
    /// inbound it is the server's acknowledgement; the shape is identical.
    Connect { endpoint: String },
    /// Endpoint disconnect (`0::{endpoint}`).
    Disconnect { endpoint: String },
    /// Event on an endpoint (`5::{endpoint}:{json}`).
    Event { endpoint: String, payload: Value },
    /// Anything this client does not recognize.
    Skip,
}

impl Frame {
    /// Build a subscribe request for `endpoint`.
    #[must_use]
    pub fn connect(endpoint: impl Into<String>) -> Self {
        Self::Connect { endpoint: endpoint.into() }
    }

    /// Build an endpoint disconnect for `endpoint`.
    #[must_use]
    pub fn disconnect(endpoint: impl Into<String>) -> Self {
        Self::Disconnect { endpoint: endpoint.into() }
    }

    /// Build an event frame.
    #[must_use]
    pub fn event(endpoint: impl Into<String>, payload: Value) -> Self {
        Self::Event { endpoint: endpoint.into(), payload }
    }

    /// Endpoint this frame is addressed to, if it carries one.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Connect { endpoint } | Self::Disconnect { endpoint } | Self::Event { endpoint, .. } => {
                Some(endpoint.as_str())
            }
            Self::Init | Self::Heartbeat | Self::Skip => None,
        }
    }
}

/// Encode a frame into its wire text.
///
/// [`Frame::Skip`] encodes to the noop frame, which decodes back to `Skip`.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    match frame {
        Frame::Init => FrameKind::Connect.prefix().to_owned(),
        Frame::Heartbeat => FrameKind::Heartbeat.prefix().to_owned(),
        Frame::Connect { endpoint } => format!("{}{endpoint}", FrameKind::Connect.prefix()),
        Frame::Disconnect { endpoint } => format!("{}{endpoint}", FrameKind::Disconnect.prefix()),
        Frame::Event { endpoint, payload } => {
            format!("{}{endpoint}:{payload}", FrameKind::Event.prefix())
        }
        Frame::Skip => FrameKind::Noop.prefix().to_owned(),
    }
}

/// Decode wire text into a frame. Never fails; unrecognized input is [`Frame::Skip`].
#[must_use]
pub fn decode_frame(text: &str) -> Frame {
    let Some((kind, rest)) = FrameKind::split(text) else {
        tracing::debug!(frame = %truncate(text), "frames: unrecognized frame type");
        return Frame::Skip;
    };

    match kind {
        FrameKind::Connect if rest.is_empty() => Frame::Init,
        FrameKind::Connect => Frame::connect(rest),
        FrameKind::Disconnect => Frame::disconnect(rest),
        FrameKind::Heartbeat if rest.is_empty() => Frame::Heartbeat,
        FrameKind::Event => decode_event(rest).unwrap_or_else(|| {
            tracing::debug!(frame = %truncate(text), "frames: event without a JSON payload");
            Frame::Skip
        }),
        FrameKind::Heartbeat | FrameKind::Noop => {
            tracing::debug!(frame = %truncate(text), "frames: skipping frame");
            Frame::Skip
        }
    }
}

/// Split `{endpoint}:{json}` at the leftmost `:` whose remainder is valid JSON,
/// so endpoints that contain `:` themselves still parse.
fn decode_event(rest: &str) -> Option<Frame> {
    rest.match_indices(':').find_map(|(idx, _)| {
        let payload = serde_json::from_str::<Value>(&rest[idx + 1..]).ok()?;
        Some(Frame::event(&rest[..idx], payload))
    })
}

fn truncate(text: &str) -> &str {
    const MAX_LOGGED: usize = 120;
    match text.char_indices().nth(MAX_LOGGED) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
