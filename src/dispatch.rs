//! Frame classification and routing.
//!
//! DESIGN
//! ======
//! [`classify`] is pure: it turns a decoded frame into a [`Route`]. The
//! [`Dispatcher`] applies the route, pushing into the queues it was built with
//! and handing any protocol reply back to the receive loop, which owns the
//! write. Nothing here touches the socket.

use std::sync::Arc;

use frames::Frame;
use serde::Serialize;
use serde_json::Value;

use crate::queue::WaitQueue;

/// One pushed event, tagged with the endpoint (group) it arrived on.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    pub group: String,
    pub payload: Value,
}

/// Where a decoded frame goes.
#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    /// Informational only; no queue effect.
    Info,
    /// Write this frame back immediately; never queued.
    Reply(Frame),
    /// Acknowledgement for the endpoint; goes to the ack queue.
    Ack(String),
    /// Event for the inbound queue.
    Inbound(Event),
    /// Unrecognized; dropped.
    Drop,
}

/// Decide what to do with a frame.
#[must_use]
pub fn classify(frame: Frame) -> Route {
    match frame {
        Frame::Init | Frame::Disconnect { .. } => Route::Info,
        Frame::Heartbeat => Route::Reply(Frame::Heartbeat),
        Frame::Connect { endpoint } => Route::Ack(endpoint),
        Frame::Event { endpoint, payload } => Route::Inbound(Event { group: endpoint, payload }),
        Frame::Skip => Route::Drop,
    }
}

/// Routes frames into the queues owned by the client.
#[derive(Clone)]
pub struct Dispatcher {
    inbound: Arc<WaitQueue<Event>>,
    acks: Arc<WaitQueue<String>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(inbound: Arc<WaitQueue<Event>>, acks: Arc<WaitQueue<String>>) -> Self {
        Self { inbound, acks }
    }

    /// Route one frame. Returns the reply the caller must write, if any.
    pub fn dispatch(&self, frame: Frame) -> Option<Frame> {
        let endpoint = frame.endpoint().map(ToOwned::to_owned);
        match classify(frame) {
            Route::Info => {
                tracing::info!(endpoint = ?endpoint, "channels: connection frame");
                None
            }
            Route::Reply(reply) => {
                tracing::debug!("channels: heartbeat");
                Some(reply)
            }
            Route::Ack(endpoint) => {
                tracing::debug!(%endpoint, "channels: subscription ack");
                if !self.acks.push(endpoint) {
                    tracing::debug!("channels: ack after close, dropped");
                }
                None
            }
            Route::Inbound(event) => {
                tracing::debug!(group = %event.group, "channels: event");
                if !self.inbound.push(event) {
                    tracing::debug!("channels: event after close, dropped");
                }
                None
            }
            Route::Drop => {
                tracing::debug!("channels: unrecognized frame dropped");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
