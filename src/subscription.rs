//! Subscribe requests and their acknowledgements.
//!
//! A subscribe writes `1::{endpoint}` and then waits on the ack queue for the
//! same endpoint echoed back. Only acks that arrive after the request is
//! written count. Acks for other endpoints are left queued so a concurrent
//! subscriber waiting on them still sees them; once no subscribe is waiting
//! they are discarded.

use std::sync::Arc;
use std::time::Duration;

use frames::Frame;

use crate::error::ChannelError;
use crate::queue::{PopOutcome, WaitQueue};
use crate::transport::FrameSink;

pub struct SubscriptionManager {
    acks: Arc<WaitQueue<String>>,
    timeout: Duration,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(acks: Arc<WaitQueue<String>>, timeout: Duration) -> Self {
        Self { acks, timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request `endpoint` and wait for its acknowledgement.
    ///
    /// Acks carry nothing but the endpoint, so an ack that arrives during this
    /// wait satisfies it even if the server meant it for an earlier, timed-out
    /// request for the same endpoint. Acks that arrived before this call are
    /// never considered.
    ///
    /// # Errors
    ///
    /// - whatever the sink returns for the request write
    /// - [`ChannelError::SubscriptionTimeout`] if no ack arrived in time
    /// - [`ChannelError::SubscriptionMismatch`] if only acks for other endpoints arrived
    /// - [`ChannelError::Closed`] if the client closed while waiting
    pub async fn subscribe<S>(&self, sink: &S, endpoint: &str) -> Result<(), ChannelError>
    where
        S: FrameSink + ?Sized,
    {
        let watch = self.acks.watch();
        sink.send_frame(&Frame::connect(endpoint)).await?;
        tracing::debug!(%endpoint, timeout = ?self.timeout, "channels: subscribe requested");

        match watch.pop_where(self.timeout, |ack| ack == endpoint).await {
            PopOutcome::Item(_) => {
                tracing::info!(%endpoint, "channels: subscribed");
                Ok(())
            }
            PopOutcome::TimedOut { unmatched } if unmatched.is_empty() => {
                tracing::warn!(%endpoint, "channels: subscribe timed out");
                Err(ChannelError::SubscriptionTimeout { endpoint: endpoint.to_owned() })
            }
            PopOutcome::TimedOut { unmatched } => {
                tracing::warn!(%endpoint, received = ?unmatched, "channels: subscribe ack mismatch");
                Err(ChannelError::SubscriptionMismatch { endpoint: endpoint.to_owned(), received: unmatched })
            }
            PopOutcome::Closed => Err(ChannelError::Closed),
        }
    }

    /// Leave `endpoint`. The server sends no acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns whatever the sink returns for the write.
    pub async fn unsubscribe<S>(&self, sink: &S, endpoint: &str) -> Result<(), ChannelError>
    where
        S: FrameSink + ?Sized,
    {
        sink.send_frame(&Frame::disconnect(endpoint)).await?;
        tracing::info!(%endpoint, "channels: unsubscribed");
        Ok(())
    }
}

#[cfg(test)]
#[path = "subscription_test.rs"]
mod tests;
