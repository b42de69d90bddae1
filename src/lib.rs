//! Push-notification channel client for QA harnesses.
//!
//! Connects to a server's notification channel, subscribes to groups and
//! hands pushed events to the test. One HTTP handshake yields a session id;
//! a websocket keyed by that id then carries colon-delimited text frames
//! (see the `frames` crate). A background task answers heartbeats and sorts
//! inbound frames into an event queue and an ack queue.
//!
//! ```no_run
//! use channels::{Client, ClientOptions, groups};
//!
//! # async fn run() -> Result<(), channels::ChannelError> {
//! let options = ClientOptions::new("session-token").with_port(8013);
//! Client::scoped(options, "https://tower.example", async |client: &Client| -> Result<(), channels::ChannelError> {
//!     client.subscribe(&[groups::group_endpoint(groups::LIMIT_REACHED, 42)]).await?;
//!     while let Some(event) = client.recv(true, None).await {
//!         println!("{} {}", event.group, event.payload);
//!     }
//!     Ok(())
//! })
//! .await
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod groups;
pub mod negotiate;
pub mod queue;
pub mod subscription;
pub mod tls;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::Client;
pub use config::{ClientOptions, HarnessConfig, Origin, OriginSource};
pub use dispatch::Event;
pub use error::{ChannelError, NegotiationError};
pub use negotiate::Session;
pub use transport::ConnectionState;
