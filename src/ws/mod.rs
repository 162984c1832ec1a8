//! Streaming client for the eToro WebSocket API.
//!
//! # Architecture
//!
//! - [`Client`]: connection lifecycle, `Authenticate` handshake, subscriptions and reconnection
//! - [`Router`]: classifies topic messages into instrument rates and private events
//! - [`SubscriptionTracker`]: the topic set replayed after every reconnect
//! - [`Transport`]: opens connections; [`TungsteniteTransport`] is the production implementation
//!
//! Every connection is driven by one receive loop task that owns both halves of the socket, so
//! outbound requests are serialized and listeners run in the order messages arrive.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod router;
pub mod subscription;
pub mod transport;
pub mod types;

pub use client::Client;
pub use connection::ConnectionState;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use events::{Event, EventKind, ListenerId};
pub use router::{JsonCodec, PayloadCodec, RoutedMessage, Router, parse_envelope};
pub use subscription::SubscriptionTracker;
pub use transport::{Transport, TungsteniteTransport};
