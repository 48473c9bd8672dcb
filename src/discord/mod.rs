//! Discord collaborators
//!
//! Twilight implementations of the pool's connection, discovery and sink
//! contracts.

mod connection;
mod http;

pub use connection::{TwilightConnection, TwilightConnectionFactory};
pub use http::{DiscordLogSink, DiscordStatusSink, GatewayBotShardCount};
