//! Gateway shard manager
//!
//! Supervises a pool of Discord gateway shards in one process:
//! - Sizes the pool from configuration or the gateway's recommendation
//! - Opens shards in order with a fixed delay between opens
//! - Routes guild traffic to the shard that owns it
//! - Restarts and grows the pool when shards outgrow it
//! - Publishes a live status message and lifecycle events

pub mod config;
pub mod discord;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod nats;
pub mod shard;
pub mod status;

pub use config::{GatewayConfig, PoolConfig, RescaleConfig, RescalePolicy};
pub use error::{BoxError, PoolError};
pub use events::{Event, EventBus, EventKind, LogSink};
pub use shard::{
    Connection, ConnectionFactory, LifecycleKind, ShardCountSource, ShardInfo, ShardManager,
    ShardManagerBuilder,
};
pub use status::{ShardStatus, Status, StatusSink};
