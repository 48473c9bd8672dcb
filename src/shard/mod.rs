//! Shard management module
//!
//! Connection contracts, the slot registry, guild routing and the pool
//! controller that ties them together.

mod connection;
mod manager;
pub(crate) mod registry;
pub mod router;

pub use connection::{
    Connection, ConnectionFactory, LifecycleHandler, LifecycleKind, ShardCountSource, ShardInfo,
};
pub(crate) use manager::WeakShardManager;
pub use manager::{ShardManager, ShardManagerBuilder};
pub use router::shard_for;
