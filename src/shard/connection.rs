//! Collaborator contracts
//!
//! The manager supervises connections; it does not speak the gateway
//! protocol. Anything implementing [`Connection`] can be pooled.

use crate::error::BoxError;
use async_trait::async_trait;
use std::sync::Arc;

/// Lifecycle signals a connection reports to its handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    Connected,
    Disconnected,
    Ready,
    Resumed,
}

/// A connection's state at the moment it raised a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardInfo {
    pub shard_id: u32,
    pub shard_count: u32,
    pub ready: bool,
    pub entity_count: u64,
}

/// Callback attached to every connection in the pool
pub type LifecycleHandler = Arc<dyn Fn(LifecycleKind, &ShardInfo) + Send + Sync>;

/// One shard's link to the gateway.
///
/// Shard index and count are set by the manager before `open` and may be
/// changed between a `close` and the next `open` when the pool rescales.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Shard index (0-based)
    fn shard_id(&self) -> u32;

    /// Shard count this connection identifies with
    fn shard_count(&self) -> u32;

    /// Set index and count; takes effect on the next `open`
    fn set_shard(&self, shard_id: u32, shard_count: u32);

    /// Start the connection
    async fn open(&self) -> Result<(), BoxError>;

    /// Stop the connection
    async fn close(&self) -> Result<(), BoxError>;

    /// Whether the initial handshake has completed
    fn is_ready(&self) -> bool;

    /// Approximate number of entities (guilds) routed to this shard
    fn entity_count(&self) -> u64;

    /// Attach a lifecycle handler. Handlers must be called from the
    /// connection's own task, never from inside `open` or `close`.
    fn add_handler(&self, handler: LifecycleHandler);

    /// Snapshot handed to lifecycle handlers
    fn info(&self) -> ShardInfo {
        ShardInfo {
            shard_id: self.shard_id(),
            shard_count: self.shard_count(),
            ready: self.is_ready(),
            entity_count: self.entity_count(),
        }
    }
}

/// Produces bare connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    async fn create(&self, token: &str) -> Result<Arc<dyn Connection>, BoxError>;
}

/// Source of the gateway's recommended shard count
#[async_trait]
pub trait ShardCountSource: Send + Sync + 'static {
    async fn recommended_shard_count(&self, token: &str) -> Result<u32, BoxError>;
}
