//! Pool status snapshots
//!
//! A snapshot is recomputed on every request and never cached. It is
//! consistent per shard, not across shards.

mod publisher;

pub(crate) use publisher::spawn_status_task;

use crate::error::BoxError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Write as _;

/// Title of the persistent status message
pub const STATUS_TITLE: &str = "Sharding status";

/// Embed colour of the status message
pub const STATUS_COLOR: u32 = 0x4286f4;

/// Returns per-shard entity counts, index = shard index
pub type EntityCountFn = std::sync::Arc<dyn Fn() -> Vec<u64> + Send + Sync>;

/// Status of a single shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStatus {
    pub shard_id: u32,
    /// A connection exists for this slot
    pub started: bool,
    /// The connection reports ready
    pub healthy: bool,
    pub entities: u64,
}

/// Status of the whole pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub shards: Vec<ShardStatus>,
    pub total_entities: u64,
}

impl Status {
    /// Build a snapshot, totalling the per-shard entity counts
    pub fn new(shards: Vec<ShardStatus>) -> Self {
        let total_entities = shards.iter().map(|s| s.entities).sum();
        Self {
            shards,
            total_entities,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn healthy_shards(&self) -> usize {
        self.shards.iter().filter(|s| s.healthy).count()
    }

    /// One line per shard: `[index/count]: marker (shard entities, total entities)`
    pub fn render(&self) -> String {
        let count = self.shards.len();
        let mut out = String::new();

        for shard in &self.shards {
            let marker = if !shard.started {
                "🕒"
            } else if shard.healthy {
                "👌"
            } else {
                "🔥"
            };

            let _ = writeln!(
                out,
                "[{}/{}]: {} ({},{})",
                shard.shard_id, count, marker, shard.entities, self.total_entities
            );
        }

        out
    }
}

/// Title used to find and update the status message
pub fn status_title(name: Option<&str>) -> String {
    match name {
        Some(name) if !name.is_empty() => format!("{STATUS_TITLE} for {name}"),
        _ => STATUS_TITLE.to_string(),
    }
}

/// Destination for the persistent status message
#[async_trait]
pub trait StatusSink: Send + Sync + 'static {
    /// Find a previously published status message by title
    async fn find_existing(&self, title: &str) -> Result<Option<u64>, BoxError>;

    /// Create (`existing = None`) or update the status message, returning its id
    async fn publish(
        &self,
        existing: Option<u64>,
        title: &str,
        body: &str,
    ) -> Result<u64, BoxError>;
}
