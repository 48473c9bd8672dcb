//! Guild to shard routing

/// Bits below the timestamp in a Discord snowflake
pub const SNOWFLAKE_TIMESTAMP_SHIFT: u32 = 22;

/// Shard that direct messages (no guild) are routed to
pub const DM_SHARD: u32 = 0;

/// Shard index for an entity: `(id >> 22) % shard_count`.
///
/// `shard_count` must be at least 1.
pub fn shard_for(entity_id: u64, shard_count: u32) -> u32 {
    debug_assert!(shard_count >= 1, "shard_count must be >= 1");
    ((entity_id >> SNOWFLAKE_TIMESTAMP_SHIFT) % u64::from(shard_count.max(1))) as u32
}
