//! Domain error types for the shard manager
//!
//! Structural errors (discovery, construction, open) are returned to the
//! caller of the operation that hit them. Sink errors never reach a caller;
//! they surface as `Error` events on the bus.
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, PoolError>.

use thiserror::Error;

/// Error type crossing the collaborator trait seams (connections, sinks, count source)
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shard pool errors
///
/// Every variant carries the shard it concerns where there is one, so a
/// partially applied `start` or `restart_all` can be diagnosed from the
/// error alone:
/// ```text
/// PoolError::ConnectionOpen { shard_id: 3, .. }
/// → "failed opening shard 3"
/// ```
#[derive(Error, Debug)]
pub enum PoolError {
    /// Recommended shard count lookup failed
    #[error("recommended shard count lookup failed")]
    Discovery(#[source] BoxError),

    /// Connection factory could not produce a connection for this shard
    #[error("failed constructing connection for shard {shard_id}")]
    ConnectionInit {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// Connection failed (or timed out) while opening
    #[error("failed opening shard {shard_id}")]
    ConnectionOpen {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// Connection failed (or timed out) while closing
    #[error("failed closing shard {shard_id}")]
    ConnectionClose {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// Routing attempted before any shard exists
    #[error("shard pool is not initialized")]
    NotInitialized,

    /// Registry slot exists but holds no connection
    #[error("shard {shard_id} has no connection")]
    ShardUnavailable { shard_id: u32 },

    /// Status or log sink failed
    #[error("{sink} sink publish failed")]
    Publish {
        sink: &'static str,
        #[source]
        source: BoxError,
    },

    /// NATS connection failed
    #[error("NATS connection failed")]
    NatsConnectionFailed(#[source] BoxError),

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),
}

impl PoolError {
    /// Returns a static label string suitable for Prometheus metrics.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery",
            Self::ConnectionInit { .. } => "connection_init",
            Self::ConnectionOpen { .. } => "connection_open",
            Self::ConnectionClose { .. } => "connection_close",
            Self::NotInitialized => "not_initialized",
            Self::ShardUnavailable { .. } => "shard_unavailable",
            Self::Publish { .. } => "publish",
            Self::NatsConnectionFailed(_) => "nats_connection",
            Self::Config(_) => "config",
        }
    }

    /// Shard this error concerns, if any
    pub fn shard_id(&self) -> Option<u32> {
        match self {
            Self::ConnectionInit { shard_id, .. }
            | Self::ConnectionOpen { shard_id, .. }
            | Self::ConnectionClose { shard_id, .. }
            | Self::ShardUnavailable { shard_id } => Some(*shard_id),
            _ => None,
        }
    }

    /// Render the error followed by its whole source chain.
    ///
    /// Event messages are plain strings, so the chain is flattened here
    /// rather than lost behind the top-level message.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}
