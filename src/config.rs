//! Pool and process configuration
//!
//! `PoolConfig` is owned by the caller and handed to the manager at
//! construction. `GatewayConfig` is the binary's view, loaded from the
//! environment.

use crate::error::PoolError;
use serde::de::DeserializeOwned;
use std::time::Duration;
use twilight_gateway::Intents;

/// Default delay between successive shard opens (one identify every 5 seconds)
pub const DEFAULT_OPEN_DELAY: Duration = Duration::from_secs(5);

/// Default guild count at which a disconnecting shard triggers a rescale.
///
/// Discord refuses shards holding 2500 guilds or more.
pub const DEFAULT_ENTITY_THRESHOLD: u64 = 2400;

/// How the desired shard count is computed on restart
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RescalePolicy {
    /// Re-query the recommended count source
    Recommended,
    /// Multiply the current count by `factor`, rounding up
    Grow { factor: f64 },
}

impl Default for RescalePolicy {
    fn default() -> Self {
        Self::Recommended
    }
}

impl RescalePolicy {
    /// Desired count under the `Grow` policy; `None` for `Recommended`
    pub fn grown(&self, current: u32) -> Option<u32> {
        match self {
            Self::Recommended => None,
            Self::Grow { factor } => {
                let grown = (f64::from(current.max(1)) * factor).ceil();
                Some(grown.min(f64::from(u32::MAX)) as u32)
            }
        }
    }
}

/// Automatic rescale settings
#[derive(Debug, Clone, PartialEq)]
pub struct RescaleConfig {
    pub policy: RescalePolicy,
    /// Entity count at or above which a disconnect triggers `restart_all`.
    /// `None` disables automatic rescaling.
    pub entity_threshold: Option<u64>,
}

impl Default for RescaleConfig {
    fn default() -> Self {
        Self {
            policy: RescalePolicy::default(),
            entity_threshold: Some(DEFAULT_ENTITY_THRESHOLD),
        }
    }
}

/// Shard pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Identity token handed to every connection
    pub token: String,

    /// Bot name, used as a prefix on rendered events and in the status title
    pub name: Option<String>,

    /// Explicit shard count; `None` (or 0) asks the recommended count source
    pub shard_count: Option<u32>,

    /// Delay between successive opens
    pub open_delay: Duration,

    /// Upper bound on a single connection construction or open
    pub open_timeout: Duration,

    /// Upper bound on a single connection close
    pub close_timeout: Duration,

    /// Upper bound on a recommended count lookup
    pub discovery_timeout: Duration,

    /// How often the status task checks whether a publish is due
    pub status_tick: Duration,

    /// Interval between status publishes absent any events
    pub status_refresh: Duration,

    /// How soon after an event the status is republished
    pub status_nudge: Duration,

    /// Upper bound on a single status or log sink call
    pub sink_timeout: Duration,

    pub rescale: RescaleConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            name: None,
            shard_count: None,
            open_delay: DEFAULT_OPEN_DELAY,
            open_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(15),
            status_tick: Duration::from_secs(1),
            status_refresh: Duration::from_secs(60),
            status_nudge: Duration::from_secs(2),
            sink_timeout: Duration::from_secs(10),
            rescale: RescaleConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Configuration with defaults for everything but the token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// Reject configurations the manager cannot run with
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.token.trim().is_empty() {
            return Err(PoolError::Config("token must not be empty".to_string()));
        }

        if let RescalePolicy::Grow { factor } = self.rescale.policy {
            if !factor.is_finite() || factor <= 1.0 {
                return Err(PoolError::Config(format!(
                    "rescale growth factor must be a finite number > 1, got {factor}"
                )));
            }
        }

        if self.rescale.entity_threshold == Some(0) {
            return Err(PoolError::Config(
                "rescale entity threshold cannot be 0".to_string(),
            ));
        }

        if self.status_tick.is_zero() {
            return Err(PoolError::Config("status tick cannot be 0".to_string()));
        }

        Ok(())
    }
}

/// Process configuration for the gateway binary
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Discord bot token
    pub discord_token: String,

    /// Explicit shard count (None = ask Discord)
    pub total_shards: Option<u32>,

    /// Bot name shown in status and log messages
    pub bot_name: Option<String>,

    /// Channel holding the persistent status message
    pub status_channel_id: Option<u64>,

    /// Channel receiving lifecycle notices
    pub log_channel_id: Option<u64>,

    /// NATS server URL(s) - comma-separated for multiple servers
    pub nats_url: Option<String>,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Seconds between shard opens
    pub open_delay_secs: u64,

    /// Guild count triggering a rescale on disconnect (0 disables)
    pub rescale_threshold: u64,

    /// Growth factor for rescales; unset re-queries Discord
    pub rescale_growth: Option<f64>,
}

impl GatewayConfig {
    /// Load configuration from `.env` and environment variables
    pub fn from_env() -> Result<Self, PoolError> {
        dotenvy::dotenv().ok();

        let settings = ::config::Config::builder()
            .add_source(::config::Environment::default())
            .build()
            .map_err(|e| PoolError::Config(e.to_string()))?;

        let discord_token = settings
            .get_string("discord_token")
            .or_else(|_| settings.get_string("discord_bot_token"))
            .map_err(|_| {
                PoolError::Config("DISCORD_TOKEN or DISCORD_BOT_TOKEN must be set".to_string())
            })?;

        Ok(Self {
            discord_token,
            total_shards: optional(&settings, "total_shards")?,
            bot_name: optional(&settings, "bot_name")?,
            status_channel_id: optional(&settings, "status_channel_id")?,
            log_channel_id: optional(&settings, "log_channel_id")?,
            nats_url: optional(&settings, "nats_url")?,
            http_port: optional(&settings, "http_port")?.unwrap_or(9090),
            log_level: optional(&settings, "log_level")?.unwrap_or_else(|| "info".to_string()),
            open_delay_secs: optional(&settings, "open_delay_secs")?
                .unwrap_or(DEFAULT_OPEN_DELAY.as_secs()),
            rescale_threshold: optional(&settings, "rescale_threshold")?
                .unwrap_or(DEFAULT_ENTITY_THRESHOLD),
            rescale_growth: optional(&settings, "rescale_growth")?,
        })
    }

    /// Build the library configuration from the process configuration
    pub fn pool_config(&self) -> PoolConfig {
        let policy = match self.rescale_growth {
            Some(factor) => RescalePolicy::Grow { factor },
            None => RescalePolicy::Recommended,
        };

        PoolConfig {
            token: self.discord_token.clone(),
            name: self.bot_name.clone(),
            shard_count: self.total_shards,
            open_delay: Duration::from_secs(self.open_delay_secs),
            rescale: RescaleConfig {
                policy,
                entity_threshold: (self.rescale_threshold > 0).then_some(self.rescale_threshold),
            },
            ..PoolConfig::default()
        }
    }

    /// Gateway intents: guild lifecycle only, enough to count guilds per shard
    pub fn intents() -> Intents {
        Intents::GUILDS
    }
}

/// Read an optional key, treating absence as `None` and a malformed value as an error
fn optional<T: DeserializeOwned>(
    settings: &::config::Config,
    key: &str,
) -> Result<Option<T>, PoolError> {
    match settings.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(::config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(PoolError::Config(format!(
            "{} is invalid: {e}",
            key.to_uppercase()
        ))),
    }
}
