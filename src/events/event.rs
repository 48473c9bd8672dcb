//! Event values
//!
//! Serialized as JSON for the NATS sink and rendered as one line of text for
//! chat sinks and logs.

use crate::shard::LifecycleKind;
use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Kind of lifecycle transition an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Connection to the gateway was established
    Connected,
    /// Connection to the gateway was lost
    Disconnected,
    /// Session was resumed after a disconnect
    Resumed,
    /// Shard completed its initial handshake
    Ready,
    /// The manager opened the shard
    Open,
    /// The manager closed the shard
    Close,
    /// Something failed
    Error,
}

impl EventKind {
    /// Lowercase past-tense label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Resumed => "resumed",
            Self::Ready => "ready",
            Self::Open => "opened",
            Self::Close => "closed",
            Self::Error => "error",
        }
    }

    /// Embed colour for chat sinks
    pub fn color(&self) -> u32 {
        match self {
            Self::Open => 0xec58fc,
            Self::Close => 0xff7621,
            Self::Connected => 0x54d646,
            Self::Disconnected => 0xcc2424,
            Self::Resumed => 0x5985ff,
            Self::Ready => 0x00ffbf,
            Self::Error => 0x7a1bad,
        }
    }
}

impl From<LifecycleKind> for EventKind {
    fn from(kind: LifecycleKind) -> Self {
        match kind {
            LifecycleKind::Connected => Self::Connected,
            LifecycleKind::Disconnected => Self::Disconnected,
            LifecycleKind::Ready => Self::Ready,
            LifecycleKind::Resumed => Self::Resumed,
        }
    }
}

/// A lifecycle event
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_id: Uuid,
    pub kind: EventKind,
    /// Shard the event concerns; `None` for pool-wide events
    pub shard_id: Option<u32>,
    /// Shard count at emission time
    pub shard_count: u32,
    pub message: String,
    /// Unix milliseconds
    pub timestamp: u64,
}

impl Event {
    pub fn new(
        kind: EventKind,
        shard_id: Option<u32>,
        shard_count: u32,
        message: impl Into<String>,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            event_id: Uuid::new_v4(),
            kind,
            shard_id,
            shard_count,
            message: message.into(),
            timestamp,
        }
    }

    /// Render for humans, prefixed with the bot name when there is one
    pub fn render(&self, name: Option<&str>) -> String {
        match name {
            Some(name) if !name.is_empty() => format!("{name}: {self}"),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(shard_id) = self.shard_id {
            write!(f, "[{}/{}] ", shard_id, self.shard_count)?;
        }

        let label = self.kind.as_str();
        let mut chars = label.chars();
        if let Some(first) = chars.next() {
            write!(f, "{}{}", first.to_ascii_uppercase(), chars.as_str())?;
        }

        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }

        Ok(())
    }
}
