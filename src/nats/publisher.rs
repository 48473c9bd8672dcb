//! NATS event sink

use crate::error::{BoxError, PoolError};
use crate::events::{Event, EventKind, LogSink};

use async_nats::Client;
use async_trait::async_trait;
use tracing::{debug, info};

/// Lifecycle events go to `shards.lifecycle.<kind>`
pub const SUBJECT_PREFIX: &str = "shards.lifecycle";

/// Subject an event of `kind` is published on
pub fn subject_for(kind: EventKind) -> String {
    format!("{SUBJECT_PREFIX}.{}", kind.as_str())
}

/// Log sink publishing serialized events to NATS
pub struct NatsEventSink {
    client: Client,
}

impl NatsEventSink {
    /// Connect to NATS server
    pub async fn connect(servers: &str) -> Result<Self, PoolError> {
        info!(servers, "Connecting to NATS");

        let client = async_nats::connect(servers)
            .await
            .map_err(|e| PoolError::NatsConnectionFailed(Box::new(e)))?;

        info!("Connected to NATS");
        Ok(Self { client })
    }

    /// Flush pending publishes
    pub async fn close(&self) {
        info!("Closing NATS connection");
        if let Err(e) = self.client.flush().await {
            debug!(error = %e, "NATS flush on close failed");
        }
    }
}

#[async_trait]
impl LogSink for NatsEventSink {
    async fn publish(&self, event: &Event, _rendered: &str) -> Result<(), BoxError> {
        let subject = subject_for(event.kind);
        let payload = serde_json::to_vec(event)?;

        debug!(subject, event_id = %event.event_id, "Publishing event");
        self.client.publish(subject, payload.into()).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}
