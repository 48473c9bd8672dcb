//! Periodic status publishing
//!
//! Wakes every `status_tick`, and when the status deadline has passed,
//! renders a fresh snapshot and creates or updates the status message.
//! Events pull the deadline forward, so activity shows up within
//! `status_nudge` instead of waiting for the next `status_refresh`.

use crate::error::{BoxError, PoolError};
use crate::shard::WeakShardManager;
use crate::status::{status_title, StatusSink};

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info};

/// Spawn the status task. It stops once the manager is dropped.
pub(crate) fn spawn_status_task(
    manager: WeakShardManager,
    sink: Arc<dyn StatusSink>,
) -> JoinHandle<()> {
    tokio::spawn(run(manager, sink))
}

async fn run(manager: WeakShardManager, sink: Arc<dyn StatusSink>) {
    let Some(handle) = manager.upgrade() else {
        return;
    };
    let config = handle.config().clone();
    let bus = handle.bus().clone();
    drop(handle);

    let title = status_title(config.name.as_deref());

    // Reuse a message left by a previous run if there is one
    let found = timeout(config.sink_timeout, sink.find_existing(&title))
        .await
        .unwrap_or_else(|elapsed| Err(Box::new(elapsed) as BoxError));
    let mut message = match found {
        Ok(found) => {
            debug!(?found, title = %title, "Status message lookup finished");
            found
        }
        Err(source) => {
            let err = PoolError::Publish { sink: "status", source };
            bus.emit_error(None, &err);
            None
        }
    };

    info!(title = %title, "Status task started");

    let mut ticker = interval(config.status_tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(handle) = manager.upgrade() else {
            break;
        };

        if !handle.status_deadline().is_due() {
            continue;
        }
        handle.status_deadline().set_in(config.status_refresh);

        let status = handle.full_status().await;
        let body = status.render();
        drop(handle);

        let published = timeout(config.sink_timeout, sink.publish(message, &title, &body))
            .await
            .unwrap_or_else(|elapsed| Err(Box::new(elapsed) as BoxError));

        match published {
            Ok(id) => {
                debug!(message_id = id, shards = status.shard_count(), "Status published");
                message = Some(id);
            }
            Err(source) => {
                let err = PoolError::Publish { sink: "status", source };
                bus.emit_error(None, &err);
            }
        }
    }

    debug!("Status task stopped");
}
