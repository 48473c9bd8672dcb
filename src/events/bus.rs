//! Event bus
//!
//! `emit` never blocks and never fails. Events are queued to a dispatcher
//! task which hands each one to the user callback and the log sinks on
//! their own tasks, so two events emitted back to back may be delivered
//! in either order.

use crate::error::{BoxError, PoolError};
use crate::events::event::{Event, EventKind};
use crate::metrics;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// User callback invoked for every event
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Destination for human-readable lifecycle notices
#[async_trait]
pub trait LogSink: Send + Sync + 'static {
    /// Publish one rendered event
    async fn publish(&self, event: &Event, rendered: &str) -> Result<(), BoxError>;

    /// Label used in errors and metrics
    fn name(&self) -> &'static str {
        "log"
    }
}

/// When the next status publish is due.
///
/// Stored as milliseconds past a fixed base instant so the hot path is a
/// single atomic. Starts out never due.
#[derive(Debug, Clone)]
pub(crate) struct StatusDeadline {
    base: Instant,
    due_ms: Arc<AtomicU64>,
}

impl StatusDeadline {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            due_ms: Arc::new(AtomicU64::new(u64::MAX)),
        }
    }

    fn offset_in(&self, after: Duration) -> u64 {
        (Instant::now() + after)
            .saturating_duration_since(self.base)
            .as_millis() as u64
    }

    pub(crate) fn is_due(&self) -> bool {
        self.offset_in(Duration::ZERO) >= self.due_ms.load(Ordering::Acquire)
    }

    /// Set the deadline, later or earlier than the current one
    pub(crate) fn set_in(&self, after: Duration) {
        self.due_ms.store(self.offset_in(after), Ordering::Release);
    }

    /// Move the deadline to `within` from now unless it is already sooner
    pub(crate) fn pull_forward(&self, within: Duration) {
        self.due_ms.fetch_min(self.offset_in(within), Ordering::AcqRel);
    }
}

/// Everything the dispatcher needs besides the queue
pub(crate) struct BusOptions {
    pub name: Option<String>,
    pub on_event: Option<EventCallback>,
    pub log_sinks: Vec<Arc<dyn LogSink>>,
    pub sink_timeout: Duration,
}

/// Cloneable handle for emitting events
#[derive(Clone)]
pub struct EventBus {
    queue: mpsc::UnboundedSender<Event>,
    shard_count: Arc<AtomicU32>,
    deadline: StatusDeadline,
    nudge: Duration,
}

impl EventBus {
    /// Create the bus and spawn its dispatcher. Must run inside a Tokio runtime.
    ///
    /// The dispatcher stops once every bus handle is dropped.
    pub(crate) fn spawn(
        shard_count: Arc<AtomicU32>,
        deadline: StatusDeadline,
        nudge: Duration,
        options: BusOptions,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(rx, queue.downgrade(), options));

        Self {
            queue,
            shard_count,
            deadline,
            nudge,
        }
    }

    /// Current shard count as seen by events
    pub fn shard_count(&self) -> u32 {
        self.shard_count.load(Ordering::Acquire)
    }

    /// Emit an event for `shard_id` (`None` = pool-wide)
    pub fn emit(&self, kind: EventKind, shard_id: Option<u32>, message: impl Into<String>) {
        let event = Event::new(kind, shard_id, self.shard_count(), message);

        match kind {
            EventKind::Error => warn!(
                shard_id = ?event.shard_id,
                shard_count = event.shard_count,
                message = %event.message,
                "Shard pool error"
            ),
            _ => info!(
                shard_id = ?event.shard_id,
                shard_count = event.shard_count,
                kind = kind.as_str(),
                "Shard {}", kind.as_str()
            ),
        }

        metrics::record_event(kind);
        self.deadline.pull_forward(self.nudge);

        // Only fails once the dispatcher is gone, i.e. during teardown
        let _ = self.queue.send(event);
    }

    /// Report a non-fatal error as an `Error` event
    pub fn emit_error(&self, shard_id: Option<u32>, err: &PoolError) {
        metrics::record_error(err.error_type_label());
        self.emit(EventKind::Error, shard_id, err.report());
    }
}

async fn dispatch(
    mut queue: mpsc::UnboundedReceiver<Event>,
    errors: mpsc::WeakUnboundedSender<Event>,
    options: BusOptions,
) {
    let BusOptions {
        name,
        on_event,
        log_sinks,
        sink_timeout,
    } = options;

    while let Some(event) = queue.recv().await {
        if let Some(callback) = &on_event {
            let callback = Arc::clone(callback);
            let event = event.clone();
            tokio::spawn(async move { callback(event) });
        }

        // Errors stay off the log sinks: a failing sink would report itself forever
        if event.kind == EventKind::Error || log_sinks.is_empty() {
            continue;
        }

        let rendered = event.render(name.as_deref());
        for sink in &log_sinks {
            let sink = Arc::clone(sink);
            let event = event.clone();
            let rendered = rendered.clone();
            let errors = errors.clone();

            tokio::spawn(async move {
                let result = match timeout(sink_timeout, sink.publish(&event, &rendered)).await {
                    Ok(result) => result,
                    Err(elapsed) => Err(Box::new(elapsed) as BoxError),
                };

                if let Err(source) = result {
                    let err = PoolError::Publish {
                        sink: sink.name(),
                        source,
                    };
                    metrics::record_error(err.error_type_label());
                    warn!(error = %err.report(), "Failed sending event to log sink");

                    if let Some(queue) = errors.upgrade() {
                        let _ = queue.send(Event::new(
                            EventKind::Error,
                            event.shard_id,
                            event.shard_count,
                            format!("failed sending event to log sink: {}", err.report()),
                        ));
                    }
                }
            });
        }
    }

    debug!("Event bus dispatcher stopped");
}
