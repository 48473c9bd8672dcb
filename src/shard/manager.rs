//! Shard pool controller
//!
//! Owns the registry and is its only mutator. Lifecycle operations
//! (`initialize`, `start`, `stop_all`, `restart_all`, `rescale_to`) take the
//! registry's write lock for their whole duration, stagger delays included.
//! Routing and status reads share the read lock, so they wait out a start
//! or rescale but never observe a half-built pool.

use crate::config::PoolConfig;
use crate::error::{BoxError, PoolError};
use crate::events::{BusOptions, Event, EventBus, EventCallback, EventKind, LogSink, StatusDeadline};
use crate::metrics;
use crate::shard::connection::{
    Connection, ConnectionFactory, LifecycleHandler, LifecycleKind, ShardCountSource, ShardInfo,
};
use crate::shard::registry::Registry;
use crate::shard::router::{shard_for, DM_SHARD};
use crate::status::{spawn_status_task, EntityCountFn, ShardStatus, Status, StatusSink};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Supervises one connection per shard
#[derive(Clone)]
pub struct ShardManager {
    inner: Arc<ManagerInner>,
}

/// Non-owning handle held by background tasks and lifecycle handlers
#[derive(Clone)]
pub(crate) struct WeakShardManager(Weak<ManagerInner>);

impl WeakShardManager {
    pub(crate) fn upgrade(&self) -> Option<ShardManager> {
        self.0.upgrade().map(|inner| ShardManager { inner })
    }
}

struct ManagerInner {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    counts: Arc<dyn ShardCountSource>,
    registry: RwLock<Registry>,
    /// Mirror of the registry length, readable while the write lock is held
    shard_count: Arc<AtomicU32>,
    bus: EventBus,
    deadline: StatusDeadline,
    status_sink: Option<Arc<dyn StatusSink>>,
    entity_counts: Option<EntityCountFn>,
    status_task_started: AtomicBool,
    rescales_in_flight: AtomicUsize,
    started: AtomicBool,
}

/// What a restart reconciles the pool to
#[derive(Debug, Clone, Copy)]
enum RescaleTarget {
    /// Whatever the configured rescale policy asks for
    Policy,
    /// Policy-driven, triggered by a disconnect; skipped once the pool is stopped
    Automatic,
    /// An explicit shard count
    Exact(u32),
}

/// Enforces the delay between successive opens
struct Stagger {
    delay: Duration,
    first: bool,
}

impl Stagger {
    fn new(delay: Duration) -> Self {
        Self { delay, first: true }
    }

    async fn wait(&mut self) {
        if std::mem::take(&mut self.first) || self.delay.is_zero() {
            return;
        }
        sleep(self.delay).await;
    }
}

/// Counts a restart as in flight until dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }

    /// Adopt a slot already claimed by the caller
    fn claimed(counter: &'a AtomicUsize) -> Self {
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Builder for [`ShardManager`]
pub struct ShardManagerBuilder {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    counts: Arc<dyn ShardCountSource>,
    on_event: Option<EventCallback>,
    status_sink: Option<Arc<dyn StatusSink>>,
    log_sinks: Vec<Arc<dyn LogSink>>,
    entity_counts: Option<EntityCountFn>,
}

impl ShardManagerBuilder {
    /// Callback invoked (on its own task) for every event
    pub fn on_event(mut self, callback: impl Fn(Event) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(callback));
        self
    }

    /// Keep a status message up to date through `sink`
    pub fn status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = Some(sink);
        self
    }

    /// Send rendered lifecycle notices to `sink`. May be called repeatedly.
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sinks.push(sink);
        self
    }

    /// Per-shard entity counts for status snapshots, overriding the
    /// connections' own counts
    pub fn entity_counts(mut self, counts: impl Fn() -> Vec<u64> + Send + Sync + 'static) -> Self {
        self.entity_counts = Some(Arc::new(counts));
        self
    }

    /// Validate the configuration and build the manager.
    ///
    /// Spawns the event dispatcher, so it must be called inside a Tokio runtime.
    pub fn build(self) -> Result<ShardManager, PoolError> {
        self.config.validate()?;

        let shard_count = Arc::new(AtomicU32::new(0));
        let deadline = StatusDeadline::new();
        let bus = EventBus::spawn(
            Arc::clone(&shard_count),
            deadline.clone(),
            self.config.status_nudge,
            BusOptions {
                name: self.config.name.clone(),
                on_event: self.on_event,
                log_sinks: self.log_sinks,
                sink_timeout: self.config.sink_timeout,
            },
        );
        let threshold = self.config.rescale.entity_threshold;

        let inner = Arc::new_cyclic(|weak| {
            let mut registry = Registry::new();
            registry.add_handler(lifecycle_handler(
                WeakShardManager(Weak::clone(weak)),
                bus.clone(),
                threshold,
            ));

            ManagerInner {
                config: self.config,
                factory: self.factory,
                counts: self.counts,
                registry: RwLock::new(registry),
                shard_count,
                bus,
                deadline,
                status_sink: self.status_sink,
                entity_counts: self.entity_counts,
                status_task_started: AtomicBool::new(false),
                rescales_in_flight: AtomicUsize::new(0),
                started: AtomicBool::new(false),
            }
        });

        Ok(ShardManager { inner })
    }
}

/// Forwards connection signals to the bus and watches disconnects for
/// shards that have outgrown the pool
fn lifecycle_handler(
    manager: WeakShardManager,
    bus: EventBus,
    threshold: Option<u64>,
) -> LifecycleHandler {
    Arc::new(move |kind: LifecycleKind, info: &ShardInfo| {
        if kind == LifecycleKind::Disconnected {
            if let Some(threshold) = threshold {
                if info.entity_count >= threshold {
                    if let Some(manager) = manager.upgrade() {
                        manager.spawn_rescale(info, threshold);
                    }
                }
            }
        }

        bus.emit(kind.into(), Some(info.shard_id), "");
    })
}

impl ShardManager {
    /// Start building a manager
    pub fn builder(
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
        counts: Arc<dyn ShardCountSource>,
    ) -> ShardManagerBuilder {
        ShardManagerBuilder {
            config,
            factory,
            counts,
            on_event: None,
            status_sink: None,
            log_sinks: Vec::new(),
            entity_counts: None,
        }
    }

    /// Size the registry and construct one connection per shard.
    ///
    /// Uses the configured shard count, or asks the count source when none
    /// is set. A discovery failure leaves the pool untouched; a construction
    /// failure leaves the connections built so far in place. Calling this on
    /// an already populated pool does nothing.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        let mut registry = self.inner.registry.write().await;
        self.initialize_locked(&mut registry).await
    }

    /// Open every shard in index order, `open_delay` apart.
    ///
    /// Initializes first if the pool is empty. Stops at the first failing
    /// shard; shards before it stay open.
    pub async fn start(&self) -> Result<(), PoolError> {
        let mut registry = self.inner.registry.write().await;
        if registry.is_empty() {
            self.initialize_locked(&mut registry).await?;
        }
        self.ensure_status_task();

        let shard_count = registry.len() as u32;
        info!(
            shard_count,
            open_delay_ms = self.inner.config.open_delay.as_millis() as u64,
            "Starting shard pool"
        );

        let mut stagger = Stagger::new(self.inner.config.open_delay);
        for shard_id in 0..shard_count {
            stagger.wait().await;

            let existing = registry.get(shard_id).cloned();
            let conn = match existing {
                Some(conn) => conn,
                None => self.construct(&mut registry, shard_id, shard_count).await?,
            };
            self.open_shard(shard_id, &conn).await?;
        }

        self.inner.started.store(true, Ordering::Release);
        info!(shard_count, "All shards opened");
        Ok(())
    }

    /// Close every shard, attempting all of them.
    ///
    /// Returns the last close error if any close failed.
    pub async fn stop_all(&self) -> Result<(), PoolError> {
        let registry = self.inner.registry.write().await;
        info!(shard_count = registry.len(), "Stopping all shards");

        let result = self.stop_locked(&registry).await;
        self.inner.started.store(false, Ordering::Release);
        result
    }

    /// Stop and reopen every shard, growing the pool if the rescale policy
    /// asks for more shards than exist.
    ///
    /// The desired count is computed before anything is closed, so a
    /// discovery failure leaves the pool as it was. The pool never shrinks.
    pub async fn restart_all(&self) -> Result<(), PoolError> {
        let _in_flight = InFlight::enter(&self.inner.rescales_in_flight);
        self.reconcile(RescaleTarget::Policy).await
    }

    /// Restart the pool with `shard_count` shards (never fewer than now)
    pub async fn rescale_to(&self, shard_count: u32) -> Result<(), PoolError> {
        let _in_flight = InFlight::enter(&self.inner.rescales_in_flight);
        self.reconcile(RescaleTarget::Exact(shard_count)).await
    }

    /// Current shard count (0 before initialization)
    pub fn shard_count(&self) -> u32 {
        self.inner.shard_count.load(Ordering::Acquire)
    }

    /// Whether `start` has completed and `stop_all` has not been called since
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Whether a restart or rescale is running or queued
    pub fn is_rescaling(&self) -> bool {
        self.inner.rescales_in_flight.load(Ordering::Acquire) > 0
    }

    /// Connection for a shard index
    pub async fn connection(&self, shard_id: u32) -> Option<Arc<dyn Connection>> {
        self.inner.registry.read().await.get(shard_id).cloned()
    }

    /// Connection serving the guild `entity_id`.
    ///
    /// Valid at the time of the call; a concurrent rescale may reassign it.
    pub async fn route_for(&self, entity_id: u64) -> Result<Arc<dyn Connection>, PoolError> {
        let registry = self.inner.registry.read().await;
        if registry.is_empty() {
            return Err(PoolError::NotInitialized);
        }

        let shard_id = shard_for(entity_id, registry.len() as u32);
        registry
            .get(shard_id)
            .cloned()
            .ok_or(PoolError::ShardUnavailable { shard_id })
    }

    /// Connection used for operations outside any guild
    pub async fn route_for_dm(&self) -> Result<Arc<dyn Connection>, PoolError> {
        let registry = self.inner.registry.read().await;
        if registry.is_empty() {
            return Err(PoolError::NotInitialized);
        }

        registry
            .get(DM_SHARD)
            .cloned()
            .ok_or(PoolError::ShardUnavailable { shard_id: DM_SHARD })
    }

    /// Point-in-time status of every shard
    pub async fn full_status(&self) -> Status {
        let provided = self.inner.entity_counts.as_ref().map(|counts| counts());

        let registry = self.inner.registry.read().await;
        let shards = registry
            .slots()
            .map(|(shard_id, slot)| {
                let entities = match &provided {
                    Some(counts) => counts.get(shard_id as usize).copied().unwrap_or(0),
                    None => slot.map_or(0, |conn| conn.entity_count()),
                };

                ShardStatus {
                    shard_id,
                    started: slot.is_some(),
                    healthy: slot.is_some_and(|conn| conn.is_ready()),
                    entities,
                }
            })
            .collect();
        drop(registry);

        let status = Status::new(shards);
        metrics::set_status(status.healthy_shards(), status.total_entities);
        status
    }

    /// Register a lifecycle handler on every current and future connection
    pub async fn add_handler(
        &self,
        handler: impl Fn(LifecycleKind, &ShardInfo) + Send + Sync + 'static,
    ) {
        let mut registry = self.inner.registry.write().await;
        registry.add_handler(Arc::new(handler));
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub(crate) fn status_deadline(&self) -> &StatusDeadline {
        &self.inner.deadline
    }

    pub(crate) fn downgrade(&self) -> WeakShardManager {
        WeakShardManager(Arc::downgrade(&self.inner))
    }

    async fn initialize_locked(&self, registry: &mut Registry) -> Result<(), PoolError> {
        if !registry.is_empty() {
            warn!(shard_count = registry.len(), "Shard pool already initialized");
            return Ok(());
        }

        let shard_count = match self.inner.config.shard_count.filter(|&n| n > 0) {
            Some(n) => n,
            None => self.discover().await?,
        };

        info!(shard_count, "Initializing shard pool");

        registry.grow(shard_count);
        self.inner.shard_count.store(shard_count, Ordering::Release);
        metrics::set_shard_count(shard_count);

        for shard_id in 0..shard_count {
            self.construct(registry, shard_id, shard_count).await?;
        }

        self.ensure_status_task();
        self.inner.deadline.set_in(Duration::ZERO);
        Ok(())
    }

    async fn reconcile(&self, target: RescaleTarget) -> Result<(), PoolError> {
        let mut registry = self.inner.registry.write().await;
        let current = registry.len() as u32;

        // A stop_all may have run between the trigger and taking the lock
        if matches!(target, RescaleTarget::Automatic) && !self.is_started() {
            debug!(shard_count = current, "Shard pool not running, skipping automatic rescale");
            return Ok(());
        }

        let desired = match target {
            RescaleTarget::Exact(n) => n,
            RescaleTarget::Policy | RescaleTarget::Automatic => match self.inner.config.rescale.policy.grown(current) {
                Some(grown) => grown,
                None => self.discover().await?,
            },
        };
        let shard_count = desired.max(current).max(1);

        info!(from = current, to = shard_count, "Restarting shard pool");

        if let Err(err) = self.stop_locked(&registry).await {
            self.inner.bus.emit_error(err.shard_id(), &err);
        }

        registry.grow(shard_count);
        self.inner.shard_count.store(shard_count, Ordering::Release);
        metrics::set_shard_count(shard_count);

        // One stagger sequence across reconfigured and newly added shards
        let mut stagger = Stagger::new(self.inner.config.open_delay);
        for shard_id in 0..shard_count {
            stagger.wait().await;

            let existing = registry.get(shard_id).cloned();
            let conn = match existing {
                Some(conn) => {
                    conn.set_shard(shard_id, shard_count);
                    conn
                }
                None => self.construct(&mut registry, shard_id, shard_count).await?,
            };
            self.open_shard(shard_id, &conn).await?;
        }

        self.inner.started.store(true, Ordering::Release);
        self.ensure_status_task();
        metrics::record_rescale(shard_count);
        info!(from = current, to = shard_count, "Shard pool restarted");
        Ok(())
    }

    /// Start an automatic restart on its own task unless one is already in flight
    fn spawn_rescale(&self, info: &ShardInfo, threshold: u64) {
        if !self.is_started() {
            debug!(
                shard_id = info.shard_id,
                "Shard pool not running, ignoring disconnect at capacity"
            );
            return;
        }

        let claimed = self
            .inner
            .rescales_in_flight
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !claimed {
            debug!(shard_id = info.shard_id, "Restart already in flight, not triggering another");
            return;
        }

        warn!(
            shard_id = info.shard_id,
            entity_count = info.entity_count,
            threshold,
            "Disconnected shard is at capacity, restarting pool"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            let _in_flight = InFlight::claimed(&manager.inner.rescales_in_flight);
            if let Err(err) = manager.reconcile(RescaleTarget::Automatic).await {
                error!(error = %err.report(), "Automatic rescale failed");
                manager.inner.bus.emit_error(err.shard_id(), &err);
            }
        });
    }

    async fn stop_locked(&self, registry: &Registry) -> Result<(), PoolError> {
        let mut last_error = None;

        for (shard_id, conn) in registry.connections() {
            let closed = timeout(self.inner.config.close_timeout, conn.close())
                .await
                .unwrap_or_else(|elapsed| Err(Box::new(elapsed) as BoxError));

            match closed {
                Ok(()) => self.inner.bus.emit(EventKind::Close, Some(shard_id), ""),
                Err(source) => {
                    let err = PoolError::ConnectionClose { shard_id, source };
                    metrics::record_error(err.error_type_label());
                    warn!(shard_id, error = %err.report(), "Failed closing shard");
                    last_error = Some(err);
                }
            }
        }

        last_error.map_or(Ok(()), Err)
    }

    async fn discover(&self) -> Result<u32, PoolError> {
        let config = &self.inner.config;
        let fetched = timeout(
            config.discovery_timeout,
            self.inner.counts.recommended_shard_count(&config.token),
        )
        .await
        .unwrap_or_else(|elapsed| Err(Box::new(elapsed) as BoxError));

        let recommended = fetched.map_err(|source| {
            let err = PoolError::Discovery(source);
            metrics::record_error(err.error_type_label());
            err
        })?;

        if recommended < 1 {
            warn!(recommended, "Recommended shard count below 1, using 1");
        }
        let shard_count = recommended.max(1);

        info!(shard_count, "Fetched recommended shard count");
        Ok(shard_count)
    }

    async fn construct(
        &self,
        registry: &mut Registry,
        shard_id: u32,
        shard_count: u32,
    ) -> Result<Arc<dyn Connection>, PoolError> {
        let created = timeout(
            self.inner.config.open_timeout,
            self.inner.factory.create(&self.inner.config.token),
        )
        .await
        .unwrap_or_else(|elapsed| Err(Box::new(elapsed) as BoxError));

        let conn = created.map_err(|source| {
            let err = PoolError::ConnectionInit { shard_id, source };
            metrics::record_error(err.error_type_label());
            error!(shard_id, error = %err.report(), "Failed constructing connection");
            err
        })?;

        conn.set_shard(shard_id, shard_count);
        registry.install(shard_id, Arc::clone(&conn));
        debug!(shard_id, shard_count, "Connection constructed");
        Ok(conn)
    }

    async fn open_shard(&self, shard_id: u32, conn: &Arc<dyn Connection>) -> Result<(), PoolError> {
        debug!(shard_id, shard_count = conn.shard_count(), "Opening shard");

        let opened = timeout(self.inner.config.open_timeout, conn.open())
            .await
            .unwrap_or_else(|elapsed| Err(Box::new(elapsed) as BoxError));

        if let Err(source) = opened {
            metrics::record_open_failure(shard_id);
            let err = PoolError::ConnectionOpen { shard_id, source };
            metrics::record_error(err.error_type_label());
            error!(shard_id, error = %err.report(), "Failed opening shard");
            return Err(err);
        }

        metrics::record_shard_opened(shard_id);
        self.inner.bus.emit(EventKind::Open, Some(shard_id), "");
        Ok(())
    }

    fn ensure_status_task(&self) {
        let Some(sink) = &self.inner.status_sink else {
            return;
        };
        if self.inner.status_task_started.swap(true, Ordering::AcqRel) {
            return;
        }

        spawn_status_task(self.downgrade(), Arc::clone(sink));
    }
}
