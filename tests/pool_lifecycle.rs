//! Shard pool lifecycle tests
//!
//! Drive a `ShardManager` with scripted in-memory connections. Time is
//! paused where stagger delays matter, so sleeps resolve instantly but
//! `Instant` differences stay exact.

use async_trait::async_trait;
use gateway_shard_manager::shard::LifecycleHandler;
use gateway_shard_manager::{
    BoxError, Connection, ConnectionFactory, Event, EventKind, LifecycleKind, LogSink, PoolConfig,
    PoolError, RescalePolicy, ShardCountSource, ShardInfo, ShardManager, StatusSink,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_test::{assert_err, assert_ok};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

/// Failure script and open log shared by every connection of a factory
#[derive(Default)]
struct Script {
    fail_open_shard: Mutex<Option<u32>>,
    fail_close_shard: Mutex<Option<u32>>,
    fail_create_at: Mutex<Option<usize>>,
    opens: Mutex<Vec<(u32, u32, Instant)>>,
    closes: AtomicUsize,
}

struct MockConnection {
    script: Arc<Script>,
    shard_id: AtomicU32,
    shard_count: AtomicU32,
    open: AtomicBool,
    ready: AtomicBool,
    entities: AtomicU64,
    handlers: Mutex<Vec<LifecycleHandler>>,
}

impl MockConnection {
    fn fire(&self, kind: LifecycleKind) {
        let info = self.info();
        let handlers = self.handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(kind, &info);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn shard_id(&self) -> u32 {
        self.shard_id.load(Ordering::SeqCst)
    }

    fn shard_count(&self) -> u32 {
        self.shard_count.load(Ordering::SeqCst)
    }

    fn set_shard(&self, shard_id: u32, shard_count: u32) {
        self.shard_id.store(shard_id, Ordering::SeqCst);
        self.shard_count.store(shard_count, Ordering::SeqCst);
    }

    async fn open(&self) -> Result<(), BoxError> {
        let shard_id = self.shard_id();
        if *self.script.fail_open_shard.lock().unwrap() == Some(shard_id) {
            return Err("handshake refused".into());
        }

        self.script
            .opens
            .lock()
            .unwrap()
            .push((shard_id, self.shard_count(), Instant::now()));
        self.open.store(true, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);

        if *self.script.fail_close_shard.lock().unwrap() == Some(self.shard_id()) {
            return Err("socket already gone".into());
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn entity_count(&self) -> u64 {
        self.entities.load(Ordering::SeqCst)
    }

    fn add_handler(&self, handler: LifecycleHandler) {
        self.handlers.lock().unwrap().push(handler);
    }
}

#[derive(Default)]
struct MockFactory {
    script: Arc<Script>,
    created: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockFactory {
    fn created(&self) -> Vec<Arc<MockConnection>> {
        self.created.lock().unwrap().clone()
    }

    fn opened_shards(&self) -> Vec<u32> {
        self.script.opens.lock().unwrap().iter().map(|(id, _, _)| *id).collect()
    }

    fn open_times(&self) -> Vec<Instant> {
        self.script.opens.lock().unwrap().iter().map(|(_, _, at)| *at).collect()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn create(&self, _token: &str) -> Result<Arc<dyn Connection>, BoxError> {
        let mut created = self.created.lock().unwrap();
        if *self.script.fail_create_at.lock().unwrap() == Some(created.len()) {
            return Err("out of sockets".into());
        }

        let conn = Arc::new(MockConnection {
            script: Arc::clone(&self.script),
            shard_id: AtomicU32::new(0),
            shard_count: AtomicU32::new(0),
            open: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            entities: AtomicU64::new(0),
            handlers: Mutex::new(Vec::new()),
        });
        created.push(Arc::clone(&conn));
        Ok(conn)
    }
}

struct MockCounts {
    value: AtomicU32,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl MockCounts {
    fn new(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShardCountSource for MockCounts {
    async fn recommended_shard_count(&self, _token: &str) -> Result<u32, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err("401 Unauthorized".into());
        }
        Ok(self.value.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
struct MockStatusSink {
    existing: Option<u64>,
    published: Mutex<Vec<(Option<u64>, String, String)>>,
}

#[async_trait]
impl StatusSink for MockStatusSink {
    async fn find_existing(&self, _title: &str) -> Result<Option<u64>, BoxError> {
        Ok(self.existing)
    }

    async fn publish(
        &self,
        existing: Option<u64>,
        title: &str,
        body: &str,
    ) -> Result<u64, BoxError> {
        self.published
            .lock()
            .unwrap()
            .push((existing, title.to_string(), body.to_string()));
        Ok(existing.unwrap_or(77))
    }
}

#[derive(Default)]
struct RecordingLogSink(Mutex<Vec<String>>);

#[async_trait]
impl LogSink for RecordingLogSink {
    async fn publish(&self, _event: &Event, rendered: &str) -> Result<(), BoxError> {
        self.0.lock().unwrap().push(rendered.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    manager: ShardManager,
    factory: Arc<MockFactory>,
    counts: Arc<MockCounts>,
}

fn config(shard_count: Option<u32>, open_delay: Duration) -> PoolConfig {
    PoolConfig {
        shard_count,
        open_delay,
        ..PoolConfig::new("token")
    }
}

fn harness(config: PoolConfig, recommended: u32) -> Harness {
    let factory = Arc::new(MockFactory::default());
    let counts = Arc::new(MockCounts::new(recommended));
    let manager = ShardManager::builder(config, factory.clone(), counts.clone())
        .build()
        .expect("valid config");

    Harness {
        manager,
        factory,
        counts,
    }
}

/// Let spawned tasks run to completion
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    sleep(Duration::from_millis(50)).await;
}

async fn wait_for_rescale(manager: &ShardManager) {
    for _ in 0..1000 {
        if !manager.is_rescaling() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("rescale did not finish");
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_explicit_count_skips_discovery() {
    let h = harness(config(Some(3), Duration::ZERO), 9);

    assert_ok!(h.manager.initialize().await);

    assert_eq!(h.manager.shard_count(), 3);
    assert_eq!(h.counts.calls(), 0);
    assert_eq!(h.factory.created().len(), 3);

    let indices: Vec<u32> = h.factory.created().iter().map(|c| c.shard_id()).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(h.factory.created().iter().all(|c| c.shard_count() == 3));
}

#[tokio::test]
async fn test_discovered_count_used_when_unset() {
    let h = harness(config(None, Duration::ZERO), 4);

    assert_ok!(h.manager.initialize().await);

    assert_eq!(h.counts.calls(), 1);
    assert_eq!(h.manager.shard_count(), 4);
}

#[tokio::test]
async fn test_discovered_zero_clamps_to_one() {
    let h = harness(config(None, Duration::ZERO), 0);

    assert_ok!(h.manager.initialize().await);

    assert_eq!(h.manager.shard_count(), 1);
    assert_eq!(h.factory.created().len(), 1);
}

#[tokio::test]
async fn test_discovery_failure_leaves_pool_empty() {
    let h = harness(config(None, Duration::ZERO), 3);
    h.counts.fail.store(true, Ordering::SeqCst);

    let err = assert_err!(h.manager.initialize().await);

    assert!(matches!(err, PoolError::Discovery(_)));
    assert_eq!(h.manager.shard_count(), 0);
    assert!(h.factory.created().is_empty());
    assert!(matches!(
        h.manager.route_for(1 << 22).await,
        Err(PoolError::NotInitialized)
    ));
}

#[tokio::test]
async fn test_second_initialize_is_noop() {
    let h = harness(config(Some(2), Duration::ZERO), 2);

    assert_ok!(h.manager.initialize().await);
    assert_ok!(h.manager.initialize().await);

    assert_eq!(h.factory.created().len(), 2);
}

#[tokio::test]
async fn test_construction_failure_keeps_earlier_connections() {
    let h = harness(config(Some(3), Duration::ZERO), 3);
    *h.factory.script.fail_create_at.lock().unwrap() = Some(2);

    let err = assert_err!(h.manager.initialize().await);
    assert!(matches!(err, PoolError::ConnectionInit { shard_id: 2, .. }));

    let status = h.manager.full_status().await;
    let started: Vec<bool> = status.shards.iter().map(|s| s.started).collect();
    assert_eq!(started, vec![true, true, false]);
}

// ---------------------------------------------------------------------------
// Start / stop
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_start_staggers_opens_in_index_order() {
    let h = harness(config(Some(3), Duration::from_secs(5)), 3);

    assert_ok!(h.manager.start().await);

    assert_eq!(h.factory.opened_shards(), vec![0, 1, 2]);
    let times = h.factory.open_times();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(5));
    }
    assert!(h.manager.is_started());
}

#[tokio::test]
async fn test_zero_delay_still_opens_in_order() {
    let h = harness(config(Some(4), Duration::ZERO), 4);

    assert_ok!(h.manager.start().await);

    assert_eq!(h.factory.opened_shards(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_open_failure_stops_start_and_keeps_earlier_shards() {
    let h = harness(config(Some(4), Duration::ZERO), 4);
    *h.factory.script.fail_open_shard.lock().unwrap() = Some(2);

    let err = assert_err!(h.manager.start().await);

    assert!(matches!(err, PoolError::ConnectionOpen { shard_id: 2, .. }));
    let open: Vec<bool> = h.factory.created().iter().map(|c| c.is_open()).collect();
    assert_eq!(open, vec![true, true, false, false]);
    assert!(!h.manager.is_started());
}

#[tokio::test]
async fn test_stop_all_attempts_every_shard() {
    let h = harness(config(Some(3), Duration::ZERO), 3);
    assert_ok!(h.manager.start().await);
    *h.factory.script.fail_close_shard.lock().unwrap() = Some(1);

    let err = assert_err!(h.manager.stop_all().await);

    assert!(matches!(err, PoolError::ConnectionClose { shard_id: 1, .. }));
    assert_eq!(h.factory.script.closes.load(Ordering::SeqCst), 3);
    assert!(h.factory.created().iter().all(|c| !c.is_open()));
    assert!(!h.manager.is_started());
}

#[tokio::test]
async fn test_open_and_close_events_reach_callback() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);

    let factory = Arc::new(MockFactory::default());
    let manager = ShardManager::builder(
        config(Some(2), Duration::ZERO),
        factory,
        Arc::new(MockCounts::new(2)),
    )
    .on_event(move |event: Event| seen.lock().unwrap().push((event.kind, event.shard_id)))
    .build()
    .unwrap();

    assert_ok!(manager.start().await);
    assert_ok!(manager.stop_all().await);
    settle().await;

    let events = events.lock().unwrap().clone();
    for shard_id in 0..2 {
        assert!(events.contains(&(EventKind::Open, Some(shard_id))));
        assert!(events.contains(&(EventKind::Close, Some(shard_id))));
    }
}

#[tokio::test]
async fn test_log_sink_receives_named_lines() {
    let sink = Arc::new(RecordingLogSink::default());
    let manager = ShardManager::builder(
        PoolConfig {
            name: Some("Switchboard".to_string()),
            ..config(Some(1), Duration::ZERO)
        },
        Arc::new(MockFactory::default()),
        Arc::new(MockCounts::new(1)),
    )
    .log_sink(sink.clone())
    .build()
    .unwrap();

    assert_ok!(manager.start().await);
    settle().await;

    let lines = sink.0.lock().unwrap().clone();
    assert_eq!(lines, vec!["Switchboard: [0/1] Opened".to_string()]);
}

// ---------------------------------------------------------------------------
// Routing and status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_route_for_uses_snowflake_timestamp_bits() {
    let h = harness(config(Some(3), Duration::ZERO), 3);

    assert!(matches!(
        h.manager.route_for_dm().await,
        Err(PoolError::NotInitialized)
    ));

    assert_ok!(h.manager.initialize().await);

    let conn = h.manager.route_for(1 << 22).await.unwrap();
    assert_eq!(conn.shard_id(), 1);

    let conn = h.manager.route_for(5 << 22).await.unwrap();
    assert_eq!(conn.shard_id(), 2);

    let dm = h.manager.route_for_dm().await.unwrap();
    assert_eq!(dm.shard_id(), 0);

    assert_eq!(h.manager.connection(2).await.unwrap().shard_id(), 2);
    assert!(h.manager.connection(3).await.is_none());
}

#[tokio::test]
async fn test_full_status_totals_entities() {
    let h = harness(config(Some(3), Duration::ZERO), 3);
    assert_ok!(h.manager.start().await);

    for (conn, entities) in h.factory.created().iter().zip([10, 0, 32]) {
        conn.entities.store(entities, Ordering::SeqCst);
    }
    h.factory.created()[1].ready.store(false, Ordering::SeqCst);

    let status = h.manager.full_status().await;

    assert_eq!(status.total_entities, 42);
    assert_eq!(status.shards.iter().map(|s| s.entities).sum::<u64>(), 42);
    assert_eq!(status.healthy_shards(), 2);
    assert!(!status.shards[1].healthy);
}

#[tokio::test]
async fn test_entity_count_provider_overrides_connections() {
    let manager = ShardManager::builder(
        config(Some(2), Duration::ZERO),
        Arc::new(MockFactory::default()),
        Arc::new(MockCounts::new(2)),
    )
    .entity_counts(|| vec![7])
    .build()
    .unwrap();
    assert_ok!(manager.initialize().await);

    let status = manager.full_status().await;

    let entities: Vec<u64> = status.shards.iter().map(|s| s.entities).collect();
    assert_eq!(entities, vec![7, 0]);
    assert_eq!(status.total_entities, 7);
}

#[tokio::test(start_paused = true)]
async fn test_status_message_reused() {
    let sink = Arc::new(MockStatusSink {
        existing: Some(77),
        ..Default::default()
    });
    let manager = ShardManager::builder(
        PoolConfig {
            name: Some("Switchboard".to_string()),
            ..config(Some(2), Duration::ZERO)
        },
        Arc::new(MockFactory::default()),
        Arc::new(MockCounts::new(2)),
    )
    .status_sink(sink.clone())
    .build()
    .unwrap();

    assert_ok!(manager.initialize().await);
    sleep(Duration::from_secs(2)).await;

    {
        let published = sink.published.lock().unwrap();
        let (existing, title, body) = published.first().expect("status published");
        assert_eq!(*existing, Some(77));
        assert_eq!(title, "Sharding status for Switchboard");
        assert_eq!(body, "[0/2]: 🔥 (0,0)\n[1/2]: 🔥 (0,0)\n");
    }

    // Events pull the next publish forward
    assert_ok!(manager.start().await);
    sleep(Duration::from_secs(5)).await;

    let published = sink.published.lock().unwrap();
    assert!(published.len() >= 2);
    assert!(published.iter().all(|(existing, _, _)| *existing == Some(77)));
    let (_, _, body) = published.last().unwrap();
    assert_eq!(body, "[0/2]: 👌 (0,0)\n[1/2]: 👌 (0,0)\n");
}

// ---------------------------------------------------------------------------
// Handlers and rescaling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_add_handler_reaches_existing_and_future_connections() {
    let h = harness(config(Some(2), Duration::ZERO), 2);
    assert_ok!(h.manager.start().await);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    h.manager
        .add_handler(move |kind: LifecycleKind, _: &ShardInfo| {
            if kind == LifecycleKind::Ready {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

    h.factory.created()[0].fire(LifecycleKind::Ready);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_ok!(h.manager.rescale_to(3).await);
    h.factory.created()[2].fire(LifecycleKind::Ready);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rescale_grows_and_reopens_every_shard() {
    let h = harness(config(Some(3), Duration::from_secs(5)), 3);
    assert_ok!(h.manager.start().await);
    h.factory.script.opens.lock().unwrap().clear();

    assert_ok!(h.manager.rescale_to(5).await);

    assert_eq!(h.manager.shard_count(), 5);
    assert_eq!(h.factory.created().len(), 5);
    assert!(h.factory.created().iter().all(|c| c.shard_count() == 5));
    assert!(h.factory.created().iter().all(|c| c.is_open()));
    assert_eq!(h.factory.opened_shards(), vec![0, 1, 2, 3, 4]);

    let times = h.factory.open_times();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(5));
    }
}

#[tokio::test]
async fn test_rescale_never_shrinks() {
    let h = harness(config(Some(3), Duration::ZERO), 3);
    assert_ok!(h.manager.start().await);

    assert_ok!(h.manager.rescale_to(2).await);

    assert_eq!(h.manager.shard_count(), 3);
    assert_eq!(h.factory.created().len(), 3);
}

#[tokio::test]
async fn test_restart_with_growth_policy_skips_discovery() {
    let mut config = config(Some(2), Duration::ZERO);
    config.rescale.policy = RescalePolicy::Grow { factor: 1.5 };
    let h = harness(config, 9);
    assert_ok!(h.manager.start().await);

    assert_ok!(h.manager.restart_all().await);

    assert_eq!(h.counts.calls(), 0);
    assert_eq!(h.manager.shard_count(), 3);
}

#[tokio::test]
async fn test_restart_discovery_failure_leaves_pool_running() {
    let h = harness(config(Some(3), Duration::ZERO), 3);
    assert_ok!(h.manager.start().await);
    h.counts.fail.store(true, Ordering::SeqCst);

    let err = assert_err!(h.manager.restart_all().await);

    assert!(matches!(err, PoolError::Discovery(_)));
    assert_eq!(h.factory.script.closes.load(Ordering::SeqCst), 0);
    assert!(h.factory.created().iter().all(|c| c.is_open()));
    assert!(!h.manager.is_rescaling());
}

#[tokio::test]
async fn test_disconnect_below_threshold_does_not_restart() {
    let mut config = config(Some(3), Duration::ZERO);
    config.rescale.entity_threshold = Some(100);
    let h = harness(config, 5);
    assert_ok!(h.manager.start().await);

    let conn = Arc::clone(&h.factory.created()[1]);
    conn.entities.store(99, Ordering::SeqCst);
    conn.fire(LifecycleKind::Disconnected);
    settle().await;

    assert!(!h.manager.is_rescaling());
    assert_eq!(h.counts.calls(), 0);
    assert_eq!(h.manager.shard_count(), 3);
}

#[tokio::test]
async fn test_disconnect_at_threshold_restarts_once() {
    let mut config = config(Some(3), Duration::ZERO);
    config.rescale.entity_threshold = Some(100);
    let h = harness(config, 5);
    assert_ok!(h.manager.start().await);

    let conn = Arc::clone(&h.factory.created()[1]);
    conn.entities.store(100, Ordering::SeqCst);
    conn.fire(LifecycleKind::Disconnected);
    conn.fire(LifecycleKind::Disconnected);
    assert!(h.manager.is_rescaling());

    wait_for_rescale(&h.manager).await;

    assert_eq!(h.counts.calls(), 1);
    assert_eq!(h.manager.shard_count(), 5);
    assert!(h.factory.created().iter().all(|c| c.shard_count() == 5));
}

#[tokio::test]
async fn test_disconnect_after_stop_all_leaves_pool_stopped() {
    let mut config = config(Some(2), Duration::ZERO);
    config.rescale.entity_threshold = Some(100);
    let h = harness(config, 5);
    assert_ok!(h.manager.start().await);
    assert_ok!(h.manager.stop_all().await);

    let conn = Arc::clone(&h.factory.created()[1]);
    conn.entities.store(100, Ordering::SeqCst);
    conn.fire(LifecycleKind::Disconnected);
    assert!(!h.manager.is_rescaling());
    settle().await;

    assert_eq!(h.counts.calls(), 0);
    assert!(!h.manager.is_started());
    assert!(h.factory.created().iter().all(|c| !c.is_open()));
}

#[tokio::test]
async fn test_rescale_queued_before_stop_all_is_dropped() {
    let mut config = config(Some(2), Duration::ZERO);
    config.rescale.entity_threshold = Some(100);
    let h = harness(config, 5);
    assert_ok!(h.manager.start().await);

    // Claimed while running, but stop_all takes the lock before the task runs
    let conn = Arc::clone(&h.factory.created()[0]);
    conn.entities.store(100, Ordering::SeqCst);
    conn.fire(LifecycleKind::Disconnected);
    assert!(h.manager.is_rescaling());
    assert_ok!(h.manager.stop_all().await);

    wait_for_rescale(&h.manager).await;

    assert_eq!(h.counts.calls(), 0);
    assert_eq!(h.manager.shard_count(), 2);
    assert!(!h.manager.is_started());
    assert!(h.factory.created().iter().all(|c| !c.is_open()));
}

#[tokio::test]
async fn test_disconnect_before_start_does_not_open_shards() {
    let mut config = config(Some(2), Duration::ZERO);
    config.rescale.entity_threshold = Some(100);
    let h = harness(config, 5);
    assert_ok!(h.manager.initialize().await);

    let conn = Arc::clone(&h.factory.created()[0]);
    conn.entities.store(100, Ordering::SeqCst);
    conn.fire(LifecycleKind::Disconnected);
    settle().await;

    assert_eq!(h.counts.calls(), 0);
    assert!(h.factory.opened_shards().is_empty());
}

#[tokio::test]
async fn test_disabled_threshold_never_restarts() {
    let mut config = config(Some(2), Duration::ZERO);
    config.rescale.entity_threshold = None;
    let h = harness(config, 5);
    assert_ok!(h.manager.start().await);

    let conn = Arc::clone(&h.factory.created()[0]);
    conn.entities.store(u64::MAX, Ordering::SeqCst);
    conn.fire(LifecycleKind::Disconnected);
    settle().await;

    assert_eq!(h.counts.calls(), 0);
    assert_eq!(h.manager.shard_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_readers_never_see_registry_shrink() {
    let h = harness(config(Some(3), Duration::from_secs(1)), 3);
    assert_ok!(h.manager.start().await);

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let manager = h.manager.clone();
        let done = Arc::clone(&done);
        readers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while !done.load(Ordering::SeqCst) {
                seen.push(manager.full_status().await.shard_count());
                sleep(Duration::from_millis(250)).await;
            }
            seen
        }));
    }

    assert_ok!(h.manager.rescale_to(5).await);
    sleep(Duration::from_secs(1)).await;
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        let seen = reader.await.unwrap();
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(seen.iter().all(|&len| len == 3 || len == 5));
        assert_eq!(seen.last(), Some(&5));
    }
}
