//! Twilight-backed shard connection
//!
//! Each `open` builds a fresh [`Shard`] for the current index and count and
//! runs it on its own task until `close` or a fatal gateway error.

use crate::error::BoxError;
use crate::shard::{Connection, ConnectionFactory, LifecycleHandler, LifecycleKind};

use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use twilight_gateway::error::ReceiveMessageErrorType;
use twilight_gateway::{Config, EventTypeFlags, Intents, Shard, StreamExt as _};
use twilight_model::gateway::event::Event;
use twilight_model::gateway::ShardId;

/// State shared between the connection handle and its shard task
struct Shared {
    shard_id: AtomicU32,
    shard_count: AtomicU32,
    ready: AtomicBool,
    guilds: DashSet<u64>,
    handlers: RwLock<Vec<LifecycleHandler>>,
}

impl Shared {
    fn notify(&self, kind: LifecycleKind) {
        let info = crate::shard::ShardInfo {
            shard_id: self.shard_id.load(Ordering::Acquire),
            shard_count: self.shard_count.load(Ordering::Acquire),
            ready: self.ready.load(Ordering::Acquire),
            entity_count: self.guilds.len() as u64,
        };

        let handlers = match self.handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for handler in handlers {
            handler(kind, &info);
        }
    }
}

struct RunningShard {
    /// Taken once `close` has signalled the task
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RunningShard {
    fn is_live(&self) -> bool {
        self.shutdown.is_some() && !self.task.is_finished()
    }
}

/// Clear a slot left behind by a close that never finished, aborting its task
async fn reap(running: &mut Option<RunningShard>) {
    if let Some(stale) = running.take() {
        stale.task.abort();
        let _ = stale.task.await;
    }
}

/// One Discord gateway shard
pub struct TwilightConnection {
    token: String,
    intents: Intents,
    shared: Arc<Shared>,
    running: Mutex<Option<RunningShard>>,
}

impl TwilightConnection {
    pub fn new(token: String, intents: Intents) -> Self {
        Self {
            token,
            intents,
            shared: Arc::new(Shared {
                shard_id: AtomicU32::new(0),
                shard_count: AtomicU32::new(1),
                ready: AtomicBool::new(false),
                guilds: DashSet::new(),
                handlers: RwLock::new(Vec::new()),
            }),
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connection for TwilightConnection {
    fn shard_id(&self) -> u32 {
        self.shared.shard_id.load(Ordering::Acquire)
    }

    fn shard_count(&self) -> u32 {
        self.shared.shard_count.load(Ordering::Acquire)
    }

    fn set_shard(&self, shard_id: u32, shard_count: u32) {
        self.shared.shard_id.store(shard_id, Ordering::Release);
        self.shared.shard_count.store(shard_count, Ordering::Release);
    }

    async fn open(&self) -> Result<(), BoxError> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(RunningShard::is_live) {
            return Ok(());
        }
        reap(&mut running).await;

        let shard_id = self.shard_id();
        let shard_count = self.shard_count();
        let id = ShardId::new_checked(shard_id, shard_count)
            .ok_or_else(|| format!("invalid shard {shard_id} of {shard_count}"))?;

        let shard = Shard::with_config(id, Config::new(self.token.clone(), self.intents));
        let (shutdown, shutdown_rx) = oneshot::channel();

        // A new session starts with an empty guild list
        self.shared.ready.store(false, Ordering::Release);
        self.shared.guilds.clear();

        let task = tokio::spawn(run_shard(shard, Arc::clone(&self.shared), shutdown_rx));
        *running = Some(RunningShard {
            shutdown: Some(shutdown),
            task,
        });

        debug!(shard_id, shard_count, "Shard task spawned");
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        let mut running = self.running.lock().await;
        let Some(shard) = running.as_mut() else {
            return Ok(());
        };

        if let Some(shutdown) = shard.shutdown.take() {
            let _ = shutdown.send(());
        }

        // The slot is cleared only after the task has ended; if this future
        // is dropped first, the next `open` reaps the task
        let joined = (&mut shard.task).await;
        *running = None;

        self.shared.ready.store(false, Ordering::Release);
        joined?;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    fn entity_count(&self) -> u64 {
        self.shared.guilds.len() as u64
    }

    fn add_handler(&self, handler: LifecycleHandler) {
        match self.shared.handlers.write() {
            Ok(mut handlers) => handlers.push(handler),
            Err(poisoned) => poisoned.into_inner().push(handler),
        }
    }
}

async fn run_shard(mut shard: Shard, shared: Arc<Shared>, mut shutdown: oneshot::Receiver<()>) {
    let shard_id = shard.id().number();

    loop {
        let item = tokio::select! {
            _ = &mut shutdown => {
                debug!(shard_id, "Shard received shutdown signal");
                break;
            }
            item = shard.next_event(EventTypeFlags::all()) => item,
        };

        let Some(item) = item else {
            break;
        };

        let event = match item {
            Ok(event) => event,
            Err(source) => {
                if matches!(source.kind(), ReceiveMessageErrorType::Reconnect) {
                    warn!(shard_id, error = %source, "Fatal gateway error (reconnect failed)");
                    shared.ready.store(false, Ordering::Release);
                    shared.notify(LifecycleKind::Disconnected);
                    break;
                }

                warn!(shard_id, error = %source, "Error receiving event");
                continue;
            }
        };

        match &event {
            Event::GatewayHello(_) => shared.notify(LifecycleKind::Connected),
            Event::Ready(ready) => {
                shared.guilds.clear();
                for guild in &ready.guilds {
                    shared.guilds.insert(guild.id.get());
                }
                shared.ready.store(true, Ordering::Release);
                info!(shard_id, guilds = ready.guilds.len(), "Shard ready");
                shared.notify(LifecycleKind::Ready);
            }
            Event::Resumed => {
                shared.ready.store(true, Ordering::Release);
                shared.notify(LifecycleKind::Resumed);
            }
            Event::GatewayClose(frame) => {
                shared.ready.store(false, Ordering::Release);
                debug!(shard_id, ?frame, "Gateway closed connection");
                shared.notify(LifecycleKind::Disconnected);
            }
            Event::GuildCreate(guild) => {
                shared.guilds.insert(guild.id().get());
            }
            Event::GuildDelete(guild) => {
                // Outages report the guild as unavailable; it is still ours
                if guild.unavailable != Some(true) {
                    shared.guilds.remove(&guild.id.get());
                }
            }
            _ => {}
        }
    }

    debug!(shard_id, "Shard task stopped");
}

/// Builds [`TwilightConnection`]s with a fixed intent set
pub struct TwilightConnectionFactory {
    intents: Intents,
}

impl TwilightConnectionFactory {
    pub fn new(intents: Intents) -> Self {
        Self { intents }
    }
}

#[async_trait]
impl ConnectionFactory for TwilightConnectionFactory {
    async fn create(&self, token: &str) -> Result<Arc<dyn Connection>, BoxError> {
        Ok(Arc::new(TwilightConnection::new(token.to_string(), self.intents)))
    }
}
