//! Shard registry
//!
//! Fixed slot arena addressed by shard index. A slot is empty until its
//! connection has been constructed. The registry itself is not
//! synchronized; the manager keeps it behind a `tokio::sync::RwLock`.

use crate::shard::connection::{Connection, LifecycleHandler};
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct Registry {
    slots: Vec<Option<Arc<dyn Connection>>>,
    handlers: Vec<LifecycleHandler>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of slots, i.e. the committed shard count
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn get(&self, shard_id: u32) -> Option<&Arc<dyn Connection>> {
        self.slots.get(shard_id as usize).and_then(Option::as_ref)
    }

    /// Slots in index order, empty ones included
    pub(crate) fn slots(&self) -> impl Iterator<Item = (u32, Option<&Arc<dyn Connection>>)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| (index as u32, slot.as_ref()))
    }

    /// Constructed connections in index order
    pub(crate) fn connections(&self) -> impl Iterator<Item = (u32, &Arc<dyn Connection>)> {
        self.slots()
            .filter_map(|(index, slot)| slot.map(|conn| (index, conn)))
    }

    /// Grow to `shard_count` slots. Never shrinks.
    pub(crate) fn grow(&mut self, shard_count: u32) {
        let target = shard_count as usize;
        if target > self.slots.len() {
            self.slots.resize(target, None);
        }
    }

    /// Place a freshly constructed connection, attaching every registered handler
    pub(crate) fn install(&mut self, shard_id: u32, conn: Arc<dyn Connection>) {
        for handler in &self.handlers {
            conn.add_handler(Arc::clone(handler));
        }

        let index = shard_id as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(conn);
    }

    /// Register a handler on every existing connection and every future one
    pub(crate) fn add_handler(&mut self, handler: LifecycleHandler) {
        for (_, conn) in self.connections() {
            conn.add_handler(Arc::clone(&handler));
        }
        self.handlers.push(handler);
    }
}
