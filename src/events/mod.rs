//! Lifecycle events
//!
//! Immutable event values and the bus that fans them out to the user
//! callback and log sinks.

mod bus;
mod event;

pub use bus::{EventBus, EventCallback, LogSink};
pub(crate) use bus::{BusOptions, StatusDeadline};
pub use event::{Event, EventKind};
