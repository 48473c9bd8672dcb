//! NATS integration
//!
//! Publishes lifecycle events as JSON so other services can follow the
//! pool without polling the status endpoint.

mod publisher;

pub use publisher::{subject_for, NatsEventSink, SUBJECT_PREFIX};
