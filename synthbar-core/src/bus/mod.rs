mod memory;
mod nats;

pub use memory::*;
pub use nats::*;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::BusError;

/// One delivered bus message.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Subject-based pub/sub transport shared by every component.
///
/// The deployment backend is NATS; an in-process backend backed by broadcast
/// channels serves tests and single-binary setups. Both deliver messages of a
/// subject in publish order and drop messages published while a subject has
/// no subscribers.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, BusError>;
}

/// A single-subject subscription handle.
#[async_trait]
pub trait Subscription: Send {
    /// Next message, or `None` once the subscription is closed and empty.
    async fn next(&mut self) -> Option<BusMessage>;

    /// Stop new deliveries. Messages already queued locally are still
    /// returned by `next` until it yields `None`.
    async fn drain(&mut self) -> Result<(), BusError>;
}
