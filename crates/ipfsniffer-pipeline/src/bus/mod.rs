//! Durable message bus interface.
//!
//! Every subject is at-least-once: a consumer acknowledges only after its
//! forward-publish succeeded, and an unacknowledged message is redelivered up
//! to the consumer's max-deliver count. The interface is small on purpose;
//! stream/consumer provisioning is a backend concern.

mod memory;
mod nats;

pub use memory::MemoryBus;
pub use nats::NatsBus;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use ipfsniffer_core::subjects;

use crate::{Error, Result};

/// Durable, at-least-once bus.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a payload to a subject. Returns only after the bus has
    /// durably accepted the message.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Pull the next message for the `(subject, durable)` consumer, waiting
    /// up to `max_wait`. Multiple workers sharing a durable name divide the
    /// subject between them.
    async fn pull(&self, subject: &str, durable: &str, max_wait: Duration)
        -> Result<Option<Delivery>>;

    /// Ephemeral in-order subscription, used for the chunk side-channel.
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>>;
}

/// An ephemeral subscription; yields payloads in publish order.
#[async_trait]
pub trait Subscription: Send {
    async fn next(&mut self) -> Option<Bytes>;
}

/// Backend-specific acknowledgement handle.
#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> Result<()>;
}

/// One message pulled from a durable consumer.
pub struct Delivery {
    pub payload: Bytes,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(payload: Bytes, acker: Box<dyn Acker>) -> Delivery {
        Delivery { payload, acker }
    }

    /// Acknowledge the message. Dropping a delivery without acking leaves it
    /// for redelivery.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }
}

/// Default redelivery budget for durable consumers.
pub const DEFAULT_MAX_DELIVER: i64 = 5;

/// Publish with the empty-subject/payload guards every stage relies on.
pub async fn publish(bus: &dyn Bus, subject: &str, payload: &[u8]) -> Result<()> {
    if subject.is_empty() {
        return Err(Error::Bus("subject required".into()));
    }
    if payload.is_empty() {
        return Err(Error::Bus("payload required".into()));
    }
    bus.publish(subject, Bytes::copy_from_slice(payload)).await
}

/// Publish to the application-level DLQ subject for `subject`.
pub async fn publish_dlq(bus: &dyn Bus, subject: &str, payload: &[u8]) -> Result<()> {
    publish(bus, &subjects::dlq_subject(subject), payload).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_rejects_empty_inputs() {
        let bus = MemoryBus::new();
        assert!(publish(&bus, "", b"x").await.is_err());
        assert!(publish(&bus, "cid.discovered", b"").await.is_err());
    }

    #[tokio::test]
    async fn publish_dlq_targets_the_dlq_subject() {
        let bus = MemoryBus::new();
        publish_dlq(&bus, "fetch.request", b"broken").await.unwrap();
        assert_eq!(bus.published("fetch.request.dlq").len(), 1);
        assert!(bus.published("fetch.request").is_empty());
    }
}
