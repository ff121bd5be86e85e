use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::warn;

use super::{Bus, BusMessage, Subscription};
use crate::errors::BusError;

/// In-process bus over per-subject broadcast channels. Keeps the same
/// at-most-once, publish-order contract as the NATS backend: a subject with
/// no subscribers drops the message, a slow subscriber is lagged past rather
/// than blocking publishers.
pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    capacity: usize,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        if let Some(sender) = self.channels.get(subject) {
            // Send only fails when every receiver is gone, which is the
            // no-subscribers case: drop the message.
            let _ = sender.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, BusError> {
        let receiver = self
            .channels
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Ok(Box::new(MemorySubscription {
            subject: subject.to_string(),
            receiver,
            drained: false,
        }))
    }
}

struct MemorySubscription {
    subject: String,
    receiver: broadcast::Receiver<Bytes>,
    drained: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        loop {
            let received = if self.drained {
                // Flush what is already queued without waiting for more.
                match self.receiver.try_recv() {
                    Ok(payload) => Ok(payload),
                    Err(broadcast::error::TryRecvError::Empty) => return None,
                    Err(broadcast::error::TryRecvError::Closed) => return None,
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        Err(broadcast::error::RecvError::Lagged(skipped))
                    }
                }
            } else {
                self.receiver.recv().await
            };

            match received {
                Ok(payload) => {
                    return Some(BusMessage {
                        subject: self.subject.clone(),
                        payload,
                    });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(subject = %self.subject, skipped, "subscription lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn drain(&mut self) -> Result<(), BusError> {
        self.drained = true;
        Ok(())
    }
}
