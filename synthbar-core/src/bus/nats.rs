use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::info;

use super::{Bus, BusMessage, Subscription};
use crate::errors::BusError;

/// NATS-backed bus, the deployment transport. Thin shim mapping subjects and
/// payloads onto an [`async_nats::Client`], which already supports concurrent
/// publishing from every component.
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = async_nats::connect(url).await?;
        info!(url, "connected to nats");
        Ok(Self { client })
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.client.publish(subject.to_string(), payload).await?;
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, BusError> {
        let subscriber = self.client.subscribe(subject.to_string()).await?;
        Ok(Box::new(NatsSubscription { subscriber }))
    }
}

struct NatsSubscription {
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        self.subscriber.next().await.map(|msg| BusMessage {
            subject: msg.subject.to_string(),
            payload: msg.payload,
        })
    }

    async fn drain(&mut self) -> Result<(), BusError> {
        self.subscriber
            .unsubscribe()
            .await
            .map_err(|err| BusError::Drain(err.to_string()))
    }
}
