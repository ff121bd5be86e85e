use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::bus::{Bus, BusMessage, Subscription};
use crate::errors::BusError;

/// A message handler attached to one or more subjects of a [`Consumer`].
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, msg: BusMessage) -> Result<(), anyhow::Error>;
}

/// Façade over the bus dispatching incoming messages to registered handlers.
///
/// Handler errors are logged and never tear down the subscription; a poison
/// message must not halt ingest. With a concurrency bound of 1 every handler
/// invocation across all subjects of this consumer is strictly serialized,
/// which is what the aggregator and the portfolio monitor rely on for their
/// private mutable state.
pub struct Consumer {
    bus: Arc<dyn Bus>,
    shutdown: CancellationToken,
    handlers: HashMap<String, Arc<dyn Handler>>,
    semaphore: Option<Arc<Semaphore>>,
}

impl Consumer {
    pub fn new(bus: Arc<dyn Bus>, shutdown: CancellationToken) -> Self {
        Self {
            bus,
            shutdown,
            handlers: HashMap::new(),
            semaphore: None,
        }
    }

    /// Register `handler` for `subject`. Idempotent per subject, last writer
    /// wins. Must be called before [`Consumer::start`].
    pub fn subscribe(mut self, subject: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(subject.into(), handler);
        self
    }

    /// Cap concurrent handler invocations across all subjects at `n`.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        if n > 0 {
            self.semaphore = Some(Arc::new(Semaphore::new(n)));
        }
        self
    }

    /// Subscribe everything and deliver until the cancellation token fires.
    ///
    /// On cancellation: stop accepting new messages, let in-flight handlers
    /// return, then drain each subscription so already-queued messages are
    /// still delivered. Returns the first drain error; other errors are
    /// logged.
    pub async fn start(&self) -> Result<(), BusError> {
        if self.handlers.is_empty() {
            self.shutdown.cancelled().await;
            return Ok(());
        }

        let mut dispatchers: JoinSet<Result<(), BusError>> = JoinSet::new();
        for (subject, handler) in &self.handlers {
            let sub = self.bus.subscribe(subject).await?;
            dispatchers.spawn(dispatch_loop(
                sub,
                subject.clone(),
                handler.clone(),
                self.semaphore.clone(),
                self.shutdown.clone(),
            ));
        }

        let mut first_err = None;
        while let Some(joined) = dispatchers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(%err, "failed to drain subscription");
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                Err(err) => error!(%err, "dispatch task failed"),
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn dispatch_loop(
    mut sub: Box<dyn Subscription>,
    subject: String,
    handler: Arc<dyn Handler>,
    semaphore: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
) -> Result<(), BusError> {
    loop {
        tokio::select! {
            msg = sub.next() => match msg {
                Some(msg) => dispatch(&subject, &handler, &semaphore, msg).await,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        }
    }

    debug!(subject, "shutting down consumer");
    let drained = sub.drain().await;
    while let Some(msg) = sub.next().await {
        dispatch(&subject, &handler, &semaphore, msg).await;
    }
    drained
}

async fn dispatch(
    subject: &str,
    handler: &Arc<dyn Handler>,
    semaphore: &Option<Arc<Semaphore>>,
    msg: BusMessage,
) {
    let _permit = match semaphore {
        Some(semaphore) => match semaphore.acquire().await {
            Ok(permit) => Some(permit),
            // The semaphore is never closed while dispatching.
            Err(_) => return,
        },
        None => None,
    };

    if let Err(err) = handler.handle(msg).await {
        error!(subject, %err, "failed to handle message");
    }
}
