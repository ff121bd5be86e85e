use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use synthbar_core::prelude::*;

/// Turns the tick stream of one symbol into bucketed OHLCV bars on one
/// timeframe. Subscribes with concurrency 1, so `current` is only ever
/// touched by a single in-flight handler.
pub struct BarAggregator {
    symbol: String,
    timeframe: Timeframe,
    bus: Arc<dyn Bus>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    current: Mutex<Option<Bar>>,
}

impl BarAggregator {
    pub fn new(
        bus: Arc<dyn Bus>,
        shutdown: CancellationToken,
        symbol: impl Into<String>,
        timeframe: Timeframe,
    ) -> Arc<Self> {
        Arc::new(Self {
            symbol: symbol.into().trim().to_lowercase(),
            timeframe,
            bus,
            shutdown,
            tracker: TaskTracker::new(),
            current: Mutex::new(None),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    async fn publish_bar(&self, bar: &Bar) {
        let subject = subjects::bars(&self.symbol, self.timeframe);
        let payload = match serde_json::to_vec(bar) {
            Ok(payload) => payload,
            Err(err) => {
                error!(%err, subject, "failed to encode bar");
                return;
            }
        };
        if let Err(err) = self.bus.publish(&subject, Bytes::from(payload)).await {
            error!(%err, subject, "failed to publish bar");
        }
    }
}

#[async_trait]
impl Handler for BarAggregator {
    async fn handle(&self, msg: BusMessage) -> Result<(), anyhow::Error> {
        let event: AggTradeEvent = match serde_json::from_slice(&msg.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "failed to parse tick");
                return Err(err.into());
            }
        };

        if event.symbol.to_lowercase() != self.symbol {
            return Ok(());
        }

        let price = match event.price() {
            Ok(price) => price,
            Err(err) => {
                warn!(%err, raw = %event.price, "failed to parse price");
                return Err(err.into());
            }
        };
        let quantity = match event.quantity() {
            Ok(quantity) => quantity,
            Err(err) => {
                warn!(%err, raw = %event.quantity, "failed to parse quantity");
                return Err(err.into());
            }
        };
        let tick_bucket = self.timeframe.bucket_start(event.event_time_ms)?;

        // Mutate under the lock, publish outside it.
        let (finalized, snapshot) = {
            let mut slot = self.current.lock();
            match slot.take() {
                Some(mut bar) if tick_bucket == bar.start_time => {
                    bar.apply(price, quantity);
                    let snapshot = bar.clone();
                    *slot = Some(bar);
                    (None, snapshot)
                }
                Some(bar) if tick_bucket < bar.start_time => {
                    // Late tick from an already superseded bucket.
                    *slot = Some(bar);
                    return Ok(());
                }
                previous => {
                    let finalized = previous.map(|mut bar| {
                        bar.is_closed = true;
                        bar
                    });
                    let opened = Bar::open_at(self.symbol.clone(), tick_bucket, price, quantity);
                    *slot = Some(opened.clone());
                    (finalized, opened)
                }
            }
        };

        if let Some(bar) = finalized {
            self.publish_bar(&bar).await;
        }
        self.publish_bar(&snapshot).await;

        Ok(())
    }
}

#[async_trait]
impl Spawnable for BarAggregator {
    async fn spawn(self: Arc<Self>) -> Result<(), anyhow::Error> {
        info!(symbol = %self.symbol, timeframe = %self.timeframe, "starting bar aggregator");

        let consumer = Consumer::new(self.bus.clone(), self.shutdown.clone())
            .with_concurrency(1)
            .subscribe(subjects::ticks(&self.symbol), self.clone());

        let symbol = self.symbol.clone();
        self.tracker.spawn(async move {
            if let Err(err) = consumer.start().await {
                error!(%err, symbol, "tick consumer terminated");
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), anyhow::Error> {
        info!(symbol = %self.symbol, timeframe = %self.timeframe, "stopping bar aggregator");
        // The in-progress bucket is not force-closed; finalization is defined
        // by the arrival of a next-bucket tick.
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        Ok(())
    }
}
