use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use synthbar_core::prelude::*;

use crate::errors::{FormulaError, MonitorError};
use crate::formula::Formula;

/// Synchronizes bars of several symbols on one timeframe and publishes a
/// synthetic bar computed from the portfolio's formula.
///
/// The monitor takes the latest bar seen per symbol without requiring the
/// buckets to share a start time; it trusts the aggregators' alignment.
/// Subscribes with concurrency 1, so `current_bars` sees one handler at a
/// time.
pub struct PortfolioMonitor {
    portfolio: Portfolio,
    formula: Formula,
    bus: Arc<dyn Bus>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    current_bars: Mutex<HashMap<String, Bar>>,
}

impl PortfolioMonitor {
    /// Compiles the formula once; a malformed formula rejects the portfolio
    /// here, before anything is registered or subscribed.
    ///
    /// Symbols are kept exactly as submitted: the formula binds them as
    /// variables under that spelling. Case folding happens only where the
    /// wire needs it, in the subscribe subjects and the bar-map lookups.
    pub fn new(
        bus: Arc<dyn Bus>,
        shutdown: CancellationToken,
        portfolio: Portfolio,
    ) -> Result<Arc<Self>, MonitorError> {
        let formula = Formula::compile(&portfolio.formula)?;

        Ok(Arc::new(Self {
            portfolio,
            formula,
            bus,
            shutdown,
            tracker: TaskTracker::new(),
            current_bars: Mutex::new(HashMap::new()),
        }))
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    fn eval_field(&self, field: &str, params: &HashMap<String, f64>) -> Result<f64, FormulaError> {
        self.formula.eval(params).map_err(|err| {
            error!(field, %err, "failed to evaluate formula");
            err
        })
    }

    async fn publish_bar(&self, bar: &Bar) {
        let subject = subjects::synthetic_bars(self.portfolio.timeframe);
        let payload = match serde_json::to_vec(bar) {
            Ok(payload) => payload,
            Err(err) => {
                error!(%err, subject, "failed to encode synthetic bar");
                return;
            }
        };
        if let Err(err) = self.bus.publish(&subject, Bytes::from(payload)).await {
            error!(%err, subject, "failed to publish synthetic bar");
        }
    }
}

#[async_trait]
impl Handler for PortfolioMonitor {
    async fn handle(&self, msg: BusMessage) -> Result<(), anyhow::Error> {
        let bar: Bar = match serde_json::from_slice(&msg.payload) {
            Ok(bar) => bar,
            Err(err) => {
                warn!(%err, "failed to parse bar");
                return Err(err.into());
            }
        };

        let mut open_params = HashMap::new();
        let mut high_params = HashMap::new();
        let mut low_params = HashMap::new();
        let mut close_params = HashMap::new();
        let mut volume_sum = 0.0;

        {
            let mut bars = self.current_bars.lock();
            match bars.entry(bar.symbol.clone()) {
                Entry::Occupied(mut occupied) => {
                    let retained = occupied.get_mut();
                    if bar.start_time > retained.start_time {
                        *retained = bar.clone();
                    } else if bar.start_time == retained.start_time {
                        retained.merge(&bar);
                    } else {
                        // Stale bucket, already superseded for this symbol.
                        return Ok(());
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(bar.clone());
                }
            }

            // Synthesize only once every symbol has reported at least one bar.
            if bars.len() < self.portfolio.symbols.len() {
                debug!(
                    current = bars.len(),
                    expected = self.portfolio.symbols.len(),
                    "not all symbols have current bars"
                );
                return Ok(());
            }

            for symbol in &self.portfolio.symbols {
                let Some(current) = bars.get(&symbol.to_lowercase()) else { continue };
                open_params.insert(symbol.clone(), current.open);
                high_params.insert(symbol.clone(), current.high);
                low_params.insert(symbol.clone(), current.low);
                close_params.insert(symbol.clone(), current.close);
                volume_sum += current.volume;
            }
        }

        let synthetic = Bar::builder()
            .symbol(format!("{}.synth", self.formula.source_text()))
            .open(self.eval_field("open", &open_params)?)
            .high(self.eval_field("high", &high_params)?)
            .low(self.eval_field("low", &low_params)?)
            .close(self.eval_field("close", &close_params)?)
            .volume(volume_sum)
            .start_time(bar.start_time)
            .build();

        self.publish_bar(&synthetic).await;

        Ok(())
    }
}

#[async_trait]
impl Spawnable for PortfolioMonitor {
    async fn spawn(self: Arc<Self>) -> Result<(), anyhow::Error> {
        info!(
            id = %self.portfolio.id,
            timeframe = %self.portfolio.timeframe,
            "starting portfolio monitor"
        );

        let mut consumer = Consumer::new(self.bus.clone(), self.shutdown.clone()).with_concurrency(1);
        for symbol in &self.portfolio.symbols {
            consumer = consumer.subscribe(subjects::bars(symbol, self.portfolio.timeframe), self.clone());
        }

        let id = self.portfolio.id.clone();
        self.tracker.spawn(async move {
            if let Err(err) = consumer.start().await {
                error!(%err, id, "bar consumer terminated");
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), anyhow::Error> {
        info!(id = %self.portfolio.id, "stopping portfolio monitor");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::OffsetDateTime;

    fn portfolio(formula: &str) -> Portfolio {
        Portfolio {
            id: "p1".to_string(),
            symbols: vec!["btcusdt".to_string(), "ethusdt".to_string()],
            formula: formula.to_string(),
            timeframe: Timeframe::M1,
        }
    }

    fn bar_msg(symbol: &str, ohlcv: [f64; 5], start_time: OffsetDateTime) -> BusMessage {
        let bar = Bar::builder()
            .symbol(symbol.to_string())
            .open(ohlcv[0])
            .high(ohlcv[1])
            .low(ohlcv[2])
            .close(ohlcv[3])
            .volume(ohlcv[4])
            .start_time(start_time)
            .build();
        BusMessage {
            subject: subjects::bars(symbol, Timeframe::M1),
            payload: Bytes::from(serde_json::to_vec(&bar).unwrap()),
        }
    }

    async fn setup(formula: &str) -> (Arc<MemoryBus>, Box<dyn Subscription>, Arc<PortfolioMonitor>) {
        let bus = Arc::new(MemoryBus::new(64));
        let sub = bus.subscribe(&subjects::synthetic_bars(Timeframe::M1)).await.unwrap();
        let monitor = PortfolioMonitor::new(bus.clone(), CancellationToken::new(), portfolio(formula)).unwrap();
        (bus, sub, monitor)
    }

    async fn next_bar(sub: &mut Box<dyn Subscription>) -> Bar {
        let msg = sub.next().await.expect("expected a synthetic bar");
        serde_json::from_slice(&msg.payload).unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn waits_for_all_symbols_then_synthesizes() {
        let (_bus, mut synth, monitor) = setup("ethusdt/btcusdt").await;
        let start = datetime!(1970-01-01 00:01:00 UTC);

        monitor
            .handle(bar_msg("btcusdt", [100.0, 110.0, 90.0, 105.0, 1.0], start))
            .await
            .unwrap();

        // Gate: one of two symbols seen, nothing published yet.
        monitor
            .handle(bar_msg("ethusdt", [10.0, 11.0, 9.0, 10.5, 2.0], start))
            .await
            .unwrap();

        let bar = next_bar(&mut synth).await;
        assert_eq!(bar.symbol, "ethusdt/btcusdt.synth");
        assert_eq!(bar.open, 0.1);
        assert_eq!(bar.high, 0.1);
        assert_eq!(bar.low, 0.1);
        assert_eq!(bar.close, 0.1);
        assert_eq!(bar.volume, 3.0);
        assert_eq!(bar.start_time, start);
        assert!(!bar.is_closed);

        synth.drain().await.unwrap();
        assert!(synth.next().await.is_none(), "only one synthetic bar expected");
    }

    #[test_log::test(tokio::test)]
    async fn merges_repeated_snapshots_of_the_same_bucket() {
        let (_bus, mut synth, monitor) = setup("btcusdt - ethusdt").await;
        let start = datetime!(1970-01-01 00:01:00 UTC);

        monitor
            .handle(bar_msg("btcusdt", [100.0, 100.0, 100.0, 100.0, 1.0], start))
            .await
            .unwrap();
        monitor
            .handle(bar_msg("btcusdt", [100.0, 104.0, 99.0, 103.0, 0.5], start))
            .await
            .unwrap();
        monitor
            .handle(bar_msg("ethusdt", [10.0, 10.0, 10.0, 10.0, 2.0], start))
            .await
            .unwrap();

        let bar = next_bar(&mut synth).await;
        assert_eq!(bar.high, 94.0);
        assert_eq!(bar.low, 89.0);
        assert_eq!(bar.close, 93.0);
        assert_eq!(bar.volume, 3.5);
    }

    #[test_log::test(tokio::test)]
    async fn stale_bucket_is_dropped() {
        let (_bus, mut synth, monitor) = setup("ethusdt/btcusdt").await;
        let newer = datetime!(1970-01-01 00:02:00 UTC);
        let older = datetime!(1970-01-01 00:01:00 UTC);

        monitor
            .handle(bar_msg("btcusdt", [100.0, 100.0, 100.0, 100.0, 1.0], newer))
            .await
            .unwrap();
        monitor
            .handle(bar_msg("btcusdt", [50.0, 50.0, 50.0, 50.0, 9.0], older))
            .await
            .unwrap();
        monitor
            .handle(bar_msg("ethusdt", [10.0, 10.0, 10.0, 10.0, 2.0], newer))
            .await
            .unwrap();

        let bar = next_bar(&mut synth).await;
        assert_eq!(bar.close, 0.1);
        assert_eq!(bar.volume, 3.0);
    }

    #[test_log::test(tokio::test)]
    async fn non_numeric_result_fails_the_evaluation() {
        let (_bus, mut synth, monitor) = setup("ethusdt > btcusdt").await;
        let start = datetime!(1970-01-01 00:01:00 UTC);

        monitor
            .handle(bar_msg("btcusdt", [100.0, 100.0, 100.0, 100.0, 1.0], start))
            .await
            .unwrap();
        let result = monitor
            .handle(bar_msg("ethusdt", [10.0, 10.0, 10.0, 10.0, 2.0], start))
            .await;

        assert!(result.is_err());
        synth.drain().await.unwrap();
        assert!(synth.next().await.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn compile_error_rejects_the_portfolio() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new(64));
        let result = PortfolioMonitor::new(bus, CancellationToken::new(), portfolio("a +"));
        assert!(matches!(result, Err(MonitorError::Formula(FormulaError::Compile { .. }))));
    }

    #[test_log::test(tokio::test)]
    async fn symbols_bind_formula_variables_as_submitted() {
        let bus = Arc::new(MemoryBus::new(64));
        let mut synth = bus.subscribe(&subjects::synthetic_bars(Timeframe::M1)).await.unwrap();
        // Uppercase symbols with a matching-case formula: the variables bind
        // under the submitted spelling while the bars arrive lowercase.
        let monitor = PortfolioMonitor::new(
            bus.clone(),
            CancellationToken::new(),
            Portfolio {
                id: "p2".to_string(),
                symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
                formula: "ETHUSDT/BTCUSDT".to_string(),
                timeframe: Timeframe::M1,
            },
        )
        .unwrap();
        let start = datetime!(1970-01-01 00:01:00 UTC);

        monitor
            .handle(bar_msg("btcusdt", [100.0, 100.0, 100.0, 100.0, 1.0], start))
            .await
            .unwrap();
        monitor
            .handle(bar_msg("ethusdt", [10.0, 10.0, 10.0, 10.0, 2.0], start))
            .await
            .unwrap();

        let bar = next_bar(&mut synth).await;
        assert_eq!(bar.symbol, "ETHUSDT/BTCUSDT.synth");
        assert_eq!(bar.close, 0.1);
        assert_eq!(bar.volume, 3.0);
    }
}
