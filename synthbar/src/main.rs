mod config;
mod control;
mod server;

use std::sync::Arc;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use synthbar_core::prelude::*;
use synthbar_ingestor::BinanceIngestor;
use synthbar_stream::BarAggregator;

use crate::control::ControlService;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = config::load()?;
    let bus: Arc<dyn Bus> = Arc::new(NatsBus::connect(&config.nats_url).await?);

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();

    // One aggregator per configured (symbol, timeframe) pair.
    let aggregators = Manager::new();
    for timeframe in &config.timeframes {
        for symbol in &config.ingestor.symbols {
            let aggregator = BarAggregator::new(bus.clone(), shutdown.child_token(), symbol.as_str(), *timeframe);
            aggregators.spawn(&format!("{symbol}.{timeframe}"), aggregator).await?;
        }
    }

    let control = Arc::new(ControlService::new(bus.clone(), shutdown.clone()));

    let ingestor = BinanceIngestor::new(bus.clone(), shutdown.child_token(), config.ingestor.clone());
    tracker.spawn(async move {
        if let Err(err) = ingestor.start().await {
            error!(%err, "binance ingestor failed");
        }
    });

    {
        let control = control.clone();
        let server_addr = config.server_addr.clone();
        let shutdown = shutdown.clone();
        tracker.spawn(async move {
            if let Err(err) = server::serve(&server_addr, control, shutdown).await {
                error!(%err, "control server failed");
            }
        });
    }

    wait_for_signal().await?;
    info!("shutdown signal received");

    shutdown.cancel();
    if let Err(err) = control.stop_all().await {
        error!(%err, "failed to stop portfolio monitors");
    }
    if let Err(err) = aggregators.stop_all().await {
        error!(%err, "failed to stop bar aggregators");
    }
    tracker.close();
    tracker.wait().await;

    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}
