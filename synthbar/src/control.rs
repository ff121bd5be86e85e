use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use synthbar_core::prelude::*;
use synthbar_stream::{MonitorError, PortfolioMonitor};

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

impl ControlError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Manager(ManagerError::AlreadyExists(_)))
    }
}

/// Translates control-surface requests into portfolio monitor lifecycles.
pub struct ControlService {
    bus: Arc<dyn Bus>,
    manager: Manager,
    shutdown: CancellationToken,
}

impl ControlService {
    pub fn new(bus: Arc<dyn Bus>, shutdown: CancellationToken) -> Self {
        Self {
            bus,
            manager: Manager::new(),
            shutdown,
        }
    }

    /// Compile and spawn a monitor for `portfolio`. Fails synchronously on a
    /// malformed formula or a duplicate id; nothing is registered in either
    /// case.
    pub async fn submit_portfolio(&self, portfolio: Portfolio) -> Result<(), ControlError> {
        info!(id = %portfolio.id, "submitting portfolio");

        let monitor = PortfolioMonitor::new(self.bus.clone(), self.shutdown.child_token(), portfolio.clone())?;
        self.manager.spawn(&portfolio.id, monitor).await?;

        Ok(())
    }

    /// Stop and remove the monitor for `id`. Unknown ids succeed silently.
    pub async fn stop_portfolio(&self, id: &str) -> Result<(), ControlError> {
        info!(id, "stopping portfolio");
        self.manager.evict(id).await?;
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<(), ControlError> {
        self.manager.stop_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratio_portfolio(id: &str) -> Portfolio {
        Portfolio {
            id: id.to_string(),
            symbols: vec!["btcusdt".to_string(), "ethusdt".to_string()],
            formula: "ethusdt/btcusdt".to_string(),
            timeframe: Timeframe::M1,
        }
    }

    fn service() -> ControlService {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new(64));
        ControlService::new(bus, CancellationToken::new())
    }

    #[test_log::test(tokio::test)]
    async fn duplicate_submit_is_rejected() {
        let control = service();

        control.submit_portfolio(ratio_portfolio("p1")).await.unwrap();
        let err = control.submit_portfolio(ratio_portfolio("p1")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[test_log::test(tokio::test)]
    async fn stop_is_idempotent() {
        let control = service();

        control.submit_portfolio(ratio_portfolio("p1")).await.unwrap();
        control.stop_portfolio("p1").await.unwrap();
        control.stop_portfolio("p1").await.unwrap();

        // The id is free again after eviction.
        control.submit_portfolio(ratio_portfolio("p1")).await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn malformed_formula_spawns_nothing() {
        let control = service();

        let mut portfolio = ratio_portfolio("p2");
        portfolio.formula = "a +".to_string();

        let err = control.submit_portfolio(portfolio).await.unwrap_err();
        assert!(matches!(err, ControlError::Monitor(_)));

        // Nothing registered under the id.
        control.submit_portfolio(ratio_portfolio("p2")).await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn stop_all_clears_every_monitor() {
        let control = service();

        control.submit_portfolio(ratio_portfolio("p1")).await.unwrap();
        control.submit_portfolio(ratio_portfolio("p2")).await.unwrap();
        control.stop_all().await.unwrap();

        control.submit_portfolio(ratio_portfolio("p1")).await.unwrap();
        control.submit_portfolio(ratio_portfolio("p2")).await.unwrap();
    }
}
