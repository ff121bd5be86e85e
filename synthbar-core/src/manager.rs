use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::errors::ManagerError;

/// A unit the lifecycle manager can start and stop: the bar aggregator and
/// the portfolio monitor are the two concrete shapes.
#[async_trait]
pub trait Spawnable: Send + Sync {
    /// Begin the unit's subscriptions in the background and return.
    async fn spawn(self: Arc<Self>) -> Result<(), anyhow::Error>;

    /// Cancel the unit and wait for its tasks to finish.
    async fn stop(&self) -> Result<(), anyhow::Error>;
}

/// Keyed registry of live units. Stop calls run outside the registry lock so
/// a slow shutdown cannot block other operations.
#[derive(Default)]
pub struct Manager {
    items: RwLock<HashMap<String, Arc<dyn Spawnable>>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `item` under `id`. The item is only registered once its spawn
    /// succeeded; a taken id fails with [`ManagerError::AlreadyExists`].
    pub async fn spawn(&self, id: &str, item: Arc<dyn Spawnable>) -> Result<(), ManagerError> {
        let mut items = self.items.write().await;
        if items.contains_key(id) {
            return Err(ManagerError::AlreadyExists(id.to_string()));
        }

        item.clone().spawn().await.map_err(|source| ManagerError::Spawn {
            id: id.to_string(),
            source,
        })?;
        items.insert(id.to_string(), item);
        info!(id, "spawned unit");

        Ok(())
    }

    /// Remove and stop the unit under `id`. Unknown ids are a no-op success.
    pub async fn evict(&self, id: &str) -> Result<(), ManagerError> {
        let item = self.items.write().await.remove(id);
        let Some(item) = item else {
            return Ok(());
        };

        item.stop().await.map_err(|source| ManagerError::Stop {
            id: id.to_string(),
            source,
        })?;
        info!(id, "evicted unit");

        Ok(())
    }

    /// Snapshot and clear the registry, then stop every unit, aggregating
    /// all failures.
    pub async fn stop_all(&self) -> Result<(), ManagerError> {
        let items: Vec<_> = {
            let mut items = self.items.write().await;
            items.drain().collect()
        };

        let mut failures = Vec::new();
        for (id, item) in items {
            if let Err(source) = item.stop().await {
                error!(id, %source, "failed to stop unit");
                failures.push(ManagerError::Stop { id, source });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ManagerError::StopAll(failures))
        }
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}
