//! Docker driver: uses the worker's embedded builder directly.

use super::{Driver, DriverConfig, DriverFactory, DriverStatus, WorkerClient};
use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct DockerFactory;

impl DriverFactory for DockerFactory {
    fn kind(&self) -> &'static str {
        "docker"
    }

    fn priority(&self) -> u8 {
        2
    }

    fn allows_instances(&self) -> bool {
        false
    }

    fn new_driver(&self, client: WorkerClient, config: DriverConfig) -> Result<Arc<dyn Driver>> {
        // The embedded builder is not configurable per instance.
        if let Some(option) = config.opts.keys().next() {
            return Err(ForgeError::InvalidDriverOption {
                option: option.clone(),
                driver: "docker".to_string(),
            });
        }
        Ok(Arc::new(DockerDriver { client, config }))
    }
}

#[derive(Debug)]
struct DockerDriver {
    client: WorkerClient,
    config: DriverConfig,
}

#[async_trait]
impl Driver for DockerDriver {
    fn kind(&self) -> &str {
        "docker"
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn status(&self) -> Result<DriverStatus> {
        self.client.ping().await?;
        Ok(DriverStatus::Running)
    }

    async fn bootstrap(&self) -> Result<()> {
        // Nothing to start: the worker builds with its embedded engine.
        debug!(builder = %self.config.name, "worker uses its embedded builder");
        Ok(())
    }

    fn client(&self) -> &WorkerClient {
        &self.client
    }
}
