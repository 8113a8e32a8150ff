//! Podman driver: runs a containerized builder on the worker.

use super::{Driver, DriverConfig, DriverFactory, DriverStatus, WorkerClient};
use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Builder image used when the node does not override it.
const DEFAULT_BUILDKIT_IMAGE: &str = "docker.io/moby/buildkit:buildx-stable-1";

pub struct PodmanFactory;

impl DriverFactory for PodmanFactory {
    fn kind(&self) -> &'static str {
        "podman"
    }

    fn priority(&self) -> u8 {
        1
    }

    fn allows_instances(&self) -> bool {
        true
    }

    fn new_driver(&self, client: WorkerClient, config: DriverConfig) -> Result<Arc<dyn Driver>> {
        let image = parse_opts(&config.opts)?;
        Ok(Arc::new(PodmanDriver { client, config, image }))
    }
}

/// Validate the driver options; returns the builder image override, if any.
fn parse_opts(opts: &BTreeMap<String, String>) -> Result<Option<String>> {
    let mut image = None;
    for (key, value) in opts {
        match key.as_str() {
            "image" => image = Some(value.clone()),
            "network" | "cgroup-parent" => {
                return Err(ForgeError::DriverOptionUnsupported { option: key.clone() })
            }
            k if k.starts_with("env.") => {
                return Err(ForgeError::DriverOptionUnsupported { option: key.clone() })
            }
            _ => {
                return Err(ForgeError::InvalidDriverOption {
                    option: key.clone(),
                    driver: "podman".to_string(),
                })
            }
        }
    }
    Ok(image)
}

#[derive(Debug)]
struct PodmanDriver {
    client: WorkerClient,
    config: DriverConfig,
    image: Option<String>,
}

#[async_trait]
impl Driver for PodmanDriver {
    fn kind(&self) -> &str {
        "podman"
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn status(&self) -> Result<DriverStatus> {
        self.client.ping().await?;
        Ok(DriverStatus::Running)
    }

    async fn bootstrap(&self) -> Result<()> {
        let image = self.image.as_deref().unwrap_or(DEFAULT_BUILDKIT_IMAGE);
        debug!(builder = %self.config.name, image = %image, "bootstrapping builder container");
        self.client.bootstrap(&self.config.name, Some(image)).await?;
        info!(builder = %self.config.name, "builder ready");
        Ok(())
    }

    fn client(&self) -> &WorkerClient {
        &self.client
    }
}
