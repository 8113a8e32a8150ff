//! Build worker drivers.
//!
//! A driver wraps one negotiated worker connection with the capability to
//! bootstrap a remote builder and hand the connection to the build engine.
//! Factories are registered per driver kind in an immutable, process-wide
//! registry that is only ever read once assembly begins.

pub mod client;
mod docker;
mod podman;

pub use client::WorkerClient;

use crate::cancel::Cancel;
use crate::config::{Node, NodeGroup};
use crate::error::{ForgeError, Result};
use crate::platform::Platform;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Status of a driver's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// Connected, builder not bootstrapped yet.
    Inactive,
    /// Connected and answering probes.
    Running,
}

/// Per-node construction parameters handed to a factory.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Deterministic builder instance name, unique per node.
    pub name: String,
    /// Driver options from the node, minus the consumed TLS keys.
    pub opts: BTreeMap<String, String>,
    /// Extra flags forwarded to the builder.
    pub flags: Vec<String>,
    /// Extra files forwarded to the builder.
    pub files: BTreeMap<String, String>,
    /// Platforms the node claims to support.
    pub platforms: Vec<Platform>,
    /// Hash of the local build context path, for cache scoping.
    pub context_path_hash: String,
}

/// A capability provider for one build worker.
#[async_trait]
pub trait Driver: Send + Sync + fmt::Debug {
    /// Driver kind, matching the factory that built it.
    fn kind(&self) -> &str;

    /// Builder instance name.
    fn name(&self) -> &str;

    /// Report worker status.
    async fn status(&self) -> Result<DriverStatus>;

    /// Prepare the remote builder so the worker can accept jobs.
    async fn bootstrap(&self) -> Result<()>;

    /// The connection handed to the build engine.
    fn client(&self) -> &WorkerClient;
}

/// Builds drivers of one kind.
pub trait DriverFactory: Send + Sync {
    /// The driver kind this factory serves.
    fn kind(&self) -> &'static str;

    /// Relative preference when several factories could serve a node.
    fn priority(&self) -> u8;

    /// Whether multiple builder instances per worker are allowed.
    fn allows_instances(&self) -> bool;

    /// Build a driver around an established worker connection.
    fn new_driver(&self, client: WorkerClient, config: DriverConfig) -> Result<Arc<dyn Driver>>;
}

/// Process-wide factory registry, initialized before any request and never
/// mutated afterwards.
static FACTORIES: Lazy<BTreeMap<&'static str, &'static (dyn DriverFactory)>> = Lazy::new(|| {
    let factories: [&'static (dyn DriverFactory); 2] =
        [&docker::DockerFactory, &podman::PodmanFactory];
    factories.into_iter().map(|f| (f.kind(), f)).collect()
});

/// Look up the factory for a driver kind.
pub fn factory(kind: &str) -> Option<&'static dyn DriverFactory> {
    FACTORIES.get(kind).copied()
}

/// One assembled driver slot, index-stable with the node group.
///
/// Either `driver` or `err` is set; a captured per-node error never aborts
/// sibling nodes.
#[derive(Debug)]
pub struct DriverInfo {
    pub name: String,
    pub platforms: Vec<Platform>,
    pub driver: Option<Arc<dyn Driver>>,
    pub err: Option<ForgeError>,
}

/// Concurrently build one driver per configured node.
///
/// Factories are resolved once per distinct kind before the fan-out; an
/// unknown kind is a configuration error aborting the whole group. Per-node
/// connection or construction failures are captured into the node's slot.
/// The result preserves node order regardless of completion order. Past the
/// up-front configuration checks, the call itself fails only when a worker
/// task dies (a coordination error).
#[instrument(skip(group, cancel), fields(nodes = group.nodes.len()))]
pub async fn drivers_for_node_group(
    group: &NodeGroup,
    context_path_hash: &str,
    cancel: &Cancel,
) -> Result<Vec<DriverInfo>> {
    group.validate()?;

    // Immutable factory lookup, built before fan-out and only read after.
    let mut factories: BTreeMap<&str, &'static dyn DriverFactory> = BTreeMap::new();
    for node in &group.nodes {
        if !factories.contains_key(node.driver.as_str()) {
            let f = factory(&node.driver).ok_or_else(|| ForgeError::UnknownDriver {
                driver: node.driver.clone(),
                node: node.name.clone(),
            })?;
            factories.insert(&node.driver, f);
        }
    }

    let mut handles = Vec::with_capacity(group.nodes.len());
    for node in &group.nodes {
        let factory = factories[node.driver.as_str()];
        let node = node.clone();
        let hash = context_path_hash.to_string();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(build_node_driver(node, factory, hash, cancel)));
    }

    let mut infos = Vec::with_capacity(handles.len());
    for (handle, node) in handles.into_iter().zip(&group.nodes) {
        let info = handle
            .await
            .map_err(|e| ForgeError::TaskFailed { reason: e.to_string() })?;
        if let Some(err) = &info.err {
            error!(driver = %node.driver, node = %node.name, error = %err, "driver assembly failed");
        }
        infos.push(info);
    }

    Ok(infos)
}

async fn build_node_driver(
    node: Node,
    factory: &'static dyn DriverFactory,
    context_path_hash: String,
    cancel: Cancel,
) -> DriverInfo {
    let mut info = DriverInfo {
        name: node.name.clone(),
        platforms: node.platforms.clone(),
        driver: None,
        err: None,
    };

    let build = async {
        let mut opts = node.driver_opts.clone();
        let client = WorkerClient::connect(&node.endpoint, &mut opts).await?;
        debug!(node = %node.name, version = client.version(), "worker connected");

        let config = DriverConfig {
            name: format!("forge_buildkit_{}", node.name),
            opts,
            flags: node.flags.clone(),
            files: node.files.clone(),
            platforms: node.platforms.clone(),
            context_path_hash,
        };
        factory.new_driver(client, config)
    };

    tokio::select! {
        result = build => match result {
            Ok(driver) => info.driver = Some(driver),
            Err(e) => info.err = Some(e),
        },
        _ = cancel.cancelled() => info.err = Some(ForgeError::Cancelled),
    }

    info
}
