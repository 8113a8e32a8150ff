//! Nodes command: list the configured build nodes.

use anyhow::{Context, Result};
use forge_core::config;
use std::path::Path;
use tabled::{Table, Tabled};

pub fn list(config_path: Option<&Path>) -> Result<()> {
    let group = config::load(config_path).context("loading config")?;

    #[derive(Tabled)]
    struct NodeRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "DRIVER")]
        driver: String,
        #[tabled(rename = "ENDPOINT")]
        endpoint: String,
        #[tabled(rename = "PLATFORMS")]
        platforms: String,
    }

    let rows: Vec<NodeRow> = group
        .nodes
        .iter()
        .map(|n| NodeRow {
            name: n.name.clone(),
            driver: n.driver.clone(),
            endpoint: n.endpoint.clone(),
            platforms: n
                .platforms
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(","),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}
