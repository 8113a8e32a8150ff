//! Generate command: emit node group configs.

use anyhow::Result;
use forge_core::{config, Node, NodeGroup, Platform};

/// Emit a single-node docker node group config as JSON on stdout.
pub fn docker(host: String, platforms: Vec<String>) -> Result<()> {
    let platforms = if platforms.is_empty() {
        vec![Platform::host()]
    } else {
        platforms
            .iter()
            .map(|p| Platform::parse(p))
            .collect::<forge_core::Result<Vec<_>>>()?
    };

    let group = NodeGroup {
        nodes: vec![Node {
            name: "docker-daemon".to_string(),
            driver: "docker".to_string(),
            endpoint: host,
            platforms,
            ..Node::default()
        }],
    };

    config::write(&mut std::io::stdout(), &group, "json")?;
    Ok(())
}
