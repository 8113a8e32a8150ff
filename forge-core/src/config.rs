//! Build cluster configuration.
//!
//! A [`NodeGroup`] names the set of build workers a request may run against.
//! Groups are loaded from `forge.{yml,yaml,json}` in the working directory or
//! the user config directory, or from an explicit path.

use crate::error::{ForgeError, Result};
use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An ordered list of build workers sharing one logical cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeGroup {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// One build worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub name: String,
    pub driver: String,
    pub endpoint: String,
    pub driver_opts: BTreeMap<String, String>,
    pub platforms: Vec<Platform>,
    pub flags: Vec<String>,
    pub files: BTreeMap<String, String>,
}

impl NodeGroup {
    /// Validate the group invariants: at least one node, unique node names.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(ForgeError::InvalidConfig {
                reason: "node group has no nodes".to_string(),
            });
        }
        let mut seen = std::collections::BTreeSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(ForgeError::InvalidConfig {
                    reason: "node with empty name".to_string(),
                });
            }
            if !seen.insert(node.name.as_str()) {
                return Err(ForgeError::InvalidConfig {
                    reason: format!("duplicate node name '{}'", node.name),
                });
            }
        }
        Ok(())
    }
}

/// Get the forge config directory, creating it if necessary.
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| ForgeError::InvalidConfig {
        reason: "could not determine user config directory".to_string(),
    })?;
    let dir = base.join("forge");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .map_err(|e| ForgeError::IoError { path: dir.clone(), source: e })?;
    }
    Ok(dir)
}

/// Candidate config file names, in lookup order.
const CONFIG_NAMES: [&str; 3] = ["forge.yml", "forge.yaml", "forge.json"];

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_NAMES.iter().map(|name| dir.join(name)).find(|p| p.exists())
}

/// Load a node group configuration.
///
/// With an explicit path, parses that file. Otherwise looks for
/// `forge.{yml,yaml,json}` in the working directory, then in the user config
/// directory. Fails when no config file is found.
pub fn load(path: Option<&Path>) -> Result<NodeGroup> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let local = std::env::current_dir().ok().and_then(|cwd| find_in(&cwd));
            match local.or_else(|| config_dir().ok().and_then(|dir| find_in(&dir))) {
                Some(p) => p,
                None => {
                    return Err(ForgeError::InvalidConfig {
                        reason: "no config file found".to_string(),
                    })
                }
            }
        }
    };

    debug!(path = %path.display(), "loading configuration");
    parse(&path)
}

/// Parse a node group configuration file, dispatching on the extension.
pub fn parse(path: &Path) -> Result<NodeGroup> {
    let content = std::fs::read_to_string(path).map_err(|e| ForgeError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let group: NodeGroup = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| ForgeError::ParseError {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?,
        "json" => serde_json::from_str(&content).map_err(|e| ForgeError::ParseError {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?,
        other => {
            return Err(ForgeError::InvalidConfig {
                reason: format!("config format not supported: .{}", other),
            })
        }
    };

    group.validate()?;
    Ok(group)
}

/// Serialize a node group as `yaml` or `json` to the given writer.
pub fn write(w: &mut dyn Write, group: &NodeGroup, format: &str) -> Result<()> {
    let rendered = match format {
        "yaml" | "yml" => serde_yaml::to_string(group).map_err(ForgeError::internal)?,
        "json" => {
            let mut s = serde_json::to_string_pretty(group).map_err(ForgeError::internal)?;
            s.push('\n');
            s
        }
        other => {
            return Err(ForgeError::InvalidConfig {
                reason: format!("config format not supported: {}", other),
            })
        }
    };
    w.write_all(rendered.as_bytes())
        .map_err(|e| ForgeError::Internal(format!("write failed: {}", e)))
}
