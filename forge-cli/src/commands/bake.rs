//! Bake command: resolve targets, assemble drivers, submit to the engine.

use anyhow::{bail, Context, Result};
use forge_core::{compat, config, engine, Cancel, File, Platform};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub async fn run(
    config_path: Option<&Path>,
    targets: Vec<String>,
    files: Vec<PathBuf>,
    overrides: Vec<String>,
    print: bool,
    node_filter: Vec<String>,
) -> Result<()> {
    let targets = if targets.is_empty() { vec!["default".to_string()] } else { targets };

    let files = File::read_local(&files).context("reading build definition files")?;

    // Built-in substitution variables available to the definition parser.
    let defaults = BTreeMap::from([
        ("FORGE_LOCAL_PLATFORM".to_string(), Platform::host().to_string()),
        ("FORGE_CMD_CONTEXT".to_string(), "cwd://".to_string()),
    ]);

    let table = forge_core::read_targets(&files, &targets, &overrides, &defaults)
        .context("resolving targets")?;
    debug!(targets = table.len(), "resolved targets");

    if print {
        let doc = serde_json::json!({ "target": table });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let mut group = config::load(config_path).context("loading config")?;
    if !node_filter.is_empty() {
        group.nodes.retain(|n| node_filter.iter().any(|name| name == &n.name));
        if group.nodes.is_empty() {
            bail!("no nodes left");
        }
    }

    let cancel = Cancel::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling driver assembly");
            signal_cancel.cancel();
        }
    });

    let context_path_hash = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let drivers = forge_core::drivers_for_node_group(&group, &context_path_hash, &cancel)
        .await
        .context("assembling drivers")?;
    debug!(drivers = drivers.len(), "resolved drivers");

    let mut options = forge_core::to_build_options(&table).context("resolving build options")?;
    compat::resolve_build_options(&mut options, &table)?;

    let plan = engine::submit(&options, &drivers).await.context("assembly failed")?;
    for submission in &plan {
        println!(
            "{}: worker={} platforms=[{}] tags=[{}]",
            submission.target,
            submission.worker,
            submission.platforms.join(", "),
            submission.tags.join(", "),
        );
    }

    Ok(())
}
