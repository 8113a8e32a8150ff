//! Engine-facing build options.
//!
//! [`BuildOptions`] is the read-only shape the external build engine
//! consumes: one entry per resolved job, with the build-file reference
//! replaced by an inline body where the compatibility shim rewrote it.

use crate::bake::{Target, TargetMap};
use crate::error::Result;
use crate::platform::Platform;
use serde::Serialize;
use std::collections::BTreeMap;

/// Fully-resolved options for one build job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildOptions {
    pub context: String,
    /// Build-file path inside the context; empty when `dockerfile_inline` is
    /// set.
    pub dockerfile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile_inline: Option<String>,
    pub args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub tags: Vec<String>,
    pub cache_from: Vec<String>,
    pub cache_to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub secrets: Vec<String>,
    pub ssh: Vec<String>,
    pub platforms: Vec<Platform>,
    pub outputs: Vec<String>,
    pub no_cache: bool,
    pub pull: bool,
}

/// Convert the resolved job table into engine-facing build options.
pub fn to_build_options(table: &TargetMap) -> Result<BTreeMap<String, BuildOptions>> {
    let mut options = BTreeMap::new();
    for (name, target) in table {
        options.insert(name.clone(), target_options(target)?);
    }
    Ok(options)
}

fn target_options(target: &Target) -> Result<BuildOptions> {
    let platforms = target
        .platforms
        .iter()
        .map(|spec| Platform::parse(spec))
        .collect::<Result<Vec<_>>>()?;

    let dockerfile = match (&target.dockerfile_inline, &target.dockerfile) {
        (Some(_), _) => String::new(),
        (None, Some(path)) => path.clone(),
        (None, None) => "Dockerfile".to_string(),
    };

    Ok(BuildOptions {
        context: target.context.clone().unwrap_or_else(|| ".".to_string()),
        dockerfile,
        dockerfile_inline: target.dockerfile_inline.clone(),
        args: target.args.clone(),
        labels: target.labels.clone(),
        tags: target.tags.clone(),
        cache_from: target.cache_from.clone(),
        cache_to: target.cache_to.clone(),
        target: target.target.clone(),
        secrets: target.secrets.clone(),
        ssh: target.ssh.clone(),
        platforms,
        outputs: target.outputs.clone(),
        no_cache: target.no_cache.unwrap_or(false),
        pull: target.pull.unwrap_or(false),
    })
}
