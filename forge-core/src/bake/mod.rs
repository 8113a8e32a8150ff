//! Build request resolution.
//!
//! Turns build-definition files plus requested target/group names plus CLI
//! overrides into the final job table handed to the build engine. The primary
//! parser understands native definition documents and compose v3 documents;
//! compose v2 documents are recovered through the legacy adapter in
//! [`compose`].

pub mod compose;
pub mod overrides;
mod parse;

use crate::compat;
use crate::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// A build-definition file: source name plus contents.
#[derive(Debug, Clone)]
pub struct File {
    pub name: String,
    pub data: String,
}

/// Default build-definition file names, in lookup order.
pub const DEFAULT_DEFINITION_NAMES: [&str; 4] =
    ["forge-bake.yml", "forge-bake.yaml", "forge-bake.json", "docker-compose.yml"];

impl File {
    /// Read the given definition files from disk.
    ///
    /// With no paths, looks for the default definition file names in the
    /// working directory and reads the first one that exists.
    pub fn read_local(paths: &[PathBuf]) -> Result<Vec<File>> {
        if paths.is_empty() {
            for name in DEFAULT_DEFINITION_NAMES {
                let path = Path::new(name);
                if path.exists() {
                    return Ok(vec![File::read(path)?]);
                }
            }
            return Err(ForgeError::InvalidConfig {
                reason: "no build definition file found".to_string(),
            });
        }
        paths.iter().map(|p| File::read(p)).collect()
    }

    fn read(path: &Path) -> Result<File> {
        let data = std::fs::read_to_string(path).map_err(|e| ForgeError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(File { name: path.display().to_string(), data })
    }
}

/// A named list of target (or group) names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

/// One build job specification.
///
/// Created by the primary parser or synthesized by the legacy adapter,
/// mutated by override merging and the platform compatibility shim, and
/// finally converted into engine-facing [`crate::options::BuildOptions`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Target {
    #[serde(skip)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile_inline: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cache_from: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cache_to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ssh: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull: Option<bool>,
}

impl Target {
    /// Merge another (partial) target into this one.
    ///
    /// Scalar fields replace, list fields append, map fields merge per key.
    pub fn merge_from(&mut self, other: &Target) {
        if other.context.is_some() {
            self.context = other.context.clone();
        }
        if other.dockerfile.is_some() {
            self.dockerfile = other.dockerfile.clone();
        }
        if other.dockerfile_inline.is_some() {
            self.dockerfile_inline = other.dockerfile_inline.clone();
        }
        self.args.extend(other.args.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.labels.extend(other.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.tags.extend(other.tags.iter().cloned());
        self.cache_from.extend(other.cache_from.iter().cloned());
        self.cache_to.extend(other.cache_to.iter().cloned());
        if other.target.is_some() {
            self.target = other.target.clone();
        }
        self.secrets.extend(other.secrets.iter().cloned());
        self.ssh.extend(other.ssh.iter().cloned());
        self.platforms.extend(other.platforms.iter().cloned());
        self.outputs.extend(other.outputs.iter().cloned());
        if other.no_cache.is_some() {
            self.no_cache = other.no_cache;
        }
        if other.pull.is_some() {
            self.pull = other.pull;
        }
    }
}

/// Resolved job table: exactly one target per resolved job name.
pub type TargetMap = BTreeMap<String, Target>;

/// The merged view of a build-definition file set: declared groups and
/// targets, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct BakeConfig {
    pub groups: Vec<Group>,
    pub targets: Vec<Target>,
}

impl BakeConfig {
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Merge another parsed file into this configuration.
    ///
    /// Same-name groups concatenate their member lists; same-name targets are
    /// overlaid field by field, later files winning.
    pub fn merge(&mut self, other: BakeConfig) {
        for group in other.groups {
            match self.groups.iter_mut().find(|g| g.name == group.name) {
                Some(existing) => {
                    for name in group.targets {
                        if !existing.targets.contains(&name) {
                            existing.targets.push(name);
                        }
                    }
                }
                None => self.groups.push(group),
            }
        }
        for target in other.targets {
            match self.targets.iter_mut().find(|t| t.name == target.name) {
                Some(existing) => existing.merge_from(&target),
                None => self.targets.push(target),
            }
        }
    }

    /// Expand a requested name into concrete target names.
    ///
    /// A group name expands to its members (recursively, since a group may
    /// list other groups), deduplicated in declaration order. Any other name
    /// expands to itself.
    pub fn expand(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut visited = BTreeSet::new();
        self.expand_into(name, &mut visited, &mut out);
        out
    }

    fn expand_into(&self, name: &str, visited: &mut BTreeSet<String>, out: &mut Vec<String>) {
        if !visited.insert(name.to_string()) {
            return;
        }
        match self.group(name) {
            Some(group) => {
                for member in &group.targets {
                    self.expand_into(member, visited, out);
                }
            }
            None => {
                if !out.contains(&name.to_string()) {
                    out.push(name.to_string());
                }
            }
        }
    }

    /// Resolve one concrete target name, applying any override for it.
    ///
    /// Returns `None` for names that have no target definition (group members
    /// that were filtered away); such names are silently omitted from the job
    /// table.
    pub fn resolve_target(&self, name: &str, overrides: &TargetMap) -> Option<Target> {
        let base = self.target(name)?;
        let mut target = base.clone();
        target.name = name.to_string();
        if let Some(edit) = overrides.get(name) {
            target.merge_from(edit);
        }
        Some(target)
    }

    /// Resolve the requested names into the job table.
    ///
    /// A requested name that is neither a target nor a group is an error.
    pub fn resolve(&self, names: &[String], overrides: &TargetMap) -> Result<TargetMap> {
        let mut table = TargetMap::new();
        for name in names {
            if self.group(name).is_none() && self.target(name).is_none() {
                return Err(ForgeError::UnknownTarget { name: name.clone() });
            }
            for concrete in self.expand(name) {
                if let Some(target) = self.resolve_target(&concrete, overrides) {
                    table.insert(concrete, target);
                }
            }
        }
        Ok(table)
    }
}

/// Resolve build-definition files, requested names and override strings into
/// the final job table.
///
/// Files rejected by the primary parser for their schema version fall back to
/// the legacy adapter when they qualify (see [`compose::parse_legacy`]); the
/// remaining files are parsed normally. After resolution each target runs
/// through the platform compatibility shim and the optional fleet metadata
/// pass.
#[instrument(skip(files, overrides, defaults), fields(files = files.len()))]
pub fn read_targets(
    files: &[File],
    names: &[String],
    overrides: &[String],
    defaults: &BTreeMap<String, String>,
) -> Result<TargetMap> {
    let mut config = BakeConfig::default();
    let mut legacy = Vec::new();

    for file in files {
        match parse::parse_file(file, defaults) {
            Ok(parsed) => config.merge(parsed),
            Err(ForgeError::UnsupportedSchemaVersion { ref version, .. })
                if compose::is_legacy_file(&file.name) && version.starts_with('2') =>
            {
                warn!(file = %file.name, version = %version, "falling back to legacy parsing");
                legacy.push(file);
            }
            Err(e) => return Err(e),
        }
    }

    for file in legacy {
        config.merge(compose::parse_legacy(file)?);
    }

    debug!(targets = config.targets.len(), groups = config.groups.len(), "resolved config");

    let edits = overrides::parse(&config, overrides)?;
    let mut table = config.resolve(names, &edits)?;

    compat::process_targets(&mut table)?;
    if let Some(first) = files.first() {
        compat::fleet::process(&mut table, &first.name)?;
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named_target(name: &str) -> Target {
        Target { name: name.to_string(), context: Some(format!("./{}", name)), ..Target::default() }
    }

    fn config_with(groups: Vec<(&str, Vec<&str>)>, targets: Vec<&str>) -> BakeConfig {
        BakeConfig {
            groups: groups
                .into_iter()
                .map(|(name, members)| Group {
                    name: name.to_string(),
                    targets: members.into_iter().map(String::from).collect(),
                })
                .collect(),
            targets: targets.into_iter().map(named_target).collect(),
        }
    }

    #[test]
    fn test_expand_plain_target() {
        let c = config_with(vec![], vec!["app"]);
        assert_eq!(c.expand("app"), vec!["app"]);
    }

    #[test]
    fn test_expand_group_recursive() {
        let c = config_with(
            vec![("default", vec!["app", "backend"]), ("backend", vec!["db", "cache"])],
            vec!["app", "db", "cache"],
        );
        assert_eq!(c.expand("default"), vec!["app", "db", "cache"]);
    }

    #[test]
    fn test_expand_group_cycle_terminates() {
        let c = config_with(vec![("a", vec!["b"]), ("b", vec!["a", "app"])], vec!["app"]);
        assert_eq!(c.expand("a"), vec!["app"]);
    }

    #[test]
    fn test_resolve_unknown_name_is_error() {
        let c = config_with(vec![], vec!["app"]);
        let err = c.resolve(&["missing".to_string()], &TargetMap::new()).unwrap_err();
        assert!(matches!(err, ForgeError::UnknownTarget { .. }));
    }

    #[test]
    fn test_resolve_filtered_group_member_omitted() {
        // "gone" is listed in the group but has no target definition.
        let c = config_with(vec![("default", vec!["app", "gone"])], vec!["app"]);
        let table = c.resolve(&["default".to_string()], &TargetMap::new()).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.contains_key("app"));
    }

    #[test]
    fn test_resolve_applies_overrides() {
        let c = config_with(vec![], vec!["app"]);
        let mut overrides = TargetMap::new();
        overrides.insert(
            "app".to_string(),
            Target {
                context: Some("./elsewhere".to_string()),
                tags: vec!["app:dev".to_string()],
                ..Target::default()
            },
        );
        let table = c.resolve(&["app".to_string()], &overrides).unwrap();
        let app = &table["app"];
        assert_eq!(app.context.as_deref(), Some("./elsewhere"));
        assert_eq!(app.tags, vec!["app:dev"]);
    }

    #[test]
    fn test_merge_same_target_overlays() {
        let mut base = config_with(vec![], vec!["app"]);
        let mut update = named_target("app");
        update.context = Some("./v2".to_string());
        update.tags = vec!["app:v2".to_string()];
        base.merge(BakeConfig { groups: vec![], targets: vec![update] });

        let app = base.target("app").unwrap();
        assert_eq!(app.context.as_deref(), Some("./v2"));
        assert_eq!(app.tags, vec!["app:v2"]);
        assert_eq!(base.targets.len(), 1);
    }

    #[test]
    fn test_merge_groups_concatenate() {
        let mut base = config_with(vec![("default", vec!["a"])], vec![]);
        base.merge(config_with(vec![("default", vec!["b", "a"])], vec![]));
        assert_eq!(base.groups[0].targets, vec!["a", "b"]);
    }

    #[test]
    fn test_merge_from_scalar_replace_list_append() {
        let mut t = named_target("app");
        t.tags = vec!["one".to_string()];
        t.no_cache = Some(false);

        let mut edit = Target::default();
        edit.context = Some("./new".to_string());
        edit.tags = vec!["two".to_string()];
        edit.no_cache = Some(true);
        edit.args.insert("K".to_string(), "v".to_string());

        t.merge_from(&edit);
        assert_eq!(t.context.as_deref(), Some("./new"));
        assert_eq!(t.tags, vec!["one", "two"]);
        assert_eq!(t.no_cache, Some(true));
        assert_eq!(t.args["K"], "v");
    }
}
