//! Command-line target overrides.
//!
//! Overrides are strings of the form `pattern.field=value` or
//! `pattern.field.key=value`. The pattern selects targets by exact name or,
//! failing that, by glob; the field names a member of a fixed vocabulary.
//! List-typed fields append, scalar fields replace, and `args`/`labels` set a
//! single map entry keyed by the third path component.

use super::{BakeConfig, Target, TargetMap};
use crate::error::{ForgeError, Result};
use glob::Pattern;
use tracing::{debug, instrument};

/// Expand a target pattern into concrete target names.
///
/// An exact target name short-circuits, even when the name would also satisfy
/// a broader glob. Otherwise the pattern is matched as a glob against every
/// declared target, in declaration order. Matching nothing is an error.
pub fn expand_targets(config: &BakeConfig, pattern: &str) -> Result<Vec<String>> {
    if config.targets.iter().any(|t| t.name == pattern) {
        return Ok(vec![pattern.to_string()]);
    }

    let matcher = Pattern::new(pattern).map_err(|e| ForgeError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let names: Vec<String> = config
        .targets
        .iter()
        .filter(|t| matcher.matches(&t.name))
        .map(|t| t.name.clone())
        .collect();

    if names.is_empty() {
        return Err(ForgeError::NoMatchingTarget { pattern: pattern.to_string() });
    }
    Ok(names)
}

/// Parse override strings into per-target edits.
///
/// Overrides are applied in the order given; later overrides for the same
/// field on the same target replace scalars and extend lists.
#[instrument(skip(config, overrides), fields(overrides = overrides.len()))]
pub fn parse(config: &BakeConfig, overrides: &[String]) -> Result<TargetMap> {
    let mut edits = TargetMap::new();

    for raw in overrides {
        let (key_path, value) = match raw.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (raw.as_str(), None),
        };

        let keys: Vec<&str> = key_path.splitn(3, '.').collect();
        if keys.len() < 2 {
            return Err(ForgeError::InvalidOverride {
                value: raw.clone(),
                reason: "expected pattern.field=value".to_string(),
            });
        }
        let (pattern, field) = (keys[0], keys[1]);
        let sub_key = keys.get(2).copied();

        if value.is_none() && field != "args" {
            return Err(ForgeError::InvalidOverride {
                value: raw.clone(),
                reason: "expected pattern.field=value".to_string(),
            });
        }

        let names = expand_targets(config, pattern)?;
        debug!(pattern = %pattern, targets = ?names, "expanded override pattern");

        for name in names {
            let target = edits.entry(name).or_default();
            apply(target, field, sub_key, value, raw)?;
        }
    }

    Ok(edits)
}

fn apply(
    target: &mut Target,
    field: &str,
    sub_key: Option<&str>,
    value: Option<&str>,
    raw: &str,
) -> Result<()> {
    if field == "args" {
        let key = sub_key.ok_or_else(|| ForgeError::InvalidOverride {
            value: raw.to_string(),
            reason: "args requires a key".to_string(),
        })?;
        match value {
            Some(v) => {
                target.args.insert(key.to_string(), v.to_string());
            }
            // No explicit value: read it from the environment variable of the
            // same name; skip the override when the variable is unset.
            None => {
                if let Ok(v) = std::env::var(key) {
                    target.args.insert(key.to_string(), v);
                }
            }
        }
        return Ok(());
    }

    // Every other field was validated above to carry an explicit value.
    let value = value.unwrap_or_default();

    match field {
        "context" => target.context = Some(value.to_string()),
        "dockerfile" => target.dockerfile = Some(value.to_string()),
        "labels" => {
            let key = sub_key.ok_or_else(|| ForgeError::InvalidOverride {
                value: raw.to_string(),
                reason: "labels requires a key".to_string(),
            })?;
            target.labels.insert(key.to_string(), value.to_string());
        }
        "tags" => target.tags.push(value.to_string()),
        "cache-from" => target.cache_from.push(value.to_string()),
        "cache-to" => target.cache_to.push(value.to_string()),
        "target" => target.target = Some(value.to_string()),
        "secrets" => target.secrets.push(value.to_string()),
        "ssh" => target.ssh.push(value.to_string()),
        "platform" => target.platforms.push(value.to_string()),
        "output" => target.outputs.push(value.to_string()),
        "no-cache" => target.no_cache = Some(parse_bool(field, value)?),
        "pull" => target.pull = Some(parse_bool(field, value)?),
        other => return Err(ForgeError::UnknownOverrideKey { key: other.to_string() }),
    }
    Ok(())
}

fn parse_bool(field: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(ForgeError::InvalidOverride {
            value: other.to_string(),
            reason: format!("invalid value for boolean key {}", field),
        }),
    }
}
