//! Primary build-definition parser.
//!
//! Understands two document shapes, both YAML (JSON parses as a YAML subset):
//!
//! - native definitions with top-level `group:` and `target:` maps;
//! - compose documents, detected by a `services:` key. Version 3 (or
//!   unversioned) documents are parsed directly; the 2.x family is rejected
//!   with a typed [`ForgeError::UnsupportedSchemaVersion`] so the caller can
//!   arm the legacy adapter.
//!
//! Before parsing, `${NAME}` references are substituted from the process
//! environment, falling back to the caller-supplied built-in defaults.

use super::{compose, BakeConfig, File, Group, Target};
use crate::error::{ForgeError, Result};
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Parse one build-definition file into a partial configuration.
#[instrument(skip(file, defaults), fields(file = %file.name))]
pub fn parse_file(file: &File, defaults: &BTreeMap<String, String>) -> Result<BakeConfig> {
    let content = substitute_vars(&file.data, defaults);

    let value: Value = serde_yaml::from_str(&content).map_err(|e| ForgeError::ParseError {
        file: file.name.clone(),
        reason: e.to_string(),
    })?;

    if !value.is_mapping() {
        return Err(ForgeError::ParseError {
            file: file.name.clone(),
            reason: "document is not a mapping".to_string(),
        });
    }

    if value.get("services").is_some() {
        // A bare `version: 2` parses as a number, not a string.
        let version = match value.get("version") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        if version.is_empty() || version.starts_with('3') {
            debug!(version = %version, "parsing compose document");
            return compose::parse_document(&file.name, &value);
        }
        return Err(ForgeError::UnsupportedSchemaVersion { file: file.name.clone(), version });
    }

    parse_native(file, &value)
}

fn parse_native(file: &File, value: &Value) -> Result<BakeConfig> {
    let mut config = BakeConfig::default();

    if let Some(groups) = value.get("group") {
        let groups = groups.as_mapping().ok_or_else(|| ForgeError::ParseError {
            file: file.name.clone(),
            reason: "invalid group field".to_string(),
        })?;
        for (key, body) in groups {
            let name = mapping_key(file, key)?;
            let mut group: Group =
                serde_yaml::from_value(body.clone()).map_err(|e| ForgeError::ParseError {
                    file: file.name.clone(),
                    reason: format!("group '{}': {}", name, e),
                })?;
            group.name = name;
            config.groups.push(group);
        }
    }

    if let Some(targets) = value.get("target") {
        let targets = targets.as_mapping().ok_or_else(|| ForgeError::ParseError {
            file: file.name.clone(),
            reason: "invalid target field".to_string(),
        })?;
        for (key, body) in targets {
            let name = mapping_key(file, key)?;
            let mut target: Target =
                serde_yaml::from_value(body.clone()).map_err(|e| ForgeError::ParseError {
                    file: file.name.clone(),
                    reason: format!("target '{}': {}", name, e),
                })?;
            target.name = name;
            config.targets.push(target);
        }
    }

    if config.groups.is_empty() && config.targets.is_empty() {
        return Err(ForgeError::ParseError {
            file: file.name.clone(),
            reason: "no targets or groups defined".to_string(),
        });
    }

    Ok(config)
}

fn mapping_key(file: &File, key: &Value) -> Result<String> {
    key.as_str().map(str::to_string).ok_or_else(|| ForgeError::ParseError {
        file: file.name.clone(),
        reason: "non-string mapping key".to_string(),
    })
}

/// Substitute `${NAME}` references.
///
/// The process environment wins over the built-in defaults; references to
/// names known to neither are left untouched.
fn substitute_vars(content: &str, defaults: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str("${");
            rest = after;
            continue;
        };
        let name = &after[..end];
        let valid = !name.is_empty()
            && !name.starts_with(|c: char| c.is_ascii_digit())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        let value = if valid {
            std::env::var(name).ok().or_else(|| defaults.get(name).cloned())
        } else {
            None
        };
        match value {
            Some(v) => out.push_str(&v),
            None => {
                out.push_str("${");
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, data: &str) -> File {
        File { name: name.to_string(), data: data.to_string() }
    }

    #[test]
    fn test_parse_native_document() {
        let f = file(
            "forge-bake.yml",
            r#"
group:
  default:
    targets: [app, db]
target:
  app:
    context: ./app
    dockerfile: Dockerfile
    args:
      MODE: release
    tags: ["registry.local/app:latest"]
    platforms: ["linux/arm/v7"]
  db:
    context: ./db
    no-cache: true
"#,
        );

        let config = parse_file(&f, &BTreeMap::new()).unwrap();
        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.groups[0].targets, vec!["app", "db"]);
        assert_eq!(config.targets.len(), 2);

        let app = config.target("app").unwrap();
        assert_eq!(app.context.as_deref(), Some("./app"));
        assert_eq!(app.args["MODE"], "release");
        assert_eq!(app.platforms, vec!["linux/arm/v7"]);

        let db = config.target("db").unwrap();
        assert_eq!(db.no_cache, Some(true));
    }

    #[test]
    fn test_parse_native_json_document() {
        let f = file(
            "forge-bake.json",
            r#"{"target": {"app": {"context": ".", "tags": ["app:latest"]}}}"#,
        );
        let config = parse_file(&f, &BTreeMap::new()).unwrap();
        assert_eq!(config.target("app").unwrap().tags, vec!["app:latest"]);
    }

    #[test]
    fn test_parse_compose_v3_document() {
        let f = file(
            "docker-compose.yml",
            r#"
version: "3.7"
services:
  web:
    build: ./web
    image: registry.local/web
"#,
        );
        let config = parse_file(&f, &BTreeMap::new()).unwrap();
        let web = config.target("web").unwrap();
        assert_eq!(web.tags, vec!["registry.local/web"]);
        assert_eq!(config.groups[0].name, "default");
    }

    #[test]
    fn test_parse_compose_v2_rejected_with_typed_error() {
        let f = file("docker-compose.yml", "version: \"2.1\"\nservices:\n  web:\n    build: .\n");
        let err = parse_file(&f, &BTreeMap::new()).unwrap_err();
        match err {
            ForgeError::UnsupportedSchemaVersion { version, .. } => assert_eq!(version, "2.1"),
            other => panic!("expected UnsupportedSchemaVersion, got {other}"),
        }
    }

    #[test]
    fn test_parse_rejects_empty_document() {
        let f = file("forge-bake.yml", "{}");
        assert!(matches!(
            parse_file(&f, &BTreeMap::new()),
            Err(ForgeError::ParseError { .. })
        ));
    }

    #[test]
    fn test_substitute_vars_defaults_and_unknown() {
        let defaults =
            BTreeMap::from([("FORGE_LOCAL_PLATFORM".to_string(), "linux/amd64".to_string())]);
        let out = substitute_vars("platform: ${FORGE_LOCAL_PLATFORM} keep: ${NOPE_404}", &defaults);
        assert_eq!(out, "platform: linux/amd64 keep: ${NOPE_404}");
    }

    #[test]
    fn test_substitute_vars_env_wins() {
        std::env::set_var("FORGE_TEST_SUBST_VAR", "from-env");
        let defaults =
            BTreeMap::from([("FORGE_TEST_SUBST_VAR".to_string(), "from-defaults".to_string())]);
        let out = substitute_vars("${FORGE_TEST_SUBST_VAR}", &defaults);
        std::env::remove_var("FORGE_TEST_SUBST_VAR");
        assert_eq!(out, "from-env");
    }
}
