//! Compose document parsing.
//!
//! [`parse_document`] extracts build targets from a compose-style service
//! document. It serves two callers: the primary parser feeds it version 3
//! documents directly, and [`parse_legacy`] recovers version 2.x documents
//! that the primary parser rejects with a typed schema-version error.
//!
//! Only the build-relevant subset of a service is consumed: the `build`
//! instruction (bare context string or structured map) and the `image` name.
//! Services without a `build` instruction are image-only and not buildable;
//! they are skipped.

use super::{BakeConfig, File, Group, Target};
use crate::error::{ForgeError, Result};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Whether a file name is recognized as a legacy compose file.
pub fn is_legacy_file(name: &str) -> bool {
    name.ends_with("docker-compose.yml")
}

/// Parse a legacy (version 2.x) compose file.
///
/// The caller is responsible for the trigger conditions: the primary parser
/// reported an unsupported schema version, the file name is recognized by
/// [`is_legacy_file`], and the declared version is in the "2" family.
#[instrument(skip(file), fields(file = %file.name))]
pub fn parse_legacy(file: &File) -> Result<BakeConfig> {
    info!("parsing legacy compose file");
    let value: Value = serde_yaml::from_str(&file.data).map_err(|e| ForgeError::ParseError {
        file: file.name.clone(),
        reason: e.to_string(),
    })?;
    parse_document(&file.name, &value)
}

/// Extract build targets from a compose document.
///
/// Every produced target joins an implicit `default` group so "build
/// everything" requests keep working unchanged.
pub(crate) fn parse_document(file_name: &str, value: &Value) -> Result<BakeConfig> {
    let services = value
        .get("services")
        .and_then(Value::as_mapping)
        .ok_or_else(|| ForgeError::ParseError {
            file: file_name.to_string(),
            reason: "invalid services field".to_string(),
        })?;

    let mut config = BakeConfig::default();
    let mut default_targets = Vec::new();

    for (key, body) in services {
        let name = key.as_str().ok_or_else(|| ForgeError::ParseError {
            file: file_name.to_string(),
            reason: "non-string service name".to_string(),
        })?;

        if !body.is_mapping() {
            return Err(ForgeError::InvalidService {
                file: file_name.to_string(),
                service: name.to_string(),
                reason: "service is not a mapping".to_string(),
            });
        }

        // Image-only services are not buildable.
        let Some(build) = body.get("build") else {
            continue;
        };

        let mut target = Target { name: name.to_string(), ..Target::default() };
        parse_build(file_name, name, build, &mut target)?;

        match body.get("image") {
            Some(Value::String(image)) => target.tags = vec![image.clone()],
            Some(_) => {
                return Err(ForgeError::InvalidService {
                    file: file_name.to_string(),
                    service: name.to_string(),
                    reason: "invalid image field".to_string(),
                })
            }
            // Synthesize a tag so every target has at least one.
            None => target.tags = vec![format!("{}_{}", project_basename(file_name)?, name)],
        }

        default_targets.push(target.name.clone());
        config.targets.push(target);
    }

    config.groups.push(Group { name: "default".to_string(), targets: default_targets });
    Ok(config)
}

fn parse_build(file_name: &str, service: &str, build: &Value, target: &mut Target) -> Result<()> {
    match build {
        Value::String(context) => {
            target.context = Some(resolve_context(file_name, context));
            target.dockerfile = Some("Dockerfile".to_string());
        }
        Value::Mapping(_) => {
            if let Some(context) = build.get("context") {
                let context = context.as_str().ok_or_else(|| invalid_build(file_name, service))?;
                target.context = Some(resolve_context(file_name, context));
            }
            if let Some(dockerfile) = build.get("dockerfile") {
                let dockerfile =
                    dockerfile.as_str().ok_or_else(|| invalid_build(file_name, service))?;
                target.dockerfile = Some(dockerfile.to_string());
            }
            if let Some(args) = build.get("args") {
                let args = args.as_mapping().ok_or_else(|| invalid_build(file_name, service))?;
                for (k, v) in args {
                    let key = k.as_str().ok_or_else(|| invalid_build(file_name, service))?;
                    let value =
                        scalar_to_string(v).ok_or_else(|| invalid_build(file_name, service))?;
                    target.args.insert(key.to_string(), value);
                }
            }
        }
        _ => return Err(invalid_build(file_name, service)),
    }
    Ok(())
}

fn invalid_build(file_name: &str, service: &str) -> ForgeError {
    ForgeError::InvalidService {
        file: file_name.to_string(),
        service: service.to_string(),
        reason: "invalid build field".to_string(),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Resolve a build context relative to the directory containing the compose
/// file, never relative to the process working directory.
fn resolve_context(file_name: &str, context: &str) -> String {
    let dir = Path::new(file_name).parent().unwrap_or_else(|| Path::new(""));
    if dir.as_os_str().is_empty() {
        return context.to_string();
    }
    // Joining an absolute context leaves it untouched.
    dir.join(context).display().to_string()
}

/// Basename of the absolute directory containing the compose file, used to
/// synthesize tags for services that declare no image.
fn project_basename(file_name: &str) -> Result<String> {
    let dir = match Path::new(file_name).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let abs = if dir.is_absolute() {
        dir
    } else {
        std::env::current_dir()
            .map_err(|e| ForgeError::IoError { path: dir.clone(), source: e })?
            .join(dir)
    };
    let base = abs
        .components()
        .rev()
        .find_map(|c| match c {
            std::path::Component::Normal(name) => Some(name.to_string_lossy().to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "project".to_string());
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(file_name: &str, data: &str) -> Result<BakeConfig> {
        let file = File { name: file_name.to_string(), data: data.to_string() };
        parse_legacy(&file)
    }

    #[test]
    fn test_image_only_service_skipped() {
        let config = parse(
            "/srv/shop/docker-compose.yml",
            r#"
version: "2.1"
services:
  app:
    build: ./a
  proxy:
    image: foo
"#,
        )
        .unwrap();

        assert_eq!(config.targets.len(), 1);
        let app = config.target("app").unwrap();
        assert_eq!(app.context.as_deref(), Some("/srv/shop/./a"));
        assert_eq!(app.dockerfile.as_deref(), Some("Dockerfile"));
        assert_eq!(app.tags, vec!["shop_app"]);
        assert_eq!(config.groups[0].name, "default");
        assert_eq!(config.groups[0].targets, vec!["app"]);
    }

    #[test]
    fn test_image_becomes_sole_tag() {
        let config = parse(
            "/srv/shop/docker-compose.yml",
            "version: \"2\"\nservices:\n  app:\n    build: .\n    image: foo\n",
        )
        .unwrap();
        assert_eq!(config.target("app").unwrap().tags, vec!["foo"]);
    }

    #[test]
    fn test_structured_build() {
        let config = parse(
            "/srv/shop/docker-compose.yml",
            r#"
version: "2.4"
services:
  app:
    build:
      context: ./app
      dockerfile: Dockerfile.dev
      args:
        MODE: debug
        RETRIES: 3
    image: registry.local/app
"#,
        )
        .unwrap();

        let app = config.target("app").unwrap();
        assert_eq!(app.context.as_deref(), Some("/srv/shop/./app"));
        assert_eq!(app.dockerfile.as_deref(), Some("Dockerfile.dev"));
        assert_eq!(app.args["MODE"], "debug");
        assert_eq!(app.args["RETRIES"], "3");
    }

    #[test]
    fn test_invalid_services_field() {
        let err = parse("docker-compose.yml", "version: \"2\"\nservices: just a string\n")
            .unwrap_err();
        match err {
            ForgeError::ParseError { reason, .. } => assert!(reason.contains("services")),
            other => panic!("expected ParseError, got {other}"),
        }
    }

    #[test]
    fn test_invalid_build_field_names_service() {
        let err = parse(
            "docker-compose.yml",
            "version: \"2\"\nservices:\n  app:\n    build: [list, is, wrong]\n",
        )
        .unwrap_err();
        match err {
            ForgeError::InvalidService { service, reason, .. } => {
                assert_eq!(service, "app");
                assert!(reason.contains("build"));
            }
            other => panic!("expected InvalidService, got {other}"),
        }
    }

    #[test]
    fn test_declaration_order_preserved() {
        let config = parse(
            "/srv/shop/docker-compose.yml",
            "version: \"2\"\nservices:\n  zeta:\n    build: .\n  alpha:\n    build: .\n",
        )
        .unwrap();
        let names: Vec<&str> = config.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }
}
