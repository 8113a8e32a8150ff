//! Fleet build metadata.
//!
//! A project may carry a `.balena/balena.yml` next to its build-definition
//! file with fleet-wide build secrets and build variables. Both are merged
//! into the resolved job table: secrets become secret-forward specs pointing
//! into the fleet's `secrets` directory, variables become build args.
//! The file is optional; its absence is not an error.

use crate::bake::TargetMap;
use crate::error::{ForgeError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FleetConfig {
    pub build_secrets: BuildSecrets,
    pub build_variables: BuildVariables,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct BuildSecrets {
    pub global: Vec<SecretSpec>,
    pub services: BTreeMap<String, Vec<SecretSpec>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretSpec {
    pub source: String,
    #[serde(rename = "dest")]
    pub destination: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct BuildVariables {
    pub global: Vec<String>,
    pub services: BTreeMap<String, Vec<String>>,
}

/// Merge fleet metadata into the resolved job table.
///
/// Looks for `.balena/balena.yml` in the directory containing the given
/// build-definition file.
#[instrument(skip(table))]
pub fn process(table: &mut TargetMap, definition_file: &str) -> Result<()> {
    let project_dir = match Path::new(definition_file).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let fleet_dir = project_dir.join(".balena");
    let path = fleet_dir.join("balena.yml");

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no balena.yml found");
            return Ok(());
        }
        Err(e) => {
            return Err(ForgeError::FileReadError { path: path.display().to_string(), source: e })
        }
    };

    let config: FleetConfig = serde_yaml::from_str(&content).map_err(|e| ForgeError::ParseError {
        file: path.display().to_string(),
        reason: e.to_string(),
    })?;

    apply(table, &config, &fleet_dir);
    Ok(())
}

fn apply(table: &mut TargetMap, config: &FleetConfig, fleet_dir: &Path) {
    let secret_spec = |s: &SecretSpec| {
        format!("id={},src={}", s.destination, fleet_dir.join("secrets").join(&s.source).display())
    };

    for secret in &config.build_secrets.global {
        for target in table.values_mut() {
            target.secrets.push(secret_spec(secret));
        }
    }
    for (name, secrets) in &config.build_secrets.services {
        let Some(target) = table.get_mut(name) else {
            warn!(service = %name, "build-secrets for unknown service");
            continue;
        };
        for secret in secrets {
            target.secrets.push(secret_spec(secret));
        }
    }

    for variable in &config.build_variables.global {
        let Some((key, value)) = variable.split_once('=') else {
            warn!(variable = %variable, "malformed build variable, expected KEY=value");
            continue;
        };
        for target in table.values_mut() {
            target.args.insert(key.to_string(), value.to_string());
        }
    }
    for (name, variables) in &config.build_variables.services {
        let Some(target) = table.get_mut(name) else {
            warn!(service = %name, "build-variables for unknown service");
            continue;
        };
        for variable in variables {
            let Some((key, value)) = variable.split_once('=') else {
                warn!(variable = %variable, "malformed build variable, expected KEY=value");
                continue;
            };
            target.args.insert(key.to_string(), value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::Target;

    fn table_with(names: &[&str]) -> TargetMap {
        names
            .iter()
            .map(|n| (n.to_string(), Target { name: n.to_string(), ..Target::default() }))
            .collect()
    }

    #[test]
    fn test_missing_fleet_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let definition = dir.path().join("docker-compose.yml");
        let mut table = table_with(&["app"]);
        process(&mut table, &definition.display().to_string()).unwrap();
        assert!(table["app"].secrets.is_empty());
    }

    #[test]
    fn test_global_and_service_metadata_merged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".balena")).unwrap();
        std::fs::write(
            dir.path().join(".balena/balena.yml"),
            r#"
build-secrets:
  global:
    - source: ca.pem
      dest: ca
  services:
    app:
      - source: token
        dest: api-token
build-variables:
  global:
    - TIER=prod
  services:
    app:
      - MODE=fast
"#,
        )
        .unwrap();

        let definition = dir.path().join("docker-compose.yml");
        let mut table = table_with(&["app", "db"]);
        process(&mut table, &definition.display().to_string()).unwrap();

        let app = &table["app"];
        assert_eq!(app.secrets.len(), 2);
        assert!(app.secrets[0].starts_with("id=ca,src="));
        assert!(app.secrets[0].ends_with(".balena/secrets/ca.pem"));
        assert!(app.secrets[1].starts_with("id=api-token,src="));
        assert_eq!(app.args["TIER"], "prod");
        assert_eq!(app.args["MODE"], "fast");

        let db = &table["db"];
        assert_eq!(db.secrets.len(), 1);
        assert_eq!(db.args.get("MODE"), None);
    }

    #[test]
    fn test_unknown_service_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".balena")).unwrap();
        std::fs::write(
            dir.path().join(".balena/balena.yml"),
            "build-variables:\n  services:\n    ghost:\n      - A=b\n",
        )
        .unwrap();

        let definition = dir.path().join("docker-compose.yml");
        let mut table = table_with(&["app"]);
        process(&mut table, &definition.display().to_string()).unwrap();
        assert!(table["app"].args.is_empty());
    }
}
