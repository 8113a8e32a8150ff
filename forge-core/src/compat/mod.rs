//! Platform compatibility shim for balena-style device fleets.
//!
//! Device-fleet build files are templates keyed by two compatibility tokens:
//! a machine name (the device type) and an architecture token. This module
//! derives both tokens from a target's declared platform, selects the
//! matching build-file template, substitutes the placeholders and rewrites
//! the target to carry the rendered body inline.

pub mod fleet;

use crate::bake::{Target, TargetMap};
use crate::error::{ForgeError, Result};
use crate::options::BuildOptions;
use crate::platform::Platform;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Environment override for the machine token.
pub const MACHINE_ENV: &str = "FORGE_BALENA_MACHINE_NAME";
/// Environment override for the architecture token.
pub const ARCH_ENV: &str = "FORGE_BALENA_ARCH";
/// Substitution value for the `%%BALENA_APP_NAME%%` placeholder.
pub const APP_NAME_ENV: &str = "FORGE_BALENA_APP_NAME";
/// Substitution value for the `%%BALENA_RELEASE_HASH%%` placeholder.
pub const RELEASE_HASH_ENV: &str = "FORGE_BALENA_RELEASE_HASH";

/// Base images known to misbehave when an explicit platform is selected.
static BALENALIB_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"FROM.*balenalib/.*").expect("Invalid balenalib image regex"));

/// Whether the rendered build file uses a base image that requires the
/// platform selection workaround (the target's platform list is cleared).
pub fn disables_platform_for_image(content: &str) -> bool {
    BALENALIB_IMAGE.is_match(content)
}

/// The machine token for a platform, `None` outside the device table.
pub fn machine_token(platform: &Platform) -> Option<&'static str> {
    match (platform.arch.as_str(), platform.variant.as_deref()) {
        ("amd64", _) => Some("intel-nuc"),
        ("386", _) => Some("intel-edison"),
        ("arm64", _) => Some("raspberrypi4-64"),
        ("arm", Some("v7")) => Some("raspberrypi3"),
        ("arm", Some("v6")) => Some("raspberry-pi"),
        _ => None,
    }
}

/// The architecture token for a platform, `None` outside the device table.
pub fn arch_token(platform: &Platform) -> Option<&'static str> {
    match (platform.arch.as_str(), platform.variant.as_deref()) {
        ("amd64", _) => Some("amd64"),
        ("386", _) => Some("i386"),
        ("arm64", _) => Some("aarch64"),
        ("arm", Some("v7")) => Some("armv7hf"),
        ("arm", Some("v6")) => Some("rpi"),
        _ => None,
    }
}

/// The compatibility tokens and resolved platform for one target.
#[derive(Debug, Clone)]
pub struct CompatTokens {
    pub machine: String,
    pub arch: String,
    pub platform: Platform,
}

/// Resolve a target's platform.
///
/// No declared platform falls back to the build host; exactly one is
/// normalized and used; more than one is rejected because the templating
/// model is per-architecture, not multi-arch.
pub fn resolve_platform(target: &Target) -> Result<Platform> {
    match target.platforms.as_slice() {
        [] => Ok(Platform::host()),
        [spec] => Platform::parse(spec),
        _ => Err(ForgeError::MultiplePlatforms { target: target.name.clone() }),
    }
}

/// Resolve the compatibility tokens for a target.
///
/// When both environment overrides are set they are used verbatim and token
/// derivation is skipped; otherwise both tokens are derived from the resolved
/// platform via the device table.
pub fn resolve_tokens(target: &Target) -> Result<CompatTokens> {
    let platform = resolve_platform(target)?;

    if let (Ok(machine), Ok(arch)) = (std::env::var(MACHINE_ENV), std::env::var(ARCH_ENV)) {
        debug!(machine = %machine, arch = %arch, "using compatibility tokens from environment");
        return Ok(CompatTokens { machine, arch, platform });
    }

    let machine = machine_token(&platform).ok_or_else(|| ForgeError::PlatformTranslation {
        target: target.name.clone(),
        platform: platform.to_string(),
        token: "machine name".to_string(),
    })?;
    let arch = arch_token(&platform).ok_or_else(|| ForgeError::PlatformTranslation {
        target: target.name.clone(),
        platform: platform.to_string(),
        token: "architecture".to_string(),
    })?;

    Ok(CompatTokens { machine: machine.to_string(), arch: arch.to_string(), platform })
}

/// Run the compatibility shim over the resolved job table.
///
/// Targets with no build-file reference, or with the generic template name,
/// get their template selected, rendered and inlined.
pub fn process_targets(table: &mut TargetMap) -> Result<()> {
    for (name, target) in table.iter_mut() {
        if target.name.is_empty() {
            target.name = name.clone();
        }
        if matches!(target.dockerfile.as_deref(), None | Some("Dockerfile.template")) {
            process_template(target)?;
        }
    }
    Ok(())
}

#[instrument(skip(target), fields(target = %target.name))]
fn process_template(target: &mut Target) -> Result<()> {
    let tokens = resolve_tokens(target)?;
    let context = target.context.clone().unwrap_or_else(|| ".".to_string());

    let body = read_template(Path::new(&context), &tokens)?;

    let mut body = body
        .replace("%%BALENA_MACHINE_NAME%%", &tokens.machine)
        .replace("%%BALENA_ARCH%%", &tokens.arch)
        .replace("%%BALENA_SERVICE_NAME%%", &target.name);

    match std::env::var(APP_NAME_ENV) {
        Ok(v) => body = body.replace("%%BALENA_APP_NAME%%", &v),
        Err(_) => warn!("{} undefined, leaving %%BALENA_APP_NAME%% as-is", APP_NAME_ENV),
    }
    match std::env::var(RELEASE_HASH_ENV) {
        Ok(v) => body = body.replace("%%BALENA_RELEASE_HASH%%", &v),
        Err(_) => warn!("{} undefined, leaving %%BALENA_RELEASE_HASH%% as-is", RELEASE_HASH_ENV),
    }

    info!(
        platform = %tokens.platform,
        machine = %tokens.machine,
        arch = %tokens.arch,
        "processed build file template"
    );

    if disables_platform_for_image(&body) {
        warn!("balenalib base images are broken when used with the platform option");
        warn!("clearing the platform list to unblock the build");
        target.platforms.clear();
    }

    // The engine must use the rendered body, not re-read the file from disk.
    target.dockerfile_inline = Some(body);
    target.dockerfile = None;

    Ok(())
}

/// Select the build-file source: the generic template, then the
/// arch-suffixed file, then the machine-suffixed file. First match wins.
fn read_template(context_dir: &Path, tokens: &CompatTokens) -> Result<String> {
    let candidates = [
        "Dockerfile.template".to_string(),
        format!("Dockerfile.{}", tokens.arch),
        format!("Dockerfile.{}", tokens.machine),
    ];

    for name in &candidates {
        let path = context_dir.join(name);
        debug!(path = %path.display(), "trying build file template");
        match std::fs::read_to_string(&path) {
            Ok(content) => return Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(ForgeError::FileReadError { path: path.display().to_string(), source: e })
            }
        }
    }

    Err(ForgeError::TemplateNotFound {
        context_dir: context_dir.to_path_buf(),
        tried: candidates.join(", "),
    })
}

/// Inject the resolved platform and compatibility tokens into the
/// engine-facing build options, right before job submission.
#[instrument(skip(options, table))]
pub fn resolve_build_options(
    options: &mut BTreeMap<String, BuildOptions>,
    table: &TargetMap,
) -> Result<()> {
    for (name, opts) in options.iter_mut() {
        let target = table.get(name).ok_or_else(|| {
            ForgeError::Internal(format!("build options for unresolved target '{}'", name))
        })?;
        let tokens = resolve_tokens(target)?;

        opts.platforms.push(tokens.platform.clone());
        opts.args.insert("BALENA_MACHINE_NAME".to_string(), tokens.machine.clone());
        opts.args.insert("BALENA_ARCH".to_string(), tokens.arch.clone());
        opts.args.insert("BALENA_SERVICE_NAME".to_string(), name.clone());

        info!(
            target = %name,
            platform = %tokens.platform,
            machine = %tokens.machine,
            arch = %tokens.arch,
            "resolved build args"
        );
    }
    Ok(())
}
