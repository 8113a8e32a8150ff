//! Platform specifiers.
//!
//! A platform is an `os/arch[/variant]` triple as used in image manifests and
//! node configurations. Parsing accepts the common aliases (`x86_64`,
//! `aarch64`, `armhf`, ...) and normalizes them to the canonical names so the
//! rest of the pipeline only ever sees one spelling per architecture.

use crate::error::{ForgeError, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A normalized platform: operating system, architecture, optional variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    pub variant: Option<String>,
}

impl Platform {
    /// Parse a platform spec of the form `arch`, `os/arch` or `os/arch/variant`.
    ///
    /// The result is normalized; see [`Platform::normalize`].
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split('/').collect();
        let raw = match parts.as_slice() {
            [arch] if !arch.is_empty() => Platform {
                os: "linux".to_string(),
                arch: arch.to_string(),
                variant: None,
            },
            [os, arch] if !os.is_empty() && !arch.is_empty() => Platform {
                os: os.to_string(),
                arch: arch.to_string(),
                variant: None,
            },
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
                Platform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                    variant: Some(variant.to_string()),
                }
            }
            _ => {
                return Err(ForgeError::InvalidPlatform {
                    spec: spec.to_string(),
                })
            }
        };
        Ok(raw.normalize())
    }

    /// Normalize architecture aliases and variants to canonical names.
    ///
    /// Follows the manifest-list conventions: `x86_64` becomes `amd64`,
    /// `aarch64` becomes `arm64` (dropping the redundant `v8` variant),
    /// `armhf`/`armel` become `arm` with the matching variant, and a bare
    /// `arm` defaults to `v7`.
    pub fn normalize(self) -> Self {
        let Platform { os, arch, variant } = self;
        let (arch, variant) = match arch.as_str() {
            "x86_64" | "x86-64" | "amd64" => ("amd64".to_string(), None),
            "i386" | "386" => ("386".to_string(), None),
            "aarch64" | "arm64" => {
                let variant = match variant.as_deref() {
                    None | Some("v8") | Some("8") => None,
                    Some(v) => Some(v.to_string()),
                };
                ("arm64".to_string(), variant)
            }
            "armhf" => ("arm".to_string(), Some("v7".to_string())),
            "armel" => ("arm".to_string(), Some("v6".to_string())),
            "arm" => {
                let variant = match variant.as_deref() {
                    None => Some("v7".to_string()),
                    Some(v) if v.starts_with('v') => Some(v.to_string()),
                    Some(v) => Some(format!("v{}", v)),
                };
                ("arm".to_string(), variant)
            }
            _ => (arch, variant),
        };
        Platform { os, arch, variant }
    }

    /// The platform of the build host.
    pub fn host() -> Self {
        Platform {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            variant: None,
        }
        .normalize()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}/{}/{}", self.os, self.arch, variant),
            None => write!(f, "{}/{}", self.os, self.arch),
        }
    }
}

impl FromStr for Platform {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        Platform::parse(s)
    }
}

// Platforms appear in config files and engine options as plain strings.
impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let spec = String::deserialize(deserializer)?;
        Platform::parse(&spec).map_err(D::Error::custom)
    }
}
