use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::naming::NamingPolicy;

/// Schema version written into `persistence.json`.
pub const PERSISTENCE_VERSION: u32 = 1;

const DEFAULT_ROOT: &str = "/var/lib/rkvol/volumes";
const DEFAULT_FOLDER: &str = "/etc/rkvol";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    // schema version of the persistence file; a stored file with another version is discarded
    #[serde(default = "default_version")]
    pub version: u32,
    // directory holding one sub directory per mountpoint
    #[serde(default = "default_root")]
    pub root: PathBuf,
    // directory holding persistence.json
    #[serde(default = "default_folder")]
    pub folder: PathBuf,
    #[serde(default)]
    pub naming: NamingPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            root: default_root(),
            folder: default_folder(),
            naming: NamingPolicy::default(),
        }
    }
}

fn default_version() -> u32 {
    PERSISTENCE_VERSION
}

fn default_root() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT)
}

fn default_folder() -> PathBuf {
    PathBuf::from(DEFAULT_FOLDER)
}

/// Settings for [`crate::capability::ShellMounter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellMounterConfig {
    // command run through `sh -c`, `{uri}` and `{path}` are substituted
    pub mount_command: String,
    #[serde(default = "default_unmount_command")]
    pub unmount_command: String,
    // URIs not matching this pattern are rejected by Create
    #[serde(default = "default_uri_pattern")]
    pub uri_pattern: String,
}

fn default_unmount_command() -> String {
    "umount {path}".to_string()
}

fn default_uri_pattern() -> String {
    r"^\S+$".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub driver: DriverConfig,
    pub mounter: ShellMounterConfig,
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let str = r#"
driver:
  version: 3
  root: /mnt/rkvol
  folder: /run/rkvol
  naming: shared-by-uri
mounter:
  mountCommand: "mount -t nfs {uri} {path}"
  uriPattern: "^nfs://"
"#;
        let cfg: Config = serde_yaml::from_str(str).unwrap();
        assert_eq!(cfg.driver.version, 3);
        assert_eq!(cfg.driver.root, PathBuf::from("/mnt/rkvol"));
        assert_eq!(cfg.driver.folder, PathBuf::from("/run/rkvol"));
        assert_eq!(cfg.driver.naming, NamingPolicy::SharedByUri);
        assert_eq!(cfg.mounter.unmount_command, "umount {path}");
        assert_eq!(cfg.mounter.uri_pattern, "^nfs://");
    }

    #[test]
    fn test_driver_defaults() {
        let str = r#"
mounter:
  mountCommand: "sshfs {uri} {path}"
"#;
        let cfg: Config = serde_yaml::from_str(str).unwrap();
        assert_eq!(cfg.driver.version, PERSISTENCE_VERSION);
        assert_eq!(cfg.driver.root, PathBuf::from(DEFAULT_ROOT));
        assert_eq!(cfg.driver.naming, NamingPolicy::PerVolume);
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path().join("nope.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
