use std::path::PathBuf;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ShellMounterConfig;
use crate::state::{Mountpoint, Volume};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountRequest {
    pub name: String,
    // caller id, e.g. the container asking for the mount
    #[serde(rename = "ID", default)]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountResponse {
    pub mountpoint: PathBuf,
}

/// Deployment specific mount behavior plugged into the driver.
#[async_trait]
pub trait VolumeMounter: Send + Sync {
    fn validate_uri(&self, uri: &str) -> bool;

    /// Performs the OS-level mount of `volume` onto `mountpoint`.
    async fn mount(
        &self,
        volume: &Volume,
        mountpoint: &Mountpoint,
        request: &MountRequest,
    ) -> anyhow::Result<MountResponse>;

    /// Called once the last active mount of `mountpoint` goes away.
    async fn unmount(&self, mountpoint: &Mountpoint) -> anyhow::Result<()>;

    /// Runs once after the driver restored its state.
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Mounts by running shell commands, e.g. `mount -t nfs {uri} {path}`.
pub struct ShellMounter {
    mount_command: String,
    unmount_command: String,
    uri_pattern: Regex,
}

impl ShellMounter {
    pub fn new(config: &ShellMounterConfig) -> anyhow::Result<Self> {
        if config.mount_command.trim().is_empty() {
            bail!("mount command must not be empty");
        }
        let uri_pattern = Regex::new(&config.uri_pattern)
            .with_context(|| format!("invalid uri pattern {}", config.uri_pattern))?;
        Ok(Self {
            mount_command: config.mount_command.clone(),
            unmount_command: config.unmount_command.clone(),
            uri_pattern,
        })
    }

    fn render(template: &str, uri: &str, mountpoint: &Mountpoint) -> String {
        template
            .replace("{uri}", &shell_quote(uri))
            .replace("{path}", &shell_quote(&mountpoint.path.to_string_lossy()))
    }

    async fn run_cmd(cmd: &str) -> anyhow::Result<()> {
        debug!("{cmd}");
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .with_context(|| format!("failed to spawn `{cmd}`"))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            warn!("Output of `{cmd}`: {stdout}{stderr}");
            return Err(anyhow!("`{cmd}` exited with {}: {}", output.status, stderr.trim()));
        }
        debug!("Output: {stdout}");
        Ok(())
    }
}

#[async_trait]
impl VolumeMounter for ShellMounter {
    fn validate_uri(&self, uri: &str) -> bool {
        self.uri_pattern.is_match(uri)
    }

    async fn mount(
        &self,
        volume: &Volume,
        mountpoint: &Mountpoint,
        _request: &MountRequest,
    ) -> anyhow::Result<MountResponse> {
        let cmd = Self::render(&self.mount_command, &volume.uri, mountpoint);
        Self::run_cmd(&cmd).await?;
        Ok(MountResponse {
            mountpoint: mountpoint.path.clone(),
        })
    }

    async fn unmount(&self, mountpoint: &Mountpoint) -> anyhow::Result<()> {
        let cmd = Self::render(&self.unmount_command, "", mountpoint);
        Self::run_cmd(&cmd).await
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
