use std::collections::HashMap;
use std::fs::{self, DirBuilder};
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::capability::{MountRequest, MountResponse, VolumeMounter};
use crate::config::DriverConfig;
use crate::error::{Result, VolumeError};
use crate::naming::is_valid_volume_name;
use crate::persistence::{LoadStatus, Persistence};
use crate::state::{Snapshot, StateStore, Volume};

/// Create option carrying the remote resource of the volume.
pub const URI_OPTION: &str = "voluri";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    pub name: String,
    #[serde(rename = "Opts", default)]
    pub options: HashMap<String, String>,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: HashMap::from([(URI_OPTION.to_string(), uri.into())]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capabilities {
    pub scope: String,
}

/// Volume lifecycle engine.
///
/// Every mutating call holds the write half of `state` from the first lookup
/// until the state file has been written, including the time spent in the
/// mounter. Slow mounts therefore serialize all mutations of this driver.
pub struct Driver {
    config: DriverConfig,
    persistence: Persistence,
    mounter: Arc<dyn VolumeMounter>,
    state: RwLock<StateStore>,
}

impl Driver {
    /// Restores the persisted state and runs the mounter's init hook.
    pub async fn init(config: DriverConfig, mounter: Arc<dyn VolumeMounter>) -> Result<Self> {
        debug!(
            "Init volume driver at {}, naming: {:?}",
            config.root.display(),
            config.naming
        );
        let persistence = Persistence::new(&config.folder, config.version);
        let (snapshot, status) = persistence.load()?;
        match &status {
            LoadStatus::Missing => info!(
                "No persistence file found at {}, starting with an empty list of volumes",
                persistence.path().display()
            ),
            LoadStatus::Discarded(reason) => warn!(
                "Discarding persistence file {}: {reason}; starting with an empty list of volumes",
                persistence.path().display()
            ),
            LoadStatus::Restored => debug!(
                "Restored {} volumes and {} mounts from persistence file",
                snapshot.volumes.len(),
                snapshot.mounts.len()
            ),
        }

        mounter.init().await.map_err(VolumeError::Capability)?;

        Ok(Self {
            config,
            persistence,
            mounter,
            state: RwLock::new(StateStore::from_snapshot(snapshot)),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub async fn create(&self, req: &CreateRequest) -> Result<()> {
        debug!("Entering Create: name: {}, options {:?}", req.name, req.options);

        if !is_valid_volume_name(&req.name) {
            return Err(VolumeError::InvalidArgument(format!(
                "invalid volume name {:?}",
                req.name
            )));
        }
        let uri = req
            .options
            .get(URI_OPTION)
            .map(|u| u.trim_matches('"'))
            .unwrap_or_default();
        if uri.is_empty() {
            return Err(VolumeError::InvalidArgument(format!(
                "{URI_OPTION} option required"
            )));
        }
        if !self.mounter.validate_uri(uri) {
            return Err(VolumeError::InvalidArgument(format!(
                "{URI_OPTION} option is malformed: {uri}"
            )));
        }

        let mut state = self.state.write().await;

        if let Some(existing) = state.volume(&req.name) {
            if existing.uri == uri {
                debug!("Volume {} already exists with the same uri", req.name);
                return Ok(());
            }
            return Err(VolumeError::AlreadyExists(format!(
                "volume {} already exists with uri {}",
                req.name, existing.uri
            )));
        }

        let mount_id = self.config.naming.resolve_mount_id(&req.name, uri);
        if state.mountpoint(&mount_id).is_none() {
            let path = self.config.root.join(&mount_id);
            prepare_mount_dir(&path)?;
            state.get_or_create_mountpoint(&mount_id, &path);
        }

        let volume = Volume {
            uri: uri.to_string(),
            mountpoint_id: mount_id,
            refcount: 0,
        };
        info!("Volume created: {} -> {:?}", req.name, volume);
        state.put(&req.name, volume);
        self.save(&state)
    }

    pub async fn mount(&self, req: &MountRequest) -> Result<MountResponse> {
        debug!("Entering Mount: {:?}", req);

        let mut state = self.state.write().await;
        let (volume, mountpoint) = state.get(&req.name)?;

        if mountpoint.refcount > 0 {
            state.add_connections(&req.name, 1)?;
            debug!(
                "Mountpoint {} already active, connections: {}",
                mountpoint.path.display(),
                mountpoint.refcount + 1
            );
            self.save(&state)?;
            return Ok(MountResponse {
                mountpoint: mountpoint.path,
            });
        }

        let resp = self
            .mounter
            .mount(&volume, &mountpoint, req)
            .await
            .map_err(VolumeError::Capability)?;
        state.add_connections(&req.name, 1)?;
        info!("Mounted {} at {}", req.name, resp.mountpoint.display());
        self.save(&state)?;
        Ok(resp)
    }

    pub async fn unmount(&self, req: &MountRequest) -> Result<()> {
        debug!("Entering Unmount: {:?}", req);

        let mut state = self.state.write().await;
        let (volume, mountpoint) = state.get(&req.name)?;
        if volume.refcount == 0 || mountpoint.refcount == 0 {
            return Err(VolumeError::PreconditionFailed(format!(
                "volume {} is not mounted",
                req.name
            )));
        }

        if mountpoint.refcount <= 1 {
            self.mounter
                .unmount(&mountpoint)
                .await
                .map_err(VolumeError::Capability)?;
            info!("Unmounted {}", mountpoint.path.display());
        }
        state.add_connections(&req.name, -1)?;
        self.save(&state)
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        debug!("Entering Remove: {name}");

        let mut state = self.state.write().await;
        let volume = state
            .volume(name)
            .cloned()
            .ok_or_else(|| VolumeError::NotFound(format!("volume {name}")))?;
        if volume.refcount > 0 {
            return Err(VolumeError::PreconditionFailed(format!(
                "volume {name} is currently used by a container"
            )));
        }

        let last_user = !state
            .list()
            .iter()
            .any(|(other, v)| other != name && v.mountpoint_id == volume.mountpoint_id);
        if last_user {
            if let Some(mountpoint) = state.mountpoint(&volume.mountpoint_id) {
                if mountpoint.refcount == 0 {
                    remove_mount_dir(&mountpoint.path)?;
                }
            }
        }

        state.delete(name);
        if state.delete_mountpoint_if_unused(&volume.mountpoint_id).is_some() {
            debug!("Mountpoint {} released", volume.mountpoint_id);
        }
        info!("Volume removed: {name}");
        self.save(&state)
    }

    pub async fn get(&self, name: &str) -> Result<VolumeInfo> {
        let state = self.state.read().await;
        let (volume, mountpoint) = state.get(name)?;
        let status = HashMap::from([
            ("voluri".to_string(), json!(volume.uri)),
            ("connections".to_string(), json!(volume.refcount)),
            ("mount".to_string(), json!(volume.mountpoint_id)),
            ("mount_connections".to_string(), json!(mountpoint.refcount)),
        ]);
        Ok(VolumeInfo {
            name: name.to_string(),
            mountpoint: Some(mountpoint.path),
            status: Some(status),
        })
    }

    pub async fn list(&self) -> Vec<VolumeInfo> {
        let state = self.state.read().await;
        state
            .list()
            .into_iter()
            .map(|(name, volume)| VolumeInfo {
                mountpoint: state.mountpoint(&volume.mountpoint_id).map(|m| m.path.clone()),
                name,
                status: None,
            })
            .collect()
    }

    pub async fn path(&self, name: &str) -> Result<PathBuf> {
        let state = self.state.read().await;
        let (_, mountpoint) = state.get(name)?;
        Ok(mountpoint.path)
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: "local".to_string(),
        }
    }

    /// Current state as it would be persisted.
    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.to_snapshot(self.persistence.version())
    }

    /// Writes the current state again, e.g. after an earlier save failed.
    pub async fn flush(&self) -> Result<()> {
        let state = self.state.write().await;
        self.save(&state)
    }

    fn save(&self, state: &StateStore) -> Result<()> {
        self.persistence
            .save(&state.to_snapshot(self.persistence.version()))
            .inspect_err(|e| warn!("Unable to write persistence state: {e}"))
    }
}

/// Creates the mountpoint directory, accepting an empty leftover from a
/// previous run.
fn prepare_mount_dir(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(path)
                .map_err(|e| VolumeError::io("failed to create mountpoint", path, e));
        }
        Err(e) => return Err(VolumeError::io("failed to stat mountpoint", path, e)),
        Ok(meta) if !meta.is_dir() => {
            return Err(VolumeError::AlreadyExists(format!(
                "{} already exists and is not a directory",
                path.display()
            )));
        }
        Ok(_) => {}
    }

    if !folder_is_empty(path)? {
        return Err(VolumeError::AlreadyExists(format!(
            "{} already exists and is not empty",
            path.display()
        )));
    }
    Ok(())
}

fn folder_is_empty(path: &Path) -> Result<bool> {
    let mut entries =
        fs::read_dir(path).map_err(|e| VolumeError::io("failed to read mountpoint", path, e))?;
    Ok(entries.next().is_none())
}

fn remove_mount_dir(path: &Path) -> Result<()> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VolumeError::io("failed to remove mountpoint", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_mount_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        let fresh = dir.path().join("a/b");
        prepare_mount_dir(&fresh)?;
        assert!(fresh.is_dir());

        // empty leftover from a previous run
        prepare_mount_dir(&fresh)?;

        fs::write(fresh.join("data"), b"x")?;
        assert!(matches!(
            prepare_mount_dir(&fresh),
            Err(VolumeError::AlreadyExists(_))
        ));

        let file = dir.path().join("file");
        fs::write(&file, b"x")?;
        assert!(matches!(
            prepare_mount_dir(&file),
            Err(VolumeError::AlreadyExists(_))
        ));
        Ok(())
    }

    #[test]
    fn test_remove_mount_dir_tolerates_missing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        remove_mount_dir(&dir.path().join("gone"))?;

        let busy = dir.path().join("busy");
        fs::create_dir(&busy)?;
        fs::write(busy.join("f"), b"x")?;
        assert!(matches!(
            remove_mount_dir(&busy),
            Err(VolumeError::Io { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_create_request_from_json() {
        let req: CreateRequest =
            serde_json::from_str(r#"{"Name":"v1","Opts":{"voluri":"nfs://h/a"}}"#).unwrap();
        assert_eq!(req.name, "v1");
        assert_eq!(req.options[URI_OPTION], "nfs://h/a");
    }
}
