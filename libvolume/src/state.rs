use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VolumeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(rename = "voluri")]
    pub uri: String,
    #[serde(rename = "mount")]
    pub mountpoint_id: String,
    #[serde(rename = "connections")]
    pub refcount: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mountpoint {
    pub path: PathBuf,
    #[serde(rename = "connections")]
    pub refcount: u32,
}

/// Durable image of the store, as written to `persistence.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub volumes: HashMap<String, Volume>,
    #[serde(default)]
    pub mounts: HashMap<String, Mountpoint>,
}

impl Snapshot {
    /// Checks that every mountpoint refcount is the sum of the refcounts of
    /// the volumes designating it. A volume whose mountpoint record is gone
    /// is tolerated only while it is unmounted, so it can still be removed.
    pub fn check_refcounts(&self) -> std::result::Result<(), String> {
        let mut active: HashMap<&str, u64> = HashMap::new();
        for (name, volume) in &self.volumes {
            if !self.mounts.contains_key(&volume.mountpoint_id) {
                if volume.refcount > 0 {
                    return Err(format!(
                        "volume {name} has {} connections on missing mountpoint {}",
                        volume.refcount, volume.mountpoint_id
                    ));
                }
                continue;
            }
            *active.entry(volume.mountpoint_id.as_str()).or_default() +=
                u64::from(volume.refcount);
        }
        for (id, mountpoint) in &self.mounts {
            let expected = active.get(id.as_str()).copied().unwrap_or_default();
            if u64::from(mountpoint.refcount) != expected {
                return Err(format!(
                    "mountpoint {id} has {} connections, its volumes have {expected}",
                    mountpoint.refcount
                ));
            }
        }
        Ok(())
    }
}

/// In-memory volume and mountpoint tables.
///
/// The store itself does no locking; the driver keeps it behind its lock and
/// only hands out clones.
#[derive(Debug, Default)]
pub struct StateStore {
    volumes: HashMap<String, Volume>,
    mounts: HashMap<String, Mountpoint>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            volumes: snapshot.volumes,
            mounts: snapshot.mounts,
        }
    }

    pub fn to_snapshot(&self, version: u32) -> Snapshot {
        Snapshot {
            version,
            volumes: self.volumes.clone(),
            mounts: self.mounts.clone(),
        }
    }

    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.get(name)
    }

    pub fn mountpoint(&self, id: &str) -> Option<&Mountpoint> {
        self.mounts.get(id)
    }

    pub fn get(&self, name: &str) -> Result<(Volume, Mountpoint)> {
        let volume = self
            .volumes
            .get(name)
            .ok_or_else(|| VolumeError::NotFound(format!("volume {name}")))?;
        let mountpoint = self.mounts.get(&volume.mountpoint_id).ok_or_else(|| {
            VolumeError::NotFound(format!(
                "mountpoint {} of volume {name}",
                volume.mountpoint_id
            ))
        })?;
        Ok((volume.clone(), mountpoint.clone()))
    }

    pub fn put(&mut self, name: &str, volume: Volume) {
        self.volumes.insert(name.to_string(), volume);
    }

    pub fn delete(&mut self, name: &str) -> Option<Volume> {
        self.volumes.remove(name)
    }

    pub fn get_or_create_mountpoint(&mut self, id: &str, path: &Path) -> &Mountpoint {
        self.mounts.entry(id.to_string()).or_insert_with(|| Mountpoint {
            path: path.to_path_buf(),
            refcount: 0,
        })
    }

    /// True when some volume still designates the mountpoint.
    pub fn is_referenced(&self, id: &str) -> bool {
        self.volumes.values().any(|v| v.mountpoint_id == id)
    }

    /// Drops the mountpoint record when it is neither mounted nor designated
    /// by any volume. Returns the removed record.
    pub fn delete_mountpoint_if_unused(&mut self, id: &str) -> Option<Mountpoint> {
        let unused = matches!(self.mounts.get(id), Some(m) if m.refcount == 0)
            && !self.is_referenced(id);
        if unused { self.mounts.remove(id) } else { None }
    }

    /// Adds `delta` active mounts to both the volume and its mountpoint.
    pub fn add_connections(&mut self, name: &str, delta: i64) -> Result<()> {
        let volume = self
            .volumes
            .get_mut(name)
            .ok_or_else(|| VolumeError::NotFound(format!("volume {name}")))?;
        let mountpoint = self.mounts.get_mut(&volume.mountpoint_id).ok_or_else(|| {
            VolumeError::NotFound(format!(
                "mountpoint {} of volume {name}",
                volume.mountpoint_id
            ))
        })?;
        let v = i64::from(volume.refcount) + delta;
        let m = i64::from(mountpoint.refcount) + delta;
        if v < 0 || m < 0 {
            return Err(VolumeError::PreconditionFailed(format!(
                "volume {name} is not mounted"
            )));
        }
        let (v, m) = u32::try_from(v).and_then(|v| Ok((v, u32::try_from(m)?))).map_err(|_| {
            VolumeError::PreconditionFailed(format!("too many connections on volume {name}"))
        })?;
        volume.refcount = v;
        mountpoint.refcount = m;
        Ok(())
    }

    pub fn list(&self) -> Vec<(String, Volume)> {
        let mut volumes: Vec<_> = self
            .volumes
            .iter()
            .map(|(name, v)| (name.clone(), v.clone()))
            .collect();
        volumes.sort_by(|a, b| a.0.cmp(&b.0));
        volumes
    }
}
