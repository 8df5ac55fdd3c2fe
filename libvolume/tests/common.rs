#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use libvolume::{
    DriverConfig, MountRequest, MountResponse, Mountpoint, NamingPolicy, Snapshot, Volume,
    VolumeMounter,
};

/// Counts calls instead of mounting anything.
#[derive(Default)]
pub struct MockMounter {
    pub mounts: AtomicUsize,
    pub unmounts: AtomicUsize,
    pub fail_mount: AtomicBool,
    pub fail_unmount: AtomicBool,
    pub delay: Option<Duration>,
}

impl MockMounter {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn mount_calls(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    pub fn unmount_calls(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VolumeMounter for MockMounter {
    fn validate_uri(&self, uri: &str) -> bool {
        uri.contains("://")
    }

    async fn mount(
        &self,
        _volume: &Volume,
        mountpoint: &Mountpoint,
        _request: &MountRequest,
    ) -> anyhow::Result<MountResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_mount.load(Ordering::SeqCst) {
            bail!("mount refused by remote");
        }
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Ok(MountResponse {
            mountpoint: mountpoint.path.clone(),
        })
    }

    async fn unmount(&self, _mountpoint: &Mountpoint) -> anyhow::Result<()> {
        if self.fail_unmount.load(Ordering::SeqCst) {
            bail!("target is busy");
        }
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn test_config(dir: &Path, naming: NamingPolicy) -> DriverConfig {
    DriverConfig {
        version: 1,
        root: dir.join("volumes"),
        folder: dir.join("state"),
        naming,
    }
}

pub fn mount_req(name: &str, id: &str) -> MountRequest {
    MountRequest {
        name: name.to_string(),
        id: id.to_string(),
    }
}

/// Every mountpoint refcount equals the active mounts of its volumes.
pub fn assert_refcounts_consistent(snapshot: &Snapshot) {
    for (id, mountpoint) in &snapshot.mounts {
        let active: u32 = snapshot
            .volumes
            .values()
            .filter(|v| &v.mountpoint_id == id)
            .map(|v| v.refcount)
            .sum();
        assert_eq!(mountpoint.refcount, active, "refcount of mountpoint {id}");
    }
    for (name, volume) in &snapshot.volumes {
        assert!(
            snapshot.mounts.contains_key(&volume.mountpoint_id),
            "volume {name} points at a missing mountpoint"
        );
    }
}

