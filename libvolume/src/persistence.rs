use std::fs::{self, DirBuilder, File};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Result, VolumeError};
use crate::state::Snapshot;

pub const PERSISTENCE_FILE: &str = "persistence.json";

/// What `load` found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// No state file, started empty.
    Missing,
    Restored,
    /// A state file existed but could not be used; started empty.
    Discarded(String),
}

pub struct Persistence {
    folder: PathBuf,
    version: u32,
}

impl Persistence {
    pub fn new(folder: impl Into<PathBuf>, version: u32) -> Self {
        Self {
            folder: folder.into(),
            version,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.folder.join(PERSISTENCE_FILE)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Writes the snapshot next to the target and renames it into place, so a
    /// crash leaves either the old or the new file.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        ensure_dir(&self.folder)?;

        let data = serde_json::to_vec(snapshot).map_err(|e| {
            VolumeError::io(
                "failed to encode persistence state",
                self.path(),
                std::io::Error::other(e),
            )
        })?;

        let mut tmp = NamedTempFile::new_in(&self.folder)
            .map_err(|e| VolumeError::io("failed to create temp file", &self.folder, e))?;
        tmp.write_all(&data)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| VolumeError::io("failed to write persistence file", tmp.path(), e))?;
        tmp.persist(self.path()).map_err(|e| {
            VolumeError::io("failed to replace persistence file", self.path(), e.error)
        })?;
        // the rename is only durable once the directory entry is
        File::open(&self.folder)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| VolumeError::io("failed to sync persistence folder", &self.folder, e))?;
        Ok(())
    }

    pub fn load(&self) -> Result<(Snapshot, LoadStatus)> {
        let empty = Snapshot {
            version: self.version,
            ..Default::default()
        };
        let path = self.path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((empty, LoadStatus::Missing)),
            Err(e) => {
                return Ok((
                    empty,
                    LoadStatus::Discarded(format!("unable to read {}: {e}", path.display())),
                ));
            }
        };

        // check the version on its own first, so an incompatible layout is
        // reported as such rather than as a decode failure
        let version = serde_json::from_slice::<serde_json::Value>(&data)
            .ok()
            .and_then(|v| v.get("version").and_then(|v| v.as_u64()));
        match version {
            None => {
                return Ok((
                    empty,
                    LoadStatus::Discarded("unable to decode version of persistence".to_string()),
                ));
            }
            Some(v) if v != u64::from(self.version) => {
                return Ok((
                    empty,
                    LoadStatus::Discarded(format!(
                        "persistence version {v} does not match {}",
                        self.version
                    )),
                ));
            }
            Some(_) => {}
        }

        match serde_json::from_slice::<Snapshot>(&data) {
            Ok(snapshot) => match snapshot.check_refcounts() {
                Ok(()) => Ok((snapshot, LoadStatus::Restored)),
                Err(reason) => Ok((
                    empty,
                    LoadStatus::Discarded(format!("inconsistent refcounts: {reason}")),
                )),
            },
            Err(e) => Ok((
                empty,
                LoadStatus::Discarded(format!("unable to decode persistence: {e}")),
            )),
        }
    }
}

fn ensure_dir(folder: &Path) -> Result<()> {
    match fs::symlink_metadata(folder) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(VolumeError::io(
            "persistence folder is not a directory",
            folder,
            std::io::Error::from(ErrorKind::AlreadyExists),
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(folder)
            .map_err(|e| VolumeError::io("failed to create persistence folder", folder, e)),
        Err(e) => Err(VolumeError::io("failed to stat persistence folder", folder, e)),
    }
}
