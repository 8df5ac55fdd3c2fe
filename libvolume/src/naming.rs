use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How a volume is mapped onto a mountpoint directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamingPolicy {
    /// Every volume gets its own mountpoint named after the volume.
    #[default]
    PerVolume,
    /// Volumes pointing at the same remote resource share one mountpoint.
    SharedByUri,
}

impl NamingPolicy {
    pub fn resolve_mount_id(&self, volume_name: &str, uri: &str) -> String {
        match self {
            NamingPolicy::PerVolume => volume_name.to_string(),
            NamingPolicy::SharedByUri => hex::encode(Sha256::digest(uri.as_bytes())),
        }
    }

    /// Whether the two (name, uri) pairs end up on the same mountpoint.
    pub fn may_share(&self, a: (&str, &str), b: (&str, &str)) -> bool {
        self.resolve_mount_id(a.0, a.1) == self.resolve_mount_id(b.0, b.1)
    }
}

/// Volume names become directory names, so anything that would escape the
/// root directory is rejected.
pub fn is_valid_volume_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}
