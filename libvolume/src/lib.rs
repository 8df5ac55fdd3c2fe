//! Lifecycle core of a Docker-style volume plugin.
//!
//! Tracks named volumes, the mountpoints backing them and how many active
//! mounts each mountpoint has, and keeps that state in `persistence.json` so
//! a restarted plugin still knows what is mounted. The actual mount is done by
//! a [`capability::VolumeMounter`] supplied by the deployment.

pub mod capability;
pub mod config;
pub mod driver;
pub mod error;
pub mod naming;
pub mod persistence;
pub mod state;

pub use capability::{MountRequest, MountResponse, ShellMounter, VolumeMounter};
pub use config::{Config, DriverConfig, ShellMounterConfig, load_config};
pub use driver::{Capabilities, CreateRequest, Driver, VolumeInfo};
pub use error::{Result, VolumeError};
pub use naming::NamingPolicy;
pub use state::{Mountpoint, Snapshot, Volume};
