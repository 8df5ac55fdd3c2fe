use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rkvol", version, about = "Manage volumes of an rkvol volume plugin")]
pub struct Cli {
    /// YAML config with `driver` and `mounter` sections
    #[arg(short, long, default_value = "/etc/rkvol/config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a volume backed by a remote resource
    Create {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long, value_name = "URI")]
        voluri: String,
        /// Extra driver options as key=value
        #[arg(short = 'o', long = "opt", value_parser = parse_opt)]
        opts: Vec<(String, String)>,
    },
    /// Mount a volume and print its mountpoint
    Mount {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long, default_value = "")]
        id: String,
    },
    /// Release one mount of a volume
    Unmount {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long, default_value = "")]
        id: String,
    },
    /// Remove an unmounted volume
    Remove {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Print the mountpoint of a volume
    Path {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Print a volume with its status
    Get {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// List all volumes
    List,
    /// Print the driver capabilities
    Capabilities,
}

fn parse_opt(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid option `{s}`, expected key=value"))
}
