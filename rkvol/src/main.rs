mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use libvolume::{CreateRequest, Driver, MountRequest, ShellMounter, VolumeError, load_config};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let cfg = load_config(&cli.config)?;
    let mounter = ShellMounter::new(&cfg.mounter).context("invalid mounter config")?;
    let driver = Driver::init(cfg.driver, Arc::new(mounter))
        .await
        .context("failed to init volume driver")?;
    tracing::debug!("Loaded config from {}: {:?}", cli.config.display(), driver.config());

    match run(&driver, cli.command).await {
        Ok(Value::Null) => Ok(()),
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            // same shape as a plugin API error reply
            let reply = json!({ "Err": e.to_string(), "Kind": e.kind() });
            println!("{}", serde_json::to_string_pretty(&reply)?);
            std::process::exit(1);
        }
    }
}

async fn run(driver: &Driver, command: Commands) -> Result<Value, VolumeError> {
    let value = match command {
        Commands::Create { name, voluri, opts } => {
            let mut req = CreateRequest::new(name, voluri);
            req.options.extend(opts);
            driver.create(&req).await?;
            Value::Null
        }
        Commands::Mount { name, id } => json!(driver.mount(&MountRequest { name, id }).await?),
        Commands::Unmount { name, id } => {
            driver.unmount(&MountRequest { name, id }).await?;
            Value::Null
        }
        Commands::Remove { name } => {
            driver.remove(&name).await?;
            Value::Null
        }
        Commands::Path { name } => json!({ "Mountpoint": driver.path(&name).await? }),
        Commands::Get { name } => json!({ "Volume": driver.get(&name).await? }),
        Commands::List => json!({ "Volumes": driver.list().await }),
        Commands::Capabilities => json!({ "Capabilities": driver.capabilities() }),
    };
    Ok(value)
}
