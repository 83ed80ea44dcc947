use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use ember_runner::{init_logging, run, ConfigLoadError, EmberConfig, World};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Raise the scripting log level (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the script directory from the config
    #[arg(short, long)]
    script_dir: Option<PathBuf>,

    /// Stop after this many world ticks
    #[arg(short, long)]
    ticks: Option<u64>,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<EmberConfig> {
    let path = match path {
        Some(path) => path,
        None => EmberConfig::config_path().context("failed to determine the config directory")?,
    };

    match EmberConfig::load_from(&path) {
        Ok(config) => Ok(config),
        Err(ConfigLoadError::NotFound(path)) => {
            let config = EmberConfig::default();
            config.save_to(&path)?;
            eprintln!("Config file created at: {}", path.display());
            Ok(config)
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config)?;
    if let Some(script_dir) = cli.script_dir {
        config.scripting.script_dir = Some(script_dir);
    }

    let _guard = init_logging("ember", &config.logging, cli.debug)?;
    info!("Starting ember on partition {}", config.world.partition());

    let world = World::new(config)?;
    run(world, cli.ticks).await
}
