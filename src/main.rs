//! dcswitch server binary.

use clap::Parser;
use dcswitch::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dcswitch")]
#[command(about = "Multi-cluster datacenter activation controller")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "DCSWITCH_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    dcswitch::run(config).await?;
    Ok(())
}
