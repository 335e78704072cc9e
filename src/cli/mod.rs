pub mod commands;
pub mod dispatch;

use crate::config::CommunicationMode;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "schema-bridge")]
#[command(version, about = "Schema editor message bridge")]
#[command(
    long_about = "Drives the schema editor protocol against an in-process host page backed by a JSON store"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: commands::Command,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Communication mode: postMessage or windowFunction")]
    pub mode: Option<CommunicationMode>,

    #[arg(long, global = true, help = "Request timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(
        long,
        global = true,
        env = "SCHEMA_BRIDGE_STORE",
        default_value = "schema-store.json",
        help = "JSON file backing the host page"
    )]
    pub store: PathBuf,
}

pub async fn run() -> crate::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        let content = std::fs::read_to_string(config_path)?;
        toml::from_str(&content)?
    } else {
        crate::config::Config::load()?
    };

    let overrides = crate::config::ConfigOverrides {
        mode: cli.mode,
        timeout: cli.timeout,
        fetch_mode: None,
        json: Some(cli.json),
    };

    let config = config.load_with_overrides(overrides);
    config.validate()?;

    dispatch::dispatch(cli, config).await
}
