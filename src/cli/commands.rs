use crate::config::DataFetchMode;
use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    #[command(about = "Fetch the schema stored for a params key")]
    Get {
        #[arg(help = "Element params key")]
        params: String,
    },

    #[command(about = "Write a schema for a params key")]
    Update {
        #[arg(help = "Element params key")]
        params: String,
        #[arg(help = "Schema as JSON, plain text, or @file")]
        schema: String,
    },

    #[command(about = "Render a schema through the host preview hook")]
    Preview {
        #[arg(help = "Element params key")]
        params: String,
    },

    #[command(about = "Record schema changes for a params key")]
    Record {
        #[arg(help = "Element params key")]
        params: String,
        #[arg(short, long, help = "Seconds to record before stopping")]
        duration: Option<u64>,
        #[arg(long, help = "Data source: polling or eventDriven")]
        fetch_mode: Option<DataFetchMode>,
        #[arg(long, help = "Polling interval in milliseconds")]
        interval: Option<u64>,
        #[arg(long, help = "Stop after this many idle seconds")]
        auto_stop: Option<u64>,
    },

    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        subcommand: ConfigCommand,
    },
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    #[command(about = "Initialize config file with defaults")]
    Init,

    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Show config file path")]
    Path,
}
