use super::{
    Cli,
    commands::{Command, ConfigCommand},
};
use crate::{
    Result,
    config::{Config, DataFetchMode},
    handlers::{self, DemoPage},
    output,
    recording::RecordingOptions,
    timeouts::secs,
};
use std::time::Duration;

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    let pretty = config.output.json_pretty;

    match cli.command.clone() {
        Command::Config { subcommand } => handle_config_command(subcommand, &cli, &config),
        Command::Get { params } => {
            let page = DemoPage::open(&config, &cli.store);
            let result = handlers::schema::handle_get(&page.client, &params).await?;
            output::print_output(&result, cli.json, pretty)
        }
        Command::Update { params, schema } => {
            let page = DemoPage::open(&config, &cli.store);
            let result = handlers::schema::handle_update(&page.client, &params, &schema).await?;
            output::print_output(&result, cli.json, pretty)
        }
        Command::Preview { params } => {
            let page = DemoPage::open(&config, &cli.store);
            let host = page.host.clone();
            let result =
                handlers::schema::handle_preview(&page.client, &params, || host.rendered_preview())
                    .await?;
            output::print_output(&result, cli.json, pretty)
        }
        Command::Record {
            params,
            duration,
            fetch_mode,
            interval,
            auto_stop,
        } => {
            let config = with_record_overrides(config, fetch_mode, interval, auto_stop)?;
            let options = RecordingOptions::from_config(params, &config.recording);
            let duration = Duration::from_secs(duration.unwrap_or(secs::RECORD_DURATION));

            let page = DemoPage::open(&config, &cli.store);
            let result =
                handlers::recording::handle_record(page.client.clone(), options, duration).await?;
            output::print_output(&result, cli.json, pretty)
        }
    }
}

/// Applies `record` flags on top of the loaded config and validates the
/// result, since these flags arrive after the global validation pass.
fn with_record_overrides(
    mut config: Config,
    fetch_mode: Option<DataFetchMode>,
    interval: Option<u64>,
    auto_stop: Option<u64>,
) -> Result<Config> {
    if let Some(mode) = fetch_mode {
        config.recording.data_fetch_mode = mode;
    }
    if let Some(interval) = interval {
        config.recording.polling_interval_ms = interval;
    }
    if auto_stop.is_some() {
        config.recording.auto_stop_timeout = auto_stop;
    }
    config.validate()?;
    Ok(config)
}

fn handle_config_command(subcommand: ConfigCommand, cli: &Cli, config: &Config) -> Result<()> {
    match subcommand {
        ConfigCommand::Init => {
            let result = handlers::config_handler::handle_config_init()?;
            output::print_output(&result, cli.json, true)
        }
        ConfigCommand::Show => {
            let result = handlers::config_handler::handle_config_show(config)?;
            output::print_output(&result, cli.json, true)
        }
        ConfigCommand::Path => {
            let result = handlers::config_handler::handle_config_path()?;
            output::print_output(&result, cli.json, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BridgeError;

    #[test]
    fn test_record_overrides_are_validated() {
        let err = with_record_overrides(Config::default(), None, Some(0), None).unwrap_err();
        assert!(
            matches!(err, BridgeError::ConfigError(ref msg) if msg.contains("polling_interval_ms"))
        );

        let err = with_record_overrides(Config::default(), None, None, Some(0)).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigError(_)));
    }

    #[test]
    fn test_record_overrides_apply() {
        let config = with_record_overrides(
            Config::default(),
            Some(DataFetchMode::EventDriven),
            Some(250),
            Some(10),
        )
        .unwrap();
        assert_eq!(config.recording.data_fetch_mode, DataFetchMode::EventDriven);
        assert_eq!(config.recording.polling_interval_ms, 250);
        assert_eq!(config.recording.auto_stop_timeout, Some(10));
    }
}
