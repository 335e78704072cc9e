use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Request timed out after {seconds}s, check that the page listens for the '{channel}' event")]
    Timeout { channel: String, seconds: u64 },

    #[error("Host reported failure: {0}")]
    Remote(String),

    #[error("Page does not provide window.{0}")]
    MissingFunction(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Response slot closed before a reply arrived")]
    ChannelClosed,

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("General error: {0}")]
    General(String),
}

impl BridgeError {
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Timeout { channel, seconds } => vec![
                format!("Check that the host page listens for '{}'", channel),
                "Verify request/response event names match the host integration".into(),
                format!("Increase timeout with --timeout {}", (seconds + 5).min(30)),
            ],
            Self::Remote(_) => vec![
                "Inspect the host page's schema handler for the reported error".into(),
                "Verify the params identify an element the host knows about".into(),
            ],
            Self::MissingFunction(name) => vec![
                format!("Define window.{} on the host page", name),
                "Switch to postMessage mode with --mode postMessage".into(),
                "Check the legacy function names in the [legacy] config section".into(),
            ],
            Self::Unsupported(_) => vec![
                "Use postMessage mode for recording push support".into(),
                "Use polling fetch mode with --fetch-mode polling".into(),
            ],
            Self::ConfigError(_) => vec![
                "Check configuration file syntax".into(),
                "Run with --verbose to see detailed error".into(),
                "Use --config to specify a different config file".into(),
            ],
            Self::Recording(_) => vec![
                "Stop the current recording before starting a new one".into(),
                "Check that the host page supports START_RECORDING".into(),
            ],
            _ => vec![
                "Run with --verbose for more details".into(),
                "Check the documentation for help".into(),
            ],
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Timeout { .. } => 4,
            Self::Remote(_) => 5,
            Self::MissingFunction(_) | Self::Unsupported(_) => 3,
            Self::IoError(_) => 6,
            Self::ConfigError(_) | Self::TomlDeError(_) | Self::TomlSerError(_) => 7,
            _ => 1,
        }
    }

    /// True for failures synthesized locally rather than reported by the host.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::MissingFunction(_) | Self::Unsupported(_)
        )
    }
}
