use crate::timeouts::{ms, secs};
use crate::{BridgeError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

static EVENT_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_:-]*$").expect("event name pattern is valid"));

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub legacy: LegacyConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CommunicationMode {
    /// Request/response events exchanged directly with the host page.
    #[default]
    #[serde(alias = "customEvent")]
    PostMessage,
    /// Deprecated: named global functions invoked through the injected relay.
    WindowFunction,
}

impl std::fmt::Display for CommunicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostMessage => write!(f, "postMessage"),
            Self::WindowFunction => write!(f, "windowFunction"),
        }
    }
}

impl std::str::FromStr for CommunicationMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postMessage" | "customEvent" => Ok(Self::PostMessage),
            "windowFunction" => Ok(Self::WindowFunction),
            other => Err(BridgeError::ConfigError(format!(
                "Unknown communication mode '{}' (expected postMessage or windowFunction)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum DataFetchMode {
    /// The host pushes schema changes after START_RECORDING.
    EventDriven,
    /// The extension calls GET_SCHEMA on a timer.
    #[default]
    Polling,
}

impl std::fmt::Display for DataFetchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventDriven => write!(f, "eventDriven"),
            Self::Polling => write!(f, "polling"),
        }
    }
}

impl std::str::FromStr for DataFetchMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eventDriven" => Ok(Self::EventDriven),
            "polling" => Ok(Self::Polling),
            other => Err(BridgeError::ConfigError(format!(
                "Unknown data fetch mode '{}' (expected eventDriven or polling)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default)]
    pub communication_mode: CommunicationMode,
    /// Seconds to wait for a correlated response.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_request_event_name")]
    pub request_event_name: String,
    #[serde(default = "default_response_event_name")]
    pub response_event_name: String,
    #[serde(default)]
    pub message_types: MessageTypes,
    #[serde(default)]
    pub source_config: SourceConfig,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            communication_mode: CommunicationMode::default(),
            request_timeout: default_request_timeout(),
            request_event_name: default_request_event_name(),
            response_event_name: default_response_event_name(),
            message_types: MessageTypes::default(),
            source_config: SourceConfig::default(),
        }
    }
}

/// Wire names for each logical operation. Hosts may rename any of them.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MessageTypes {
    #[serde(default = "default_get_schema")]
    pub get_schema: String,
    #[serde(default = "default_update_schema")]
    pub update_schema: String,
    #[serde(default = "default_check_preview")]
    pub check_preview: String,
    #[serde(default = "default_render_preview")]
    pub render_preview: String,
    #[serde(default = "default_cleanup_preview")]
    pub cleanup_preview: String,
    #[serde(default = "default_start_recording")]
    pub start_recording: String,
    #[serde(default = "default_stop_recording")]
    pub stop_recording: String,
    #[serde(default = "default_schema_push")]
    pub schema_push: String,
}

impl MessageTypes {
    fn names(&self) -> [(&'static str, &str); 8] {
        [
            ("get_schema", self.get_schema.as_str()),
            ("update_schema", self.update_schema.as_str()),
            ("check_preview", self.check_preview.as_str()),
            ("render_preview", self.render_preview.as_str()),
            ("cleanup_preview", self.cleanup_preview.as_str()),
            ("start_recording", self.start_recording.as_str()),
            ("stop_recording", self.stop_recording.as_str()),
            ("schema_push", self.schema_push.as_str()),
        ]
    }
}

impl Default for MessageTypes {
    fn default() -> Self {
        Self {
            get_schema: default_get_schema(),
            update_schema: default_update_schema(),
            check_preview: default_check_preview(),
            render_preview: default_render_preview(),
            cleanup_preview: default_cleanup_preview(),
            start_recording: default_start_recording(),
            stop_recording: default_stop_recording(),
            schema_push: default_schema_push(),
        }
    }
}

/// Source tags that tell extension traffic from host traffic on a shared bus.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SourceConfig {
    #[serde(default = "default_content_source")]
    pub content_source: String,
    #[serde(default = "default_host_source")]
    pub host_source: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            content_source: default_content_source(),
            host_source: default_host_source(),
        }
    }
}

/// Global function names used by the deprecated windowFunction mode.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LegacyConfig {
    #[serde(default = "default_get_function_name")]
    pub get_function_name: String,
    #[serde(default = "default_update_function_name")]
    pub update_function_name: String,
    #[serde(default = "default_preview_function_name")]
    pub preview_function_name: String,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            get_function_name: default_get_function_name(),
            update_function_name: default_update_function_name(),
            preview_function_name: default_preview_function_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RecordingConfig {
    #[serde(default)]
    pub data_fetch_mode: DataFetchMode,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_ms: u64,
    /// Seconds without a new snapshot before recording stops by itself.
    #[serde(default)]
    pub auto_stop_timeout: Option<u64>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            data_fetch_mode: DataFetchMode::default(),
            polling_interval_ms: default_polling_interval(),
            auto_stop_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct OutputConfig {
    #[serde(default)]
    pub json_pretty: bool,
}

fn default_request_timeout() -> u64 {
    secs::REQUEST
}
fn default_request_event_name() -> String {
    "schema-editor:request".to_string()
}
fn default_response_event_name() -> String {
    "schema-editor:response".to_string()
}
fn default_get_schema() -> String {
    "GET_SCHEMA".to_string()
}
fn default_update_schema() -> String {
    "UPDATE_SCHEMA".to_string()
}
fn default_check_preview() -> String {
    "CHECK_PREVIEW".to_string()
}
fn default_render_preview() -> String {
    "RENDER_PREVIEW".to_string()
}
fn default_cleanup_preview() -> String {
    "CLEANUP_PREVIEW".to_string()
}
fn default_start_recording() -> String {
    "START_RECORDING".to_string()
}
fn default_stop_recording() -> String {
    "STOP_RECORDING".to_string()
}
fn default_schema_push() -> String {
    "SCHEMA_PUSH".to_string()
}
fn default_content_source() -> String {
    "schema-editor-content".to_string()
}
fn default_host_source() -> String {
    "schema-editor-host".to_string()
}
fn default_get_function_name() -> String {
    "__getContentById".to_string()
}
fn default_update_function_name() -> String {
    "__updateContentById".to_string()
}
fn default_preview_function_name() -> String {
    "__getContentPreview".to_string()
}
fn default_polling_interval() -> u64 {
    ms::POLLING_INTERVAL
}

pub fn default_config_path() -> Result<PathBuf> {
    default_config_dir().map(|p| p.join("config.toml"))
}

pub fn default_config_dir() -> Result<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .map(|p| p.join("schema-bridge"))
        .ok_or_else(|| BridgeError::ConfigError("Could not determine config directory".into()))
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let global_path = default_config_path()?;
        if global_path.exists() {
            let content = std::fs::read_to_string(&global_path)?;
            config = toml::from_str(&content)?;
        }

        let project_path = PathBuf::from(".schema-bridge.toml");
        if project_path.exists() {
            let content = std::fs::read_to_string(&project_path)?;
            let project_config: Config = toml::from_str(&content)?;
            config = config.merge(project_config);
        }

        config.load_from_env();

        Ok(config)
    }

    pub fn load_with_overrides(&self, cli_overrides: ConfigOverrides) -> Self {
        let mut config = self.clone();

        if let Some(mode) = cli_overrides.mode {
            config.api.communication_mode = mode;
        }
        if let Some(timeout) = cli_overrides.timeout {
            config.api.request_timeout = timeout;
        }
        if let Some(fetch_mode) = cli_overrides.fetch_mode {
            config.recording.data_fetch_mode = fetch_mode;
        }
        if let Some(json) = cli_overrides.json {
            config.output.json_pretty = json;
        }

        config
    }

    /// Sections the project file changed from their defaults replace the global ones.
    fn merge(mut self, other: Config) -> Self {
        if other.api != ApiConfig::default() {
            self.api = other.api;
        }
        if other.legacy != LegacyConfig::default() {
            self.legacy = other.legacy;
        }
        if other.recording != RecordingConfig::default() {
            self.recording = other.recording;
        }
        if other.output != OutputConfig::default() {
            self.output = other.output;
        }
        self
    }

    fn load_from_env(&mut self) {
        if let Ok(mode) = std::env::var("SCHEMA_BRIDGE_MODE")
            && let Ok(mode) = mode.parse()
        {
            self.api.communication_mode = mode;
        }
        if let Ok(timeout) = std::env::var("SCHEMA_BRIDGE_TIMEOUT")
            && let Ok(timeout) = timeout.parse()
        {
            self.api.request_timeout = timeout;
        }
        if let Ok(fetch_mode) = std::env::var("SCHEMA_BRIDGE_FETCH_MODE")
            && let Ok(fetch_mode) = fetch_mode.parse()
        {
            self.recording.data_fetch_mode = fetch_mode;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let api = &self.api;

        if !(secs::REQUEST_MIN..=secs::REQUEST_MAX).contains(&api.request_timeout) {
            return Err(BridgeError::ConfigError(format!(
                "request_timeout must be between {} and {} seconds",
                secs::REQUEST_MIN,
                secs::REQUEST_MAX
            )));
        }

        for (key, name) in [
            ("request_event_name", api.request_event_name.as_str()),
            ("response_event_name", api.response_event_name.as_str()),
        ]
        .into_iter()
        .chain(api.message_types.names())
        {
            if !EVENT_NAME_PATTERN.is_match(name) {
                return Err(BridgeError::ConfigError(format!(
                    "{} '{}' is not a valid event name",
                    key, name
                )));
            }
        }

        if api.request_event_name == api.response_event_name {
            return Err(BridgeError::ConfigError(
                "request_event_name and response_event_name must differ".into(),
            ));
        }

        let sources = &api.source_config;
        if sources.content_source.is_empty() || sources.host_source.is_empty() {
            return Err(BridgeError::ConfigError(
                "source_config tags cannot be empty".into(),
            ));
        }
        if sources.content_source == sources.host_source {
            return Err(BridgeError::ConfigError(
                "content_source and host_source must differ".into(),
            ));
        }

        if self.recording.polling_interval_ms == 0 {
            return Err(BridgeError::ConfigError(
                "polling_interval_ms must be greater than 0".into(),
            ));
        }

        if self.recording.auto_stop_timeout == Some(0) {
            return Err(BridgeError::ConfigError(
                "auto_stop_timeout must be greater than 0 (omit it to disable)".into(),
            ));
        }

        Ok(())
    }

    pub fn show(&self) -> String {
        format!(
            r#"API:
  Mode: {}
  Request Timeout: {}s
  Request Event: {}
  Response Event: {}
  Push Type: {}
  Sources: {} / {}

Legacy Functions:
  Get: {}
  Update: {}
  Preview: {}

Recording:
  Fetch Mode: {}
  Polling Interval: {}ms
  Auto Stop: {}
"#,
            self.api.communication_mode,
            self.api.request_timeout,
            self.api.request_event_name,
            self.api.response_event_name,
            self.api.message_types.schema_push,
            self.api.source_config.content_source,
            self.api.source_config.host_source,
            self.legacy.get_function_name,
            self.legacy.update_function_name,
            self.legacy.preview_function_name,
            self.recording.data_fetch_mode,
            self.recording.polling_interval_ms,
            self.recording
                .auto_stop_timeout
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "disabled".into()),
        )
    }
}

#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub mode: Option<CommunicationMode>,
    pub timeout: Option<u64>,
    pub fetch_mode: Option<DataFetchMode>,
    pub json: Option<bool>,
}

/// Live configuration handle. Readers take a snapshot per call, so changes
/// made through [`SharedConfig::update`] apply to the next request.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> Config {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut Config)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    pub fn set_mode(&self, mode: CommunicationMode) {
        self.update(|c| c.api.communication_mode = mode);
    }
}
