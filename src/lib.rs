pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod host;
pub mod output;
pub mod recording;
pub mod timeouts;

pub use config::{CommunicationMode, Config, DataFetchMode, SharedConfig};
pub use error::BridgeError;

pub type Result<T> = std::result::Result<T, BridgeError>;
