pub mod config_handler;
pub mod recording;
pub mod schema;

use crate::bridge::{PageWindow, ProtocolClient};
use crate::config::{Config, SharedConfig};
use crate::host::{FileStoreHost, HostBridge, install_legacy_globals};
use std::path::Path;
use std::sync::Arc;

/// An in-process host page served from a JSON store, speaking both the
/// event protocol and the legacy global functions, plus the extension-side
/// client talking to it.
pub struct DemoPage {
    pub window: Arc<PageWindow>,
    pub client: Arc<ProtocolClient>,
    pub host: Arc<FileStoreHost>,
    _bridge: HostBridge,
}

impl DemoPage {
    pub fn open(config: &Config, store: &Path) -> Self {
        let window = PageWindow::new();
        let host = Arc::new(FileStoreHost::new(store));
        let bridge = HostBridge::attach(window.clone(), &config.api, host.clone());
        install_legacy_globals(&window, &config.legacy, host.clone());

        let client = Arc::new(ProtocolClient::for_page(
            &window,
            SharedConfig::new(config.clone()),
        ));
        tracing::debug!(
            "demo page ready (store {}, mode {})",
            store.display(),
            config.api.communication_mode
        );

        Self {
            window,
            client,
            host,
            _bridge: bridge,
        }
    }
}
