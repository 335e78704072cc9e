use super::correlator::{CorrelatorConfig, RequestCorrelator};
use super::injected::{
    CONTENT_SOURCE, INJECTED_SOURCE, InjectedRelay, RELAY_CHANNEL, config_sync_payload, wire,
};
use super::message::{MessageKind, Operation, PREVIEW_CONTAINER_ID, PushMessage, ResponseMessage};
use super::push::PushChannel;
use super::transport::{Endpoint, PageWindow, Subscription, Transport};
use crate::config::{ApiConfig, CommunicationMode, Config, LegacyConfig, SharedConfig};
use crate::{BridgeError, Result};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Places the legacy relay script into the page.
pub trait ScriptInjector: Send + Sync {
    /// Returns true when this call performed the injection.
    fn ensure_relay(&self) -> bool;
}

impl ScriptInjector for PageWindow {
    fn ensure_relay(&self) -> bool {
        match self.handle() {
            Some(window) => InjectedRelay::install(&window),
            None => false,
        }
    }
}

fn direct_config(api: &ApiConfig) -> CorrelatorConfig {
    CorrelatorConfig {
        request_channel: api.request_event_name.clone(),
        response_channel: api.response_event_name.clone(),
        local_source: api.source_config.content_source.clone(),
        remote_source: api.source_config.host_source.clone(),
    }
}

fn relay_config() -> CorrelatorConfig {
    CorrelatorConfig {
        request_channel: RELAY_CHANNEL.to_string(),
        response_channel: RELAY_CHANNEL.to_string(),
        local_source: CONTENT_SOURCE.to_string(),
        remote_source: INJECTED_SOURCE.to_string(),
    }
}

/// Legacy wire name for an operation, if the relay knows one.
fn legacy_type(kind: MessageKind) -> Option<&'static str> {
    match kind {
        MessageKind::GetSchema => Some(wire::GET_SCHEMA),
        MessageKind::UpdateSchema => Some(wire::UPDATE_SCHEMA),
        MessageKind::CheckPreview => Some(wire::CHECK_PREVIEW_FUNCTION),
        MessageKind::RenderPreview => Some(wire::RENDER_PREVIEW),
        MessageKind::CleanupPreview => Some(wire::CLEAR_PREVIEW),
        MessageKind::StartRecording | MessageKind::StopRecording => None,
    }
}

/// One call surface over both wire protocols. The mode is read from the
/// shared configuration on every call, so callers never branch on it.
pub struct ProtocolClient {
    config: SharedConfig,
    transport: Arc<dyn Transport>,
    injector: Arc<dyn ScriptInjector>,
    direct: RequestCorrelator,
    legacy: RequestCorrelator,
    synced_names: Mutex<Option<LegacyConfig>>,
    preview_cleanup: AtomicBool,
}

impl ProtocolClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        injector: Arc<dyn ScriptInjector>,
        config: SharedConfig,
    ) -> Self {
        let initial = config.snapshot();
        Self {
            direct: RequestCorrelator::new(transport.clone(), direct_config(&initial.api)),
            legacy: RequestCorrelator::new(transport.clone(), relay_config()),
            config,
            transport,
            injector,
            synced_names: Mutex::new(None),
            preview_cleanup: AtomicBool::new(false),
        }
    }

    pub fn for_page(window: &Arc<PageWindow>, config: SharedConfig) -> Self {
        Self::new(window.clone(), window.clone(), config)
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn pending_count(&self) -> usize {
        self.direct.pending_count() + self.legacy.pending_count()
    }

    pub async fn request(&self, op: Operation) -> Result<ResponseMessage> {
        let config = self.config.snapshot();
        match config.api.communication_mode {
            CommunicationMode::PostMessage => {
                self.direct.configure(direct_config(&config.api));
                let kind = op.kind().wire_name(&config.api.message_types);
                self.direct
                    .call(kind, op.payload(), config.api.timeout())
                    .await
            }
            CommunicationMode::WindowFunction => self.request_legacy(&op, &config).await,
        }
    }

    async fn request_legacy(&self, op: &Operation, config: &Config) -> Result<ResponseMessage> {
        let Some(kind) = legacy_type(op.kind()) else {
            return Err(BridgeError::Unsupported(format!(
                "{} has no windowFunction counterpart",
                op.kind().wire_name(&config.api.message_types)
            )));
        };
        self.prepare_relay(&config.legacy);
        self.legacy
            .call(kind, op.payload(), config.api.timeout())
            .await
    }

    fn prepare_relay(&self, names: &LegacyConfig) {
        let injected = self.injector.ensure_relay();
        let needs_sync = {
            let mut synced = self
                .synced_names
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let stale = injected || synced.as_ref() != Some(names);
            if stale {
                *synced = Some(names.clone());
            }
            stale
        };

        if needs_sync {
            tracing::debug!("syncing legacy function names to relay");
            Endpoint::new(self.transport.clone(), CONTENT_SOURCE, INJECTED_SOURCE).send(
                RELAY_CHANNEL,
                json!({ "type": wire::CONFIG_SYNC, "payload": config_sync_payload(names) }),
            );
        }
    }

    pub async fn get_schema(&self, params: &str) -> Result<Option<Value>> {
        self.request(Operation::GetSchema {
            params: params.to_string(),
        })
        .await?
        .into_result()
    }

    pub async fn update_schema(&self, params: &str, schema: Value) -> Result<()> {
        self.request(Operation::UpdateSchema {
            schema,
            params: params.to_string(),
        })
        .await?
        .into_result()
        .map(|_| ())
    }

    /// Capability check. Any failure, including a timeout, reads as "no
    /// preview available".
    pub async fn check_preview(&self) -> bool {
        match self.request(Operation::CheckPreview).await {
            Ok(response) => response.is_success() && response.flag("exists"),
            Err(e) => {
                tracing::debug!("preview check failed: {}", e);
                false
            }
        }
    }

    /// Asks the host to render `data` into the preview container. Returns
    /// whether the host registered a cleanup step.
    pub async fn render_preview(&self, data: Value) -> Result<bool> {
        let response = self
            .request(Operation::RenderPreview {
                data,
                container_id: PREVIEW_CONTAINER_ID.to_string(),
            })
            .await?;
        let has_cleanup = response.flag("hasCleanup");
        response.into_result()?;
        self.preview_cleanup.store(has_cleanup, Ordering::SeqCst);
        Ok(has_cleanup)
    }

    pub async fn cleanup_preview(&self) -> Result<()> {
        self.request(Operation::CleanupPreview {
            container_id: PREVIEW_CONTAINER_ID.to_string(),
        })
        .await?
        .into_result()
        .map(|_| ())
    }

    /// Runs the host's cleanup if the last render registered one.
    pub async fn clear_preview(&self) {
        if !self.preview_cleanup.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.cleanup_preview().await {
            tracing::warn!("preview cleanup failed: {}", e);
        }
    }

    pub fn has_preview_cleanup(&self) -> bool {
        self.preview_cleanup.load(Ordering::SeqCst)
    }

    pub async fn start_recording(&self, params: &str) -> Result<()> {
        self.request(Operation::StartRecording {
            params: params.to_string(),
        })
        .await?
        .into_result()
        .map(|_| ())
    }

    pub async fn stop_recording(&self, params: &str) -> Result<()> {
        self.request(Operation::StopRecording {
            params: params.to_string(),
        })
        .await?
        .into_result()
        .map(|_| ())
    }

    pub fn listen_push(
        &self,
        handler: impl Fn(PushMessage) + Send + Sync + 'static,
    ) -> Subscription {
        let api = self.config.snapshot().api;
        PushChannel::listen(
            self.transport.clone(),
            &api.message_types.schema_push,
            &api.source_config,
            handler,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Replies to every direct request with `reply(type, payload)` merged
    /// with the request id.
    fn direct_host(
        window: &Arc<PageWindow>,
        reply: impl Fn(&str, &Value) -> Value + Send + Sync + 'static,
    ) -> Subscription {
        let host = Endpoint::new(window.clone(), "schema-editor-host", "schema-editor-content");
        let replier = host.clone();
        host.subscribe("schema-editor:request", move |detail| {
            let kind = detail["type"].as_str().unwrap_or_default();
            let mut body = reply(kind, &detail["payload"]);
            body["requestId"] = detail["requestId"].clone();
            replier.send("schema-editor:response", body);
        })
    }

    #[tokio::test]
    async fn test_get_schema_direct() {
        let window = PageWindow::new();
        let _host = direct_host(&window, |_, payload| {
            json!({"success": true, "data": format!("schema:{}", payload["params"].as_str().unwrap())})
        });
        let client = ProtocolClient::for_page(&window, SharedConfig::default());

        let data = client.get_schema("x").await.unwrap();
        assert_eq!(data, Some(json!("schema:x")));
    }

    #[tokio::test]
    async fn test_message_type_overrides_reach_the_wire() {
        let window = PageWindow::new();
        let _host = direct_host(&window, |kind, _| json!({"data": kind}));
        let config = SharedConfig::default();
        config.update(|c| c.api.message_types.get_schema = "FETCH".into());
        let client = ProtocolClient::for_page(&window, config);

        assert_eq!(client.get_schema("x").await.unwrap(), Some(json!("FETCH")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_preview_without_host_is_false() {
        let window = PageWindow::new();
        let config = SharedConfig::default();
        config.update(|c| c.api.request_timeout = 1);
        let client = ProtocolClient::for_page(&window, config);

        assert!(!client.check_preview().await);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_check_preview_reads_top_level_flag() {
        let window = PageWindow::new();
        let _host = direct_host(&window, |_, _| json!({"exists": true}));
        let client = ProtocolClient::for_page(&window, SharedConfig::default());
        assert!(client.check_preview().await);
    }

    #[tokio::test]
    async fn test_clear_preview_only_after_cleanup_registered() {
        let window = PageWindow::new();
        let cleanups = Arc::new(Mutex::new(0));
        let counter = cleanups.clone();
        let _host = direct_host(&window, move |kind, payload| match kind {
            "RENDER_PREVIEW" => {
                assert_eq!(payload["containerId"], PREVIEW_CONTAINER_ID);
                json!({"data": {"hasCleanup": true}})
            }
            "CLEANUP_PREVIEW" => {
                *counter.lock().unwrap() += 1;
                json!({"success": true})
            }
            _ => json!({"success": false, "error": "unexpected"}),
        });
        let client = ProtocolClient::for_page(&window, SharedConfig::default());

        client.clear_preview().await;
        assert_eq!(*cleanups.lock().unwrap(), 0);

        assert!(client.render_preview(json!({"a": 1})).await.unwrap());
        client.clear_preview().await;
        client.clear_preview().await;
        assert_eq!(*cleanups.lock().unwrap(), 1);
        assert!(!client.has_preview_cleanup());
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_missing_function_fails_immediately() {
        let window = PageWindow::new();
        let config = SharedConfig::default();
        config.set_mode(CommunicationMode::WindowFunction);
        let client = ProtocolClient::for_page(&window, config);

        let started = tokio::time::Instant::now();
        let err = client.get_schema("x").await.unwrap_err();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(matches!(err, BridgeError::MissingFunction(ref name) if name == "__getContentById"));
        assert!(window.relay_injected());
    }

    #[tokio::test]
    async fn test_legacy_renamed_function_is_synced() {
        let window = PageWindow::new();
        window
            .globals()
            .define("__myGet", |args| Ok(json!({"for": args[0]})));
        let config = SharedConfig::default();
        config.update(|c| {
            c.api.communication_mode = CommunicationMode::WindowFunction;
            c.legacy.get_function_name = "__myGet".into();
        });
        let client = ProtocolClient::for_page(&window, config.clone());

        let data = client.get_schema("p").await.unwrap();
        assert_eq!(data, Some(json!({"for": "p"})));

        config.update(|c| c.legacy.get_function_name = "__gone".into());
        let err = client.get_schema("p").await.unwrap_err();
        assert!(matches!(err, BridgeError::MissingFunction(ref name) if name == "__gone"));
    }

    #[tokio::test]
    async fn test_legacy_recording_is_unsupported() {
        let window = PageWindow::new();
        let config = SharedConfig::default();
        config.set_mode(CommunicationMode::WindowFunction);
        let client = ProtocolClient::for_page(&window, config);

        let err = client.start_recording("p").await.unwrap_err();
        assert!(matches!(err, BridgeError::Unsupported(_)));
        assert!(!window.relay_injected());
    }

    #[tokio::test]
    async fn test_relay_injected_once_across_clients() {
        let window = PageWindow::new();
        window.globals().define("__getContentById", |_| Ok(json!("v")));
        let config = SharedConfig::default();
        config.set_mode(CommunicationMode::WindowFunction);

        let first = ProtocolClient::for_page(&window, config.clone());
        let second = ProtocolClient::for_page(&window, config);
        assert_eq!(first.get_schema("a").await.unwrap(), Some(json!("v")));
        assert_eq!(second.get_schema("a").await.unwrap(), Some(json!("v")));

        // relay plus one response listener per client
        assert_eq!(window.listener_count(RELAY_CHANNEL), 3);
    }
}
