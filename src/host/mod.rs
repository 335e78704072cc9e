//! Host-page side of the bridge: answers extension requests on behalf of a
//! [`SchemaHost`] and emits schema pushes.

pub mod store;

use crate::bridge::{
    Endpoint, MessageKind, PageWindow, RequestMessage, ResponseMessage, Subscription, Transport,
};
use crate::config::{ApiConfig, LegacyConfig, MessageTypes};
use crate::{BridgeError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

pub use store::FileStoreHost;

/// What a host page implements to serve the extension.
#[async_trait]
pub trait SchemaHost: Send + Sync {
    async fn get_schema(&self, params: &str) -> Result<Option<Value>>;

    /// `Ok(false)` reports a rejected update.
    async fn update_schema(&self, schema: Value, params: &str) -> Result<bool>;

    fn supports_preview(&self) -> bool {
        false
    }

    /// Renders into `container_id`. Returns whether a cleanup step exists.
    async fn render_preview(&self, _data: Value, _container_id: &str) -> Result<bool> {
        Err(BridgeError::Unsupported("preview".into()))
    }

    async fn cleanup_preview(&self, _container_id: &str) -> Result<()> {
        Ok(())
    }

    async fn start_recording(&self, _params: &str) -> Result<()> {
        Ok(())
    }

    async fn stop_recording(&self, _params: &str) -> Result<()> {
        Ok(())
    }

    /// Called once on attach with a handle for pushing schema changes.
    fn attached(&self, _pusher: SchemaPusher) {}
}

/// Synchronous schema access, as needed by legacy global functions.
pub trait SchemaStore: Send + Sync {
    fn load(&self, params: &str) -> Result<Option<Value>>;
    fn save(&self, params: &str, schema: Value) -> Result<bool>;
}

#[derive(Clone)]
pub struct SchemaPusher {
    endpoint: Endpoint,
    channel: String,
}

impl SchemaPusher {
    pub fn push(&self, params: &str, data: Value) {
        tracing::debug!("push {} on {}", params, self.channel);
        self.endpoint.send(
            &self.channel,
            json!({ "success": true, "data": data, "params": params }),
        );
    }
}

struct BridgeInner {
    endpoint: Endpoint,
    response_channel: String,
    message_types: MessageTypes,
    host: Arc<dyn SchemaHost>,
    recording: Mutex<BTreeSet<String>>,
}

/// Failure text as the extension should see it.
fn host_error(e: BridgeError) -> String {
    match e {
        BridgeError::Remote(message) => message,
        other => other.to_string(),
    }
}

impl BridgeInner {
    async fn dispatch(&self, kind: MessageKind, request: RequestMessage) -> ResponseMessage {
        let id = request.request_id.clone();
        let params = request.params().unwrap_or_default().to_string();
        let field = |name: &str| request.payload.get(name).cloned().unwrap_or(Value::Null);

        let outcome: Result<Option<Value>> = match kind {
            MessageKind::GetSchema => self.host.get_schema(&params).await,
            MessageKind::UpdateSchema => {
                match self.host.update_schema(field("schema"), &params).await {
                    Ok(true) => Ok(None),
                    Ok(false) => Err(BridgeError::Remote("update rejected".into())),
                    Err(e) => Err(e),
                }
            }
            MessageKind::CheckPreview => {
                Ok(Some(json!({ "exists": self.host.supports_preview() })))
            }
            MessageKind::RenderPreview => {
                let container = field("containerId");
                let container = container.as_str().unwrap_or_default();
                self.host
                    .render_preview(field("data"), container)
                    .await
                    .map(|has_cleanup| Some(json!({ "hasCleanup": has_cleanup })))
            }
            MessageKind::CleanupPreview => {
                let container = field("containerId");
                self.host
                    .cleanup_preview(container.as_str().unwrap_or_default())
                    .await
                    .map(|_| None)
            }
            MessageKind::StartRecording => {
                let started = self.host.start_recording(&params).await;
                if started.is_ok() {
                    self.recording
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(params.clone());
                }
                started.map(|_| None)
            }
            MessageKind::StopRecording => {
                self.recording
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&params);
                self.host.stop_recording(&params).await.map(|_| None)
            }
        };

        match outcome {
            Ok(data) => ResponseMessage::ok(id, data),
            Err(e) => ResponseMessage::failure(id, host_error(e)),
        }
    }
}

/// Serves one [`SchemaHost`] on the configured request channel until dropped.
pub struct HostBridge {
    inner: Arc<BridgeInner>,
    pusher: SchemaPusher,
    _subscription: Subscription,
}

impl HostBridge {
    pub fn attach(transport: Arc<dyn Transport>, api: &ApiConfig, host: Arc<dyn SchemaHost>) -> Self {
        let endpoint = Endpoint::new(
            transport,
            api.source_config.host_source.clone(),
            api.source_config.content_source.clone(),
        );
        let pusher = SchemaPusher {
            endpoint: endpoint.clone(),
            channel: api.message_types.schema_push.clone(),
        };
        let inner = Arc::new(BridgeInner {
            endpoint: endpoint.clone(),
            response_channel: api.response_event_name.clone(),
            message_types: api.message_types.clone(),
            host: host.clone(),
            recording: Mutex::new(BTreeSet::new()),
        });

        let handler_inner = inner.clone();
        let subscription = endpoint.subscribe(&api.request_event_name, move |detail| {
            handler_inner.clone().receive(detail);
        });
        host.attached(pusher.clone());
        tracing::debug!("host bridge listening on {}", api.request_event_name);

        Self {
            inner,
            pusher,
            _subscription: subscription,
        }
    }

    pub fn push_schema(&self, params: &str, data: Value) {
        self.pusher.push(params, data);
    }

    /// Params the extension currently records, in sorted order.
    pub fn recording_params(&self) -> Vec<String> {
        self.inner
            .recording
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl BridgeInner {
    fn receive(self: Arc<Self>, detail: &Value) {
        let request: RequestMessage = match serde_json::from_value(detail.clone()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("host ignoring malformed request: {}", e);
                return;
            }
        };
        let Some(kind) = MessageKind::from_wire(&request.kind, &self.message_types) else {
            tracing::warn!("host ignoring unknown request type: {}", request.kind);
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no runtime to serve {}", request.request_id);
            return;
        };
        runtime.spawn(async move {
            let response = self.dispatch(kind, request).await;
            match serde_json::to_value(&response) {
                Ok(detail) => self.endpoint.send(&self.response_channel, detail),
                Err(e) => tracing::warn!("failed to encode response: {}", e),
            }
        });
    }
}

/// Defines the three windowFunction-mode globals on `window`, backed by
/// `store`.
pub fn install_legacy_globals(window: &PageWindow, names: &LegacyConfig, store: Arc<dyn SchemaStore>) {
    let globals = window.globals();

    let getter = store.clone();
    globals.define(names.get_function_name.clone(), move |args| {
        let params = args.first().and_then(Value::as_str).unwrap_or_default();
        getter
            .load(params)
            .map(|v| v.unwrap_or(Value::Null))
            .map_err(host_error)
    });

    let setter = store;
    globals.define(names.update_function_name.clone(), move |args| {
        let schema = args.first().cloned().unwrap_or(Value::Null);
        let params = args.get(1).and_then(Value::as_str).unwrap_or_default();
        setter.save(params, schema).map(Value::Bool).map_err(host_error)
    });

    globals.define(names.preview_function_name.clone(), |args| {
        let container = args.get(1).and_then(Value::as_str).unwrap_or_default();
        tracing::debug!("legacy preview rendered into {}", container);
        Ok(Value::Null)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ProtocolClient, RequestCorrelator};
    use crate::config::{CommunicationMode, SharedConfig};
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryHost {
        data: Mutex<HashMap<String, Value>>,
    }

    #[async_trait]
    impl SchemaHost for MemoryHost {
        async fn get_schema(&self, params: &str) -> Result<Option<Value>> {
            Ok(self.data.lock().unwrap().get(params).cloned())
        }

        async fn update_schema(&self, schema: Value, params: &str) -> Result<bool> {
            if params == "readonly" {
                return Err(BridgeError::Remote("readonly".into()));
            }
            self.data.lock().unwrap().insert(params.to_string(), schema);
            Ok(true)
        }
    }

    impl SchemaStore for MemoryHost {
        fn load(&self, params: &str) -> Result<Option<Value>> {
            Ok(self.data.lock().unwrap().get(params).cloned())
        }

        fn save(&self, params: &str, schema: Value) -> Result<bool> {
            self.data.lock().unwrap().insert(params.to_string(), schema);
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_bridge_serves_get_and_update() {
        let window = PageWindow::new();
        let api = ApiConfig::default();
        let host = Arc::new(MemoryHost::default());
        let _bridge = HostBridge::attach(window.clone(), &api, host.clone());
        let client = ProtocolClient::for_page(&window, SharedConfig::default());

        client.update_schema("p", json!({"a": 1})).await.unwrap();
        assert_eq!(client.get_schema("p").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(client.get_schema("absent").await.unwrap(), None);

        let err = client.update_schema("readonly", json!("x")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Remote(ref m) if m == "readonly"));
    }

    #[tokio::test]
    async fn test_preview_unsupported_by_default() {
        let window = PageWindow::new();
        let _bridge =
            HostBridge::attach(window.clone(), &ApiConfig::default(), Arc::new(MemoryHost::default()));
        let client = ProtocolClient::for_page(&window, SharedConfig::default());

        assert!(!client.check_preview().await);
        assert!(client.render_preview(json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_recording_params_tracked() {
        let window = PageWindow::new();
        let bridge =
            HostBridge::attach(window.clone(), &ApiConfig::default(), Arc::new(MemoryHost::default()));
        let client = ProtocolClient::for_page(&window, SharedConfig::default());

        client.start_recording("b").await.unwrap();
        client.start_recording("a").await.unwrap();
        assert_eq!(bridge.recording_params(), vec!["a", "b"]);
        client.stop_recording("a").await.unwrap();
        assert_eq!(bridge.recording_params(), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_type_left_unanswered() {
        let window = PageWindow::new();
        let _bridge =
            HostBridge::attach(window.clone(), &ApiConfig::default(), Arc::new(MemoryHost::default()));
        let correlator = RequestCorrelator::new(
            window.clone(),
            crate::bridge::CorrelatorConfig {
                request_channel: "schema-editor:request".into(),
                response_channel: "schema-editor:response".into(),
                local_source: "schema-editor-content".into(),
                remote_source: "schema-editor-host".into(),
            },
        );

        let err = correlator
            .call("HIDE_PREVIEW", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_push_reaches_listener() {
        let window = PageWindow::new();
        let bridge =
            HostBridge::attach(window.clone(), &ApiConfig::default(), Arc::new(MemoryHost::default()));
        let client = ProtocolClient::for_page(&window, SharedConfig::default());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = client.listen_push(move |push| sink.lock().unwrap().push(push));
        bridge.push_schema("p", json!("v1"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].params.as_deref(), Some("p"));
        assert_eq!(seen[0].data, Some(json!("v1")));
    }

    #[tokio::test]
    async fn test_legacy_globals_back_onto_store() {
        let window = PageWindow::new();
        let store = Arc::new(MemoryHost::default());
        install_legacy_globals(&window, &LegacyConfig::default(), store.clone());

        let config = SharedConfig::default();
        config.set_mode(CommunicationMode::WindowFunction);
        let client = ProtocolClient::for_page(&window, config);

        client.update_schema("p", json!("legacy")).await.unwrap();
        assert_eq!(client.get_schema("p").await.unwrap(), Some(json!("legacy")));
        assert!(client.check_preview().await);
        assert!(client.render_preview(json!({})).await.unwrap());
        client.clear_preview().await;
        assert!(!client.has_preview_cleanup());
    }
}
