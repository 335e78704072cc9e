//! Page-world relay for the deprecated windowFunction protocol.
//!
//! The extension cannot call into the host page's globals directly, so it
//! injects this relay once per page. The relay listens on the shared message
//! bus for content-tagged commands, invokes the configured `window[...]`
//! functions synchronously and answers on the same bus with its own tag.

use super::message::PREVIEW_CONTAINER_ID;
use super::transport::{Endpoint, Envelope, PageWindow, Transport};
use crate::config::LegacyConfig;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// The bus both sides of the relay talk on (the `window.postMessage` analogue).
pub const RELAY_CHANNEL: &str = "message";
pub const CONTENT_SOURCE: &str = "schema-editor-content";
pub const INJECTED_SOURCE: &str = "schema-editor-injected";

pub mod wire {
    pub const CONFIG_SYNC: &str = "CONFIG_SYNC";
    pub const GET_SCHEMA: &str = "GET_SCHEMA";
    pub const UPDATE_SCHEMA: &str = "UPDATE_SCHEMA";
    pub const CHECK_PREVIEW_FUNCTION: &str = "CHECK_PREVIEW_FUNCTION";
    pub const RENDER_PREVIEW: &str = "RENDER_PREVIEW";
    pub const CLEAR_PREVIEW: &str = "CLEAR_PREVIEW";
    pub const HIDE_PREVIEW: &str = "HIDE_PREVIEW";
    pub const SHOW_PREVIEW: &str = "SHOW_PREVIEW";

    pub const INJECTED_READY: &str = "INJECTED_READY";
    pub const SCHEMA_RESPONSE: &str = "SCHEMA_RESPONSE";
    pub const UPDATE_RESULT: &str = "UPDATE_RESULT";
    pub const PREVIEW_FUNCTION_RESULT: &str = "PREVIEW_FUNCTION_RESULT";
    pub const PREVIEW_RESULT: &str = "PREVIEW_RESULT";
    pub const CLEAR_RESULT: &str = "CLEAR_RESULT";
}

#[derive(Debug, Clone, PartialEq)]
enum RelayCommand {
    ConfigSync(Value),
    GetSchema { params: Value },
    UpdateSchema { schema: Value, params: Value },
    CheckPreviewFunction,
    RenderPreview { data: Value },
    ClearPreview,
    SetPreviewVisible(bool),
}

impl RelayCommand {
    fn parse(kind: &str, payload: &Value) -> Option<Self> {
        let field = |name: &str| payload.get(name).cloned().unwrap_or(Value::Null);
        match kind {
            wire::CONFIG_SYNC => Some(Self::ConfigSync(payload.clone())),
            wire::GET_SCHEMA => Some(Self::GetSchema {
                params: field("params"),
            }),
            wire::UPDATE_SCHEMA => Some(Self::UpdateSchema {
                schema: field("schema"),
                params: field("params"),
            }),
            wire::CHECK_PREVIEW_FUNCTION => Some(Self::CheckPreviewFunction),
            wire::RENDER_PREVIEW => Some(Self::RenderPreview {
                data: field("data"),
            }),
            wire::CLEAR_PREVIEW => Some(Self::ClearPreview),
            wire::HIDE_PREVIEW => Some(Self::SetPreviewVisible(false)),
            wire::SHOW_PREVIEW => Some(Self::SetPreviewVisible(true)),
            _ => None,
        }
    }
}

/// Builds the `CONFIG_SYNC` payload for the given function names.
pub fn config_sync_payload(names: &LegacyConfig) -> Value {
    json!({
        "getFunctionName": names.get_function_name,
        "updateFunctionName": names.update_function_name,
        "previewFunctionName": names.preview_function_name,
    })
}

/// State of the relay-owned preview container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreviewContainer {
    Absent,
    Visible,
    /// Mounted but hidden, e.g. while the editor panel is dragged over it.
    Hidden,
}

pub struct InjectedRelay {
    window: Weak<PageWindow>,
    names: Mutex<LegacyConfig>,
    preview: Mutex<PreviewContainer>,
}

impl InjectedRelay {
    /// Installs the relay unless the page already carries one. Returns
    /// whether this call did the injection.
    pub fn install(window: &Arc<PageWindow>) -> bool {
        Self::attach(window).is_some()
    }

    fn attach(window: &Arc<PageWindow>) -> Option<Arc<Self>> {
        if !window.mark_relay_injected() {
            tracing::debug!("relay already present on page");
            return None;
        }

        let relay = Arc::new(Self {
            window: Arc::downgrade(window),
            names: Mutex::new(LegacyConfig::default()),
            preview: Mutex::new(PreviewContainer::Absent),
        });

        let handler_relay = relay.clone();
        let subscription = window.subscribe(
            RELAY_CHANNEL,
            CONTENT_SOURCE,
            Arc::new(move |envelope: &Envelope| handler_relay.handle(&envelope.detail)),
        );
        window.retain_script(subscription);

        relay.reply(json!({ "type": wire::INJECTED_READY, "ready": true }));
        tracing::debug!("relay injected");
        Some(relay)
    }

    fn set_preview(&self, state: PreviewContainer) -> PreviewContainer {
        let mut preview = self.preview.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *preview, state)
    }

    /// Toggles a mounted container. Without one there is nothing to show.
    fn set_preview_visible(&self, visible: bool) {
        let mut preview = self.preview.lock().unwrap_or_else(PoisonError::into_inner);
        if *preview != PreviewContainer::Absent {
            *preview = if visible {
                PreviewContainer::Visible
            } else {
                PreviewContainer::Hidden
            };
        }
    }

    fn reply(&self, detail: Value) {
        let Some(window) = self.window.upgrade() else {
            return;
        };
        Endpoint::new(window, INJECTED_SOURCE, CONTENT_SOURCE).send(RELAY_CHANNEL, detail);
    }

    fn names(&self) -> LegacyConfig {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn handle(&self, detail: &Value) {
        let kind = detail.get("type").and_then(Value::as_str).unwrap_or_default();
        let payload = detail.get("payload").cloned().unwrap_or(Value::Null);
        let request_id = detail.get("requestId").cloned().unwrap_or(Value::Null);

        let Some(command) = RelayCommand::parse(kind, &payload) else {
            tracing::warn!("relay ignoring unknown message type: {:?}", kind);
            return;
        };

        let Some(window) = self.window.upgrade() else {
            return;
        };
        let globals = window.globals();
        let names = self.names();

        let (reply_type, mut body) = match command {
            RelayCommand::ConfigSync(payload) => {
                self.apply_config(&payload);
                return;
            }
            RelayCommand::SetPreviewVisible(visible) => {
                self.set_preview_visible(visible);
                return;
            }
            RelayCommand::GetSchema { params } => {
                let body = match globals.get(&names.get_function_name) {
                    None => missing(&names.get_function_name),
                    Some(f) => match f(&[params]) {
                        Ok(data) => json!({ "success": true, "data": data }),
                        Err(e) => json!({ "success": false, "error": e }),
                    },
                };
                (wire::SCHEMA_RESPONSE, body)
            }
            RelayCommand::UpdateSchema { schema, params } => {
                let body = match globals.get(&names.update_function_name) {
                    None => missing(&names.update_function_name),
                    Some(f) => match f(&[schema, params]) {
                        Ok(Value::Bool(false)) => json!({
                            "success": false,
                            "error": format!("{} returned false", names.update_function_name),
                        }),
                        Ok(_) => json!({ "success": true }),
                        Err(e) => json!({ "success": false, "error": e }),
                    },
                };
                (wire::UPDATE_RESULT, body)
            }
            RelayCommand::CheckPreviewFunction => {
                let exists = globals.get(&names.preview_function_name).is_some();
                (
                    wire::PREVIEW_FUNCTION_RESULT,
                    json!({ "success": true, "data": { "exists": exists } }),
                )
            }
            RelayCommand::RenderPreview { data } => {
                let body = match globals.get(&names.preview_function_name) {
                    None => missing(&names.preview_function_name),
                    Some(f) => match f(&[data, json!(PREVIEW_CONTAINER_ID)]) {
                        Ok(_) => {
                            self.set_preview(PreviewContainer::Visible);
                            // The relay owns the container, so it always needs clearing.
                            json!({ "success": true, "data": { "hasCleanup": true } })
                        }
                        Err(e) => json!({ "success": false, "error": e }),
                    },
                };
                (wire::PREVIEW_RESULT, body)
            }
            RelayCommand::ClearPreview => {
                if self.set_preview(PreviewContainer::Absent) != PreviewContainer::Absent {
                    tracing::debug!("preview container removed");
                }
                (wire::CLEAR_RESULT, json!({ "success": true }))
            }
        };

        if let Some(map) = body.as_object_mut() {
            map.insert("type".into(), json!(reply_type));
            map.insert("requestId".into(), request_id);
        }
        self.reply(body);
    }

    fn apply_config(&self, payload: &Value) {
        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        let pick = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        if let Some(name) = pick("getFunctionName") {
            names.get_function_name = name;
        }
        if let Some(name) = pick("updateFunctionName") {
            names.update_function_name = name;
        }
        if let Some(name) = pick("previewFunctionName") {
            names.preview_function_name = name;
        }
        tracing::debug!(
            "relay config synced: get={} update={} preview={}",
            names.get_function_name,
            names.update_function_name,
            names.preview_function_name
        );
    }
}

fn missing(name: &str) -> Value {
    json!({
        "success": false,
        "error": format!("Page does not provide window.{}", name),
        "missingFunction": name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::transport::Subscription;

    fn collect_replies(window: &Arc<PageWindow>) -> (Arc<Mutex<Vec<Value>>>, Subscription) {
        let content = Endpoint::new(window.clone(), CONTENT_SOURCE, INJECTED_SOURCE);
        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = replies.clone();
        let sub = content.subscribe(RELAY_CHANNEL, move |detail| {
            sink.lock().unwrap().push(detail.clone());
        });
        (replies, sub)
    }

    fn send(window: &Arc<PageWindow>, kind: &str, payload: Value) {
        Endpoint::new(window.clone(), CONTENT_SOURCE, INJECTED_SOURCE).send(
            RELAY_CHANNEL,
            json!({ "type": kind, "payload": payload, "requestId": "req-1" }),
        );
    }

    #[test]
    fn test_install_is_once_per_page() {
        let window = PageWindow::new();
        let (replies, _sub) = collect_replies(&window);

        assert!(InjectedRelay::install(&window));
        assert!(!InjectedRelay::install(&window));
        assert_eq!(window.listener_count(RELAY_CHANNEL), 2);

        let replies = replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["type"], wire::INJECTED_READY);
    }

    #[test]
    fn test_missing_global_is_reported_immediately() {
        let window = PageWindow::new();
        InjectedRelay::install(&window);
        let (replies, _sub) = collect_replies(&window);

        send(&window, wire::GET_SCHEMA, json!({ "params": "x" }));

        let replies = replies.lock().unwrap();
        assert_eq!(replies[0]["type"], wire::SCHEMA_RESPONSE);
        assert_eq!(replies[0]["requestId"], "req-1");
        assert_eq!(replies[0]["success"], false);
        assert_eq!(replies[0]["missingFunction"], "__getContentById");
        assert!(replies[0]["error"].as_str().unwrap().contains("__getContentById"));
    }

    #[test]
    fn test_get_calls_configured_global() {
        let window = PageWindow::new();
        InjectedRelay::install(&window);
        window
            .globals()
            .define("__fetch", |args| Ok(json!(format!("schema for {}", args[0].as_str().unwrap_or("")))));
        let (replies, _sub) = collect_replies(&window);

        send(
            &window,
            wire::CONFIG_SYNC,
            config_sync_payload(&LegacyConfig {
                get_function_name: "__fetch".into(),
                ..LegacyConfig::default()
            }),
        );
        send(&window, wire::GET_SCHEMA, json!({ "params": "a,b" }));

        let replies = replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["success"], true);
        assert_eq!(replies[0]["data"], "schema for a,b");
    }

    #[test]
    fn test_update_false_and_thrown_errors_fail() {
        let window = PageWindow::new();
        InjectedRelay::install(&window);
        let (replies, _sub) = collect_replies(&window);

        window
            .globals()
            .define("__updateContentById", |_| Ok(json!(false)));
        send(&window, wire::UPDATE_SCHEMA, json!({ "schema": "x", "params": "p" }));

        window
            .globals()
            .define("__updateContentById", |_| Err("locked".to_string()));
        send(&window, wire::UPDATE_SCHEMA, json!({ "schema": "x", "params": "p" }));

        let replies = replies.lock().unwrap();
        assert_eq!(replies[0]["type"], wire::UPDATE_RESULT);
        assert_eq!(replies[0]["success"], false);
        assert_eq!(replies[1]["error"], "locked");
    }

    #[test]
    fn test_preview_roundtrip() {
        let window = PageWindow::new();
        InjectedRelay::install(&window);
        let (replies, _sub) = collect_replies(&window);

        send(&window, wire::CHECK_PREVIEW_FUNCTION, json!({}));
        window
            .globals()
            .define("__getContentPreview", |args| Ok(args[1].clone()));
        send(&window, wire::CHECK_PREVIEW_FUNCTION, json!({}));
        send(&window, wire::RENDER_PREVIEW, json!({ "data": {"a": 1} }));
        send(&window, wire::CLEAR_PREVIEW, json!({}));

        let replies = replies.lock().unwrap();
        assert_eq!(replies[0]["data"]["exists"], false);
        assert_eq!(replies[1]["data"]["exists"], true);
        assert_eq!(replies[2]["type"], wire::PREVIEW_RESULT);
        assert_eq!(replies[2]["data"]["hasCleanup"], true);
        assert_eq!(replies[3]["type"], wire::CLEAR_RESULT);
    }

    #[test]
    fn test_hide_and_show_toggle_mounted_preview() {
        let window = PageWindow::new();
        let relay = InjectedRelay::attach(&window).unwrap();
        let (replies, _sub) = collect_replies(&window);

        send(&window, wire::HIDE_PREVIEW, json!({}));
        assert_eq!(*relay.preview.lock().unwrap(), PreviewContainer::Absent);

        window
            .globals()
            .define("__getContentPreview", |_| Ok(Value::Null));
        send(&window, wire::RENDER_PREVIEW, json!({ "data": 1 }));
        assert_eq!(*relay.preview.lock().unwrap(), PreviewContainer::Visible);

        send(&window, wire::HIDE_PREVIEW, json!({}));
        assert_eq!(*relay.preview.lock().unwrap(), PreviewContainer::Hidden);
        send(&window, wire::SHOW_PREVIEW, json!({}));
        assert_eq!(*relay.preview.lock().unwrap(), PreviewContainer::Visible);

        send(&window, wire::HIDE_PREVIEW, json!({}));
        send(&window, wire::CLEAR_PREVIEW, json!({}));
        assert_eq!(*relay.preview.lock().unwrap(), PreviewContainer::Absent);

        // Only the render and the clear are answered.
        let replies = replies.lock().unwrap();
        let kinds: Vec<_> = replies.iter().map(|r| r["type"].clone()).collect();
        assert_eq!(kinds, vec![json!(wire::PREVIEW_RESULT), json!(wire::CLEAR_RESULT)]);
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let window = PageWindow::new();
        InjectedRelay::install(&window);
        let (replies, _sub) = collect_replies(&window);

        send(&window, "RESIZE_PREVIEW", json!({}));
        assert!(replies.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            RelayCommand::parse(wire::GET_SCHEMA, &json!({ "params": "p" })),
            Some(RelayCommand::GetSchema { params: json!("p") })
        );
        assert_eq!(
            RelayCommand::parse(wire::CLEAR_PREVIEW, &Value::Null),
            Some(RelayCommand::ClearPreview)
        );
        assert_eq!(
            RelayCommand::parse(wire::HIDE_PREVIEW, &Value::Null),
            Some(RelayCommand::SetPreviewVisible(false))
        );
        assert_eq!(RelayCommand::parse("START_RECORDING", &json!({})), None);
    }
}
