use crate::config::MessageTypes;
use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// DOM id of the container the host renders previews into.
pub const PREVIEW_CONTAINER_ID: &str = "schema-editor-preview-container";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    GetSchema,
    UpdateSchema,
    CheckPreview,
    RenderPreview,
    CleanupPreview,
    StartRecording,
    StopRecording,
}

impl MessageKind {
    pub const ALL: [MessageKind; 7] = [
        Self::GetSchema,
        Self::UpdateSchema,
        Self::CheckPreview,
        Self::RenderPreview,
        Self::CleanupPreview,
        Self::StartRecording,
        Self::StopRecording,
    ];

    /// Name on the wire after applying the configured overrides.
    pub fn wire_name(self, types: &MessageTypes) -> &str {
        match self {
            Self::GetSchema => &types.get_schema,
            Self::UpdateSchema => &types.update_schema,
            Self::CheckPreview => &types.check_preview,
            Self::RenderPreview => &types.render_preview,
            Self::CleanupPreview => &types.cleanup_preview,
            Self::StartRecording => &types.start_recording,
            Self::StopRecording => &types.stop_recording,
        }
    }

    pub fn from_wire(name: &str, types: &MessageTypes) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.wire_name(types) == name)
    }
}

/// One logical call from the extension to the host page.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    GetSchema { params: String },
    UpdateSchema { schema: Value, params: String },
    CheckPreview,
    RenderPreview { data: Value, container_id: String },
    CleanupPreview { container_id: String },
    StartRecording { params: String },
    StopRecording { params: String },
}

impl Operation {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::GetSchema { .. } => MessageKind::GetSchema,
            Self::UpdateSchema { .. } => MessageKind::UpdateSchema,
            Self::CheckPreview => MessageKind::CheckPreview,
            Self::RenderPreview { .. } => MessageKind::RenderPreview,
            Self::CleanupPreview { .. } => MessageKind::CleanupPreview,
            Self::StartRecording { .. } => MessageKind::StartRecording,
            Self::StopRecording { .. } => MessageKind::StopRecording,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::GetSchema { params }
            | Self::StartRecording { params }
            | Self::StopRecording { params } => json!({ "params": params }),
            Self::UpdateSchema { schema, params } => json!({ "schema": schema, "params": params }),
            Self::CheckPreview => json!({}),
            Self::RenderPreview { data, container_id } => {
                json!({ "data": data, "containerId": container_id })
            }
            Self::CleanupPreview { container_id } => json!({ "containerId": container_id }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    pub request_id: String,
}

impl RequestMessage {
    pub fn params(&self) -> Option<&str> {
        self.payload.get("params").and_then(Value::as_str)
    }
}

/// Reply correlated to a request. `success` defaults to true when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set by the legacy relay when the expected global function is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_function: Option<String>,
    /// Host flags that some integrations send beside `data` (`exists`, `hasCleanup`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResponseMessage {
    pub fn ok(request_id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            success: Some(true),
            data,
            ..Default::default()
        }
    }

    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            success: Some(false),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.success != Some(false)
    }

    /// Looks a flag up in `data` first, then among the top-level fields.
    pub fn flag(&self, name: &str) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get(name))
            .or_else(|| self.extra.get(name))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn into_result(self) -> Result<Option<Value>> {
        if let Some(name) = self.missing_function {
            return Err(BridgeError::MissingFunction(name));
        }
        if !self.is_success() {
            return Err(BridgeError::Remote(
                self.error.unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        Ok(self.data)
    }
}

/// Unsolicited host-to-extension notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_follow_overrides() {
        let mut types = MessageTypes::default();
        assert_eq!(MessageKind::GetSchema.wire_name(&types), "GET_SCHEMA");

        types.get_schema = "FETCH_SCHEMA".into();
        assert_eq!(MessageKind::GetSchema.wire_name(&types), "FETCH_SCHEMA");
        assert_eq!(
            MessageKind::from_wire("FETCH_SCHEMA", &types),
            Some(MessageKind::GetSchema)
        );
        assert_eq!(MessageKind::from_wire("GET_SCHEMA", &types), None);
    }

    #[test]
    fn test_operation_payloads() {
        let op = Operation::UpdateSchema {
            schema: json!("x"),
            params: "p".into(),
        };
        assert_eq!(op.kind(), MessageKind::UpdateSchema);
        assert_eq!(op.payload(), json!({"schema": "x", "params": "p"}));

        let op = Operation::RenderPreview {
            data: json!({"a": 1}),
            container_id: PREVIEW_CONTAINER_ID.into(),
        };
        assert_eq!(op.payload()["containerId"], PREVIEW_CONTAINER_ID);
        assert_eq!(Operation::CheckPreview.payload(), json!({}));
    }

    #[test]
    fn test_request_wire_shape() {
        let req = RequestMessage {
            kind: "GET_SCHEMA".into(),
            payload: json!({"params": "a,b"}),
            request_id: "req-1".into(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["type"], "GET_SCHEMA");
        assert_eq!(value["requestId"], "req-1");
        assert_eq!(req.params(), Some("a,b"));
    }

    #[test]
    fn test_response_defaults_to_success() {
        let resp: ResponseMessage =
            serde_json::from_value(json!({"requestId": "req-1", "data": "hello"})).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.into_result().unwrap(), Some(json!("hello")));
    }

    #[test]
    fn test_response_failure_carries_error() {
        let resp: ResponseMessage = serde_json::from_value(
            json!({"requestId": "req-2", "success": false, "error": "readonly"}),
        )
        .unwrap();
        match resp.into_result() {
            Err(BridgeError::Remote(msg)) => assert_eq!(msg, "readonly"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_response_flags_from_data_or_top_level() {
        let nested: ResponseMessage =
            serde_json::from_value(json!({"requestId": "r", "data": {"exists": true}})).unwrap();
        assert!(nested.flag("exists"));

        let flat: ResponseMessage =
            serde_json::from_value(json!({"requestId": "r", "exists": true, "hasCleanup": true}))
                .unwrap();
        assert!(flat.flag("exists"));
        assert!(flat.flag("hasCleanup"));
        assert!(!flat.flag("missing"));
    }

    #[test]
    fn test_missing_function_wins_over_success_flag() {
        let resp = ResponseMessage {
            success: Some(false),
            error: Some("page does not provide window.__getContentById".into()),
            missing_function: Some("__getContentById".into()),
            ..ResponseMessage::ok("req-3", None)
        };
        assert!(matches!(
            resp.into_result(),
            Err(BridgeError::MissingFunction(name)) if name == "__getContentById"
        ));
    }

    #[test]
    fn test_push_defaults() {
        let push: PushMessage = serde_json::from_value(json!({"data": {"k": 1}})).unwrap();
        assert!(push.success);
        assert!(push.params.is_none());
    }
}
