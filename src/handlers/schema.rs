use crate::bridge::ProtocolClient;
use crate::host::store::RenderedPreview;
use crate::output::{self, text};
use crate::recording::canonical_content;
use crate::{BridgeError, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct SchemaResult {
    pub params: String,
    pub schema: Option<Value>,
}

impl output::OutputFormatter for SchemaResult {
    fn format_text(&self) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}\n{}",
                text::key_value("Params", &self.params),
                text::block(&canonical_content(schema))
            ),
            None => text::warning(&format!("No schema for '{}'", self.params)),
        }
    }

    fn format_json(&self, pretty: bool) -> Result<String> {
        output::to_json(self, pretty)
    }
}

#[derive(Debug, Serialize)]
pub struct UpdateResult {
    pub params: String,
    pub updated: bool,
}

impl output::OutputFormatter for UpdateResult {
    fn format_text(&self) -> String {
        text::success(&format!("Schema updated for '{}'", self.params))
    }

    fn format_json(&self, pretty: bool) -> Result<String> {
        output::to_json(self, pretty)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
    pub params: String,
    pub available: bool,
    pub rendered: Option<Value>,
    pub container_id: Option<String>,
    pub has_cleanup: bool,
}

impl output::OutputFormatter for PreviewResult {
    fn format_text(&self) -> String {
        if !self.available {
            return text::info("Host has no preview renderer, use the built-in preview");
        }
        let mut lines = vec![text::success(&format!("Preview rendered for '{}'", self.params))];
        if let Some(container) = &self.container_id {
            lines.push(text::key_value("Container", container));
        }
        lines.push(text::key_value("Cleanup", &self.has_cleanup.to_string()));
        if let Some(rendered) = &self.rendered {
            lines.push(text::block(&canonical_content(rendered)));
        }
        lines.join("\n")
    }

    fn format_json(&self, pretty: bool) -> Result<String> {
        output::to_json(self, pretty)
    }
}

/// Reads an update argument: `@path` loads a file, anything else is taken
/// inline. JSON input is sent structured, other text as a plain string.
pub fn parse_schema_input(input: &str) -> Result<Value> {
    let raw = match input.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path))?,
        None => input.to_string(),
    };
    Ok(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
}

pub async fn handle_get(client: &ProtocolClient, params: &str) -> Result<SchemaResult> {
    let schema = client.get_schema(params).await?;
    Ok(SchemaResult {
        params: params.to_string(),
        schema: schema.filter(|v| !v.is_null()),
    })
}

pub async fn handle_update(
    client: &ProtocolClient,
    params: &str,
    input: &str,
) -> Result<UpdateResult> {
    let schema = parse_schema_input(input)?;
    client.update_schema(params, schema).await?;
    Ok(UpdateResult {
        params: params.to_string(),
        updated: true,
    })
}

/// Renders the current schema through the host's preview hook, reports what
/// the host received and clears the preview again.
pub async fn handle_preview(
    client: &ProtocolClient,
    params: &str,
    rendered: impl Fn() -> Option<RenderedPreview>,
) -> Result<PreviewResult> {
    if !client.check_preview().await {
        return Ok(PreviewResult {
            params: params.to_string(),
            available: false,
            rendered: None,
            container_id: None,
            has_cleanup: false,
        });
    }

    let schema = client
        .get_schema(params)
        .await?
        .ok_or_else(|| BridgeError::Remote(format!("no schema for '{}'", params)))?;
    let has_cleanup = client.render_preview(schema.clone()).await?;
    let snapshot = rendered();
    client.clear_preview().await;

    Ok(PreviewResult {
        params: params.to_string(),
        available: true,
        rendered: Some(snapshot.as_ref().map_or(schema, |p| p.data.clone())),
        container_id: snapshot.map(|p| p.container_id),
        has_cleanup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommunicationMode, Config};
    use crate::handlers::DemoPage;
    use crate::host::SchemaStore;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_schema_input() {
        assert_eq!(parse_schema_input(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(parse_schema_input("plain text").unwrap(), json!("plain text"));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let arg = format!("@{}", path.display());
        assert_eq!(parse_schema_input(&arg).unwrap(), json!([1, 2]));
        assert!(parse_schema_input("@/definitely/not/here.json").is_err());
    }

    #[tokio::test]
    async fn test_get_and_update_through_demo_page() {
        let dir = TempDir::new().unwrap();
        let page = DemoPage::open(&Config::default(), &dir.path().join("store.json"));

        let empty = handle_get(&page.client, "p").await.unwrap();
        assert!(empty.schema.is_none());

        handle_update(&page.client, "p", r#"{"title": "x"}"#).await.unwrap();
        let result = handle_get(&page.client, "p").await.unwrap();
        assert_eq!(result.schema, Some(json!({"title": "x"})));
    }

    #[tokio::test]
    async fn test_legacy_mode_get_of_missing_key_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.api.communication_mode = CommunicationMode::WindowFunction;
        let page = DemoPage::open(&config, &dir.path().join("store.json"));

        assert!(handle_get(&page.client, "p").await.unwrap().schema.is_none());
    }

    #[tokio::test]
    async fn test_preview_reports_rendered_data() {
        let dir = TempDir::new().unwrap();
        let page = DemoPage::open(&Config::default(), &dir.path().join("store.json"));
        page.host.save("p", json!({"k": "v"})).unwrap();

        let host = page.host.clone();
        let result = handle_preview(&page.client, "p", move || host.rendered_preview())
            .await
            .unwrap();
        assert!(result.available);
        assert!(result.has_cleanup);
        assert_eq!(result.rendered, Some(json!({"k": "v"})));
        assert_eq!(
            result.container_id.as_deref(),
            Some(crate::bridge::PREVIEW_CONTAINER_ID)
        );
        assert!(page.host.rendered_preview().is_none());
    }
}
