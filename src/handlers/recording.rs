use crate::{
    Result,
    bridge::ProtocolClient,
    config::DataFetchMode,
    output::{self, TableBuilder, text},
    recording::{RecordingOptions, RecordingSession, Snapshot, StopReason},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResult {
    pub id: Uuid,
    pub params: String,
    pub mode: DataFetchMode,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stop_reason: StopReason,
    pub snapshots: Vec<Snapshot>,
}

impl output::OutputFormatter for RecordResult {
    fn format_text(&self) -> String {
        let mut output = format!(
            "{}\n{}\n{}\n{}\n{}",
            text::success(&format!("Recording finished for '{}'", self.params)),
            text::key_value("Mode", &self.mode.to_string()),
            text::key_value("Started", &self.started_at.to_rfc3339()),
            text::key_value("Duration", &text::format_duration_ms(self.duration_ms)),
            text::key_value("Stopped By", &self.stop_reason.to_string()),
        );

        output.push_str(&text::section(&format!("Snapshots ({})", self.snapshots.len())));
        if self.snapshots.is_empty() {
            output.push_str(&format!("\n{}", text::bullet("no changes captured")));
            return output;
        }

        let mut table = TableBuilder::new().headers(vec![
            "Id".to_string(),
            "At".to_string(),
            "Content".to_string(),
        ]);
        for snapshot in &self.snapshots {
            let first_line = snapshot.content.lines().next().unwrap_or_default();
            table = table.row(vec![
                snapshot.id.to_string(),
                text::format_duration_ms(snapshot.timestamp),
                text::truncate(first_line, 48),
            ]);
        }
        output.push('\n');
        output.push_str(table.build().trim_end());
        output
    }

    fn format_json(&self, pretty: bool) -> Result<String> {
        output::to_json(self, pretty)
    }
}

/// Records `options.params` until `duration` elapses, Ctrl-C is pressed or
/// the session stops itself after going idle.
pub async fn handle_record(
    client: Arc<ProtocolClient>,
    options: RecordingOptions,
    duration: Duration,
) -> Result<RecordResult> {
    let idle = Arc::new(Notify::new());
    let on_idle = idle.clone();
    let params = options.params.clone();
    let mode = options.data_fetch_mode;

    let session = RecordingSession::new(client, options)
        .on_schema_change(|content| {
            tracing::info!("schema changed ({} bytes)", content.len());
        })
        .on_auto_stop(move || on_idle.notify_one());

    let id = Uuid::new_v4();
    let started_at = Utc::now();
    let started = Instant::now();
    tracing::debug!("recording {} started for {}", id, params);
    session.start().await?;

    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = idle.notified() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping recording");
        }
    }
    session.stop().await;

    Ok(RecordResult {
        id,
        params,
        mode,
        started_at,
        duration_ms: started.elapsed().as_millis() as u64,
        stop_reason: session.last_stop_reason().unwrap_or(StopReason::Manual),
        snapshots: session.snapshots(),
    })
}
