use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One deduplicated version of the recorded schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: u64,
    pub content: String,
    /// Milliseconds since the recording started.
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Manual,
    AutoStop,
    Teardown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::AutoStop => write!(f, "auto-stop"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

/// Strings pass through untouched; anything else becomes two-space
/// indented JSON.
pub fn canonical_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[derive(Debug, Default)]
pub struct SnapshotLog {
    snapshots: Vec<Snapshot>,
    selected: Option<u64>,
    last_content: Option<String>,
    next_id: u64,
}

impl SnapshotLog {
    /// Appends `content` unless it repeats the last accepted one. The new
    /// snapshot becomes the selection.
    pub fn accept(&mut self, content: String, timestamp: u64) -> Option<Snapshot> {
        if self.last_content.as_deref() == Some(content.as_str()) {
            return None;
        }

        let snapshot = Snapshot {
            id: self.next_id,
            content: content.clone(),
            timestamp,
        };
        self.next_id += 1;
        self.last_content = Some(content);
        self.selected = Some(snapshot.id);
        self.snapshots.push(snapshot.clone());
        Some(snapshot)
    }

    pub fn select(&mut self, id: u64) -> Option<&Snapshot> {
        let snapshot = self.snapshots.iter().find(|s| s.id == id)?;
        self.selected = Some(id);
        Some(snapshot)
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.selected = None;
        self.last_content = None;
        self.next_id = 0;
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn selected(&self) -> Option<u64> {
        self.selected
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_content() {
        assert_eq!(canonical_content(&json!("raw")), "raw");
        assert_eq!(canonical_content(&json!({"a": 1})), "{\n  \"a\": 1\n}");
        assert_eq!(canonical_content(&json!(42)), "42");
    }

    #[test]
    fn test_consecutive_duplicates_collapse() {
        let mut log = SnapshotLog::default();
        assert!(log.accept("A".into(), 0).is_some());
        assert!(log.accept("A".into(), 10).is_none());
        assert!(log.accept("B".into(), 20).is_some());
        // Only consecutive repeats are dropped.
        assert!(log.accept("A".into(), 30).is_some());

        let ids: Vec<u64> = log.snapshots().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(log.selected(), Some(2));
    }

    #[test]
    fn test_select_unknown_keeps_selection() {
        let mut log = SnapshotLog::default();
        log.accept("A".into(), 0);
        log.accept("B".into(), 5);

        assert_eq!(log.select(0).map(|s| s.content.as_str()), Some("A"));
        assert!(log.select(9).is_none());
        assert_eq!(log.selected(), Some(0));
    }

    #[test]
    fn test_clear_resets_ids_and_dedup() {
        let mut log = SnapshotLog::default();
        log.accept("A".into(), 0);
        log.accept("B".into(), 1);
        log.clear();

        assert!(log.is_empty());
        assert_eq!(log.selected(), None);
        let again = log.accept("B".into(), 2).unwrap();
        assert_eq!(again.id, 0);
    }
}
