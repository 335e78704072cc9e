mod session;
mod snapshot;

pub use session::{RecordingOptions, RecordingSession};
pub use snapshot::{Snapshot, SnapshotLog, StopReason, canonical_content};
