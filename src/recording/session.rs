use super::snapshot::{Snapshot, SnapshotLog, StopReason, canonical_content};
use crate::{BridgeError, Result};
use crate::bridge::{Operation, ProtocolClient, PushMessage, Subscription};
use crate::config::{DataFetchMode, RecordingConfig};
use crate::timeouts::ms;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOptions {
    pub params: String,
    pub data_fetch_mode: DataFetchMode,
    pub polling_interval: Duration,
    /// Idle time after which the session stops itself. `None` or zero disables it.
    pub auto_stop_timeout: Option<Duration>,
}

impl RecordingOptions {
    pub fn from_config(params: impl Into<String>, config: &RecordingConfig) -> Self {
        Self {
            params: params.into(),
            data_fetch_mode: config.data_fetch_mode,
            polling_interval: Duration::from_millis(config.polling_interval_ms),
            auto_stop_timeout: config.auto_stop_timeout.map(Duration::from_secs),
        }
    }

    fn is_event_driven(&self) -> bool {
        self.data_fetch_mode == DataFetchMode::EventDriven
    }

    fn auto_stop(&self) -> Option<Duration> {
        self.auto_stop_timeout.filter(|t| !t.is_zero())
    }
}

type SchemaChangeFn = Arc<dyn Fn(&str) + Send + Sync>;
type AutoStopFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_schema_change: Option<SchemaChangeFn>,
    on_auto_stop: Option<AutoStopFn>,
}

struct SessionState {
    recording: bool,
    /// Bumped on every start; background tasks carry the value they were
    /// started with and bail out once it no longer matches.
    generation: u64,
    started_at: Instant,
    last_change: Instant,
    log: SnapshotLog,
    push: Option<Subscription>,
    poller: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    last_stop: Option<StopReason>,
}

#[derive(Default)]
struct Resources {
    push: Option<Subscription>,
    poller: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl SessionState {
    fn take_resources(&mut self) -> Resources {
        Resources {
            push: self.push.take(),
            poller: self.poller.take(),
            watchdog: self.watchdog.take(),
        }
    }
}

struct SessionInner {
    client: Arc<ProtocolClient>,
    options: RecordingOptions,
    callbacks: RwLock<Callbacks>,
    state: Mutex<SessionState>,
}

impl SessionInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state();
        state.recording && state.generation == generation
    }

    fn notify_schema_change(&self, content: &str) {
        let callback = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .on_schema_change
            .clone();
        if let Some(callback) = callback {
            callback(content);
        }
    }

    fn handle_push(&self, generation: u64, push: PushMessage) {
        if let Some(params) = push.params.as_deref()
            && params != self.options.params
        {
            tracing::debug!("ignoring push for other params: {}", params);
            return;
        }
        if !push.success {
            return;
        }
        if let Some(data) = push.data {
            self.accept(generation, data);
        }
    }

    /// Shared acceptance path for pushes and poll results.
    fn accept(&self, generation: u64, data: Value) {
        if data.is_null() {
            return;
        }
        let content = canonical_content(&data);

        let snapshot = {
            let mut state = self.state();
            if !state.recording || state.generation != generation {
                return;
            }
            let timestamp = state.started_at.elapsed().as_millis() as u64;
            let Some(snapshot) = state.log.accept(content, timestamp) else {
                return;
            };
            state.last_change = Instant::now();
            snapshot
        };

        tracing::debug!("snapshot {} at {}ms", snapshot.id, snapshot.timestamp);
        self.notify_schema_change(&snapshot.content);
    }

    /// Returns false when the session was not recording.
    async fn stop(&self, reason: StopReason) -> bool {
        let resources = {
            let mut state = self.state();
            if !state.recording {
                return false;
            }
            state.recording = false;
            state.last_stop = Some(reason);
            state.take_resources()
        };

        drop(resources.push);
        if let Some(poller) = resources.poller {
            poller.abort();
        }
        // On auto-stop the watchdog is the task running this code.
        if let Some(watchdog) = resources.watchdog
            && reason != StopReason::AutoStop
        {
            watchdog.abort();
        }

        if self.options.is_event_driven()
            && let Err(e) = self.client.stop_recording(&self.options.params).await
        {
            tracing::warn!("failed to notify host that recording stopped: {}", e);
        }

        tracing::debug!("recording of {} stopped ({})", self.options.params, reason);

        if reason == StopReason::AutoStop {
            let callback = self
                .callbacks
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .on_auto_stop
                .clone();
            if let Some(callback) = callback {
                callback();
            }
        }
        true
    }
}

/// Records successive versions of one element's schema, either from host
/// pushes or by polling `GET_SCHEMA`.
///
/// Dropping a session while it records tears it down: timers and the push
/// listener are released and, in event-driven mode, the host is told to
/// stop on a best-effort basis.
pub struct RecordingSession {
    inner: Arc<SessionInner>,
}

impl RecordingSession {
    pub fn new(client: Arc<ProtocolClient>, options: RecordingOptions) -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(SessionInner {
                client,
                options,
                callbacks: RwLock::new(Callbacks::default()),
                state: Mutex::new(SessionState {
                    recording: false,
                    generation: 0,
                    started_at: now,
                    last_change: now,
                    log: SnapshotLog::default(),
                    push: None,
                    poller: None,
                    watchdog: None,
                    last_stop: None,
                }),
            }),
        }
    }

    pub fn on_schema_change(self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .on_schema_change = Some(Arc::new(f));
        self
    }

    pub fn on_auto_stop(self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .on_auto_stop = Some(Arc::new(f));
        self
    }

    pub fn options(&self) -> &RecordingOptions {
        &self.inner.options
    }

    /// Starts recording. A second call while recording does nothing. In
    /// event-driven mode a rejected `START_RECORDING` reverts to idle and is
    /// returned.
    pub async fn start(&self) -> Result<()> {
        if !self.inner.options.is_event_driven() && self.inner.options.polling_interval.is_zero() {
            return Err(BridgeError::Recording(
                "polling interval must be greater than 0".into(),
            ));
        }

        let generation = {
            let mut state = self.inner.state();
            if state.recording {
                return Ok(());
            }
            let now = Instant::now();
            state.generation += 1;
            state.log.clear();
            state.started_at = now;
            state.last_change = now;
            state.recording = true;
            state.last_stop = None;
            state.generation
        };

        let options = &self.inner.options;
        tracing::debug!(
            "recording {} ({}, generation {})",
            options.params,
            options.data_fetch_mode,
            generation
        );

        if options.is_event_driven() {
            // Listen before asking the host to start so no early push is lost.
            let weak = Arc::downgrade(&self.inner);
            let subscription = self.inner.client.listen_push(move |push| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_push(generation, push);
                }
            });
            self.keep(
                generation,
                Resources {
                    push: Some(subscription),
                    ..Resources::default()
                },
            );

            if let Err(e) = self.inner.client.start_recording(&options.params).await {
                let push = {
                    let mut state = self.inner.state();
                    if state.recording && state.generation == generation {
                        state.recording = false;
                        state.push.take()
                    } else {
                        None
                    }
                };
                drop(push);
                tracing::warn!("host refused to start recording: {}", e);
                return Err(e);
            }
        } else {
            let poller = tokio::spawn(poll(
                Arc::downgrade(&self.inner),
                generation,
                options.polling_interval,
            ));
            self.keep(
                generation,
                Resources {
                    poller: Some(poller),
                    ..Resources::default()
                },
            );
        }

        if let Some(timeout) = options.auto_stop() {
            let watchdog = tokio::spawn(watch_idle(Arc::downgrade(&self.inner), generation, timeout));
            self.keep(
                generation,
                Resources {
                    watchdog: Some(watchdog),
                    ..Resources::default()
                },
            );
        }

        Ok(())
    }

    /// Hands a started resource to the session. If a stop or restart raced
    /// the start, the resource is released instead.
    fn keep(&self, generation: u64, resources: Resources) {
        let stale = {
            let mut state = self.inner.state();
            if state.recording && state.generation == generation {
                if resources.push.is_some() {
                    state.push = resources.push;
                }
                if resources.poller.is_some() {
                    state.poller = resources.poller;
                }
                if resources.watchdog.is_some() {
                    state.watchdog = resources.watchdog;
                }
                return;
            }
            resources
        };
        release(stale);
    }

    pub async fn stop(&self) {
        self.inner.stop(StopReason::Manual).await;
    }

    /// Selects a snapshot and replays its content through the schema-change
    /// callback. Returns false for an unknown id.
    pub fn select_snapshot(&self, id: u64) -> bool {
        let content = {
            let mut state = self.inner.state();
            match state.log.select(id) {
                Some(snapshot) => snapshot.content.clone(),
                None => return false,
            }
        };
        self.inner.notify_schema_change(&content);
        true
    }

    pub fn clear_snapshots(&self) {
        self.inner.state().log.clear();
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.inner.state().log.snapshots().to_vec()
    }

    pub fn selected_snapshot_id(&self) -> Option<u64> {
        self.inner.state().log.selected()
    }

    pub fn is_recording(&self) -> bool {
        self.inner.state().recording
    }

    pub fn last_stop_reason(&self) -> Option<StopReason> {
        self.inner.state().last_stop
    }
}

fn release(resources: Resources) {
    drop(resources.push);
    if let Some(poller) = resources.poller {
        poller.abort();
    }
    if let Some(watchdog) = resources.watchdog {
        watchdog.abort();
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        let (resources, was_recording) = {
            let mut state = self.inner.state();
            let was_recording = state.recording;
            if was_recording {
                state.recording = false;
                state.last_stop = Some(StopReason::Teardown);
            }
            (state.take_resources(), was_recording)
        };
        release(resources);

        if !was_recording || !self.inner.options.is_event_driven() {
            return;
        }

        let client = self.inner.client.clone();
        let params = self.inner.options.params.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.stop_recording(&params).await {
                        tracing::warn!("stop notification at teardown failed: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("no runtime to notify host that {} stopped", params),
        }
    }
}

async fn poll(session: Weak<SessionInner>, generation: u64, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(inner) = session.upgrade() else {
            break;
        };
        if !inner.is_current(generation) {
            break;
        }
        let client = inner.client.clone();
        let params = inner.options.params.clone();
        drop(inner);

        match client.request(Operation::GetSchema { params }).await {
            Ok(response) if response.is_success() => {
                if let (Some(data), Some(inner)) = (response.data, session.upgrade()) {
                    inner.accept(generation, data);
                }
            }
            Ok(response) => tracing::debug!(
                "poll skipped, host reported: {}",
                response.error.as_deref().unwrap_or("failure")
            ),
            Err(e) => tracing::warn!("poll failed: {}", e),
        }
    }
}

async fn watch_idle(session: Weak<SessionInner>, generation: u64, timeout: Duration) {
    let mut ticker = tokio::time::interval(Duration::from_millis(ms::WATCHDOG_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(inner) = session.upgrade() else {
            break;
        };
        let idle = {
            let state = inner.state();
            if !state.recording || state.generation != generation {
                break;
            }
            state.last_change.elapsed()
        };

        if idle >= timeout {
            tracing::debug!("no change for {:?}, stopping", idle);
            inner.stop(StopReason::AutoStop).await;
            break;
        }
    }
}
