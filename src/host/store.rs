use super::{SchemaHost, SchemaPusher, SchemaStore};
use crate::timeouts::ms;
use crate::{BridgeError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPreview {
    pub container_id: String,
    pub data: Value,
}

/// A host whose schemas live in a JSON object file (`params -> schema`).
///
/// While the extension records a params key, the file is re-read on a short
/// interval and every change to that key is pushed.
pub struct FileStoreHost {
    path: PathBuf,
    read_only: bool,
    /// Held across each read-modify-write of the file.
    write_lock: Arc<Mutex<()>>,
    pusher: Mutex<Option<SchemaPusher>>,
    watchers: Mutex<HashMap<String, JoinHandle<()>>>,
    preview: Mutex<Option<RenderedPreview>>,
}

impl FileStoreHost {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
            write_lock: Arc::new(Mutex::new(())),
            pusher: Mutex::new(None),
            watchers: Mutex::new(HashMap::new()),
            preview: Mutex::new(None),
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rendered_preview(&self) -> Option<RenderedPreview> {
        self.preview
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn watched_params(&self) -> Vec<String> {
        let mut params: Vec<String> = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        params.sort();
        params
    }

    fn read_all(path: &Path) -> Result<Map<String, Value>> {
        if !path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(BridgeError::General(format!(
                "{} must contain a JSON object",
                path.display()
            ))),
        }
    }

    fn write_all(path: &Path, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(map)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn load_from(path: &Path, params: &str) -> Result<Option<Value>> {
        Ok(Self::read_all(path)?.get(params).cloned())
    }

    fn save_to(path: &Path, write_lock: &Mutex<()>, params: &str, schema: Value) -> Result<bool> {
        let _guard = write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = Self::read_all(path)?;
        map.insert(params.to_string(), schema);
        Self::write_all(path, &map)?;
        Ok(true)
    }
}

/// Runs file work on the blocking pool so the runtime keeps serving the bus.
async fn off_runtime<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BridgeError::General(format!("store task failed: {}", e)))?
}

impl SchemaStore for FileStoreHost {
    fn load(&self, params: &str) -> Result<Option<Value>> {
        Self::load_from(&self.path, params)
    }

    fn save(&self, params: &str, schema: Value) -> Result<bool> {
        if self.read_only {
            return Err(BridgeError::Remote("store is read-only".into()));
        }
        Self::save_to(&self.path, &self.write_lock, params, schema)
    }
}

#[async_trait]
impl SchemaHost for FileStoreHost {
    async fn get_schema(&self, params: &str) -> Result<Option<Value>> {
        let path = self.path.clone();
        let params = params.to_string();
        off_runtime(move || Self::load_from(&path, &params)).await
    }

    async fn update_schema(&self, schema: Value, params: &str) -> Result<bool> {
        if self.read_only {
            return Err(BridgeError::Remote("store is read-only".into()));
        }
        let path = self.path.clone();
        let write_lock = self.write_lock.clone();
        let params = params.to_string();
        off_runtime(move || Self::save_to(&path, &write_lock, &params, schema)).await
    }

    fn supports_preview(&self) -> bool {
        true
    }

    async fn render_preview(&self, data: Value, container_id: &str) -> Result<bool> {
        *self.preview.lock().unwrap_or_else(PoisonError::into_inner) = Some(RenderedPreview {
            container_id: container_id.to_string(),
            data,
        });
        Ok(true)
    }

    async fn cleanup_preview(&self, _container_id: &str) -> Result<()> {
        self.preview
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    async fn start_recording(&self, params: &str) -> Result<()> {
        let Some(pusher) = self
            .pusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return Err(BridgeError::Recording("store is not attached to a bridge".into()));
        };

        let watcher = tokio::spawn(watch(self.path.clone(), params.to_string(), pusher));
        let previous = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(params.to_string(), watcher);
        if let Some(previous) = previous {
            previous.abort();
        }
        tracing::debug!("watching {} for {}", self.path.display(), params);
        Ok(())
    }

    async fn stop_recording(&self, params: &str) -> Result<()> {
        let watcher = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(params);
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        Ok(())
    }

    fn attached(&self, pusher: SchemaPusher) {
        *self.pusher.lock().unwrap_or_else(PoisonError::into_inner) = Some(pusher);
    }
}

impl Drop for FileStoreHost {
    fn drop(&mut self) {
        let watchers = self
            .watchers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, watcher) in watchers.drain() {
            watcher.abort();
        }
    }
}

/// Pushes the current value once, then again whenever it changes.
async fn watch(path: PathBuf, params: String, pusher: SchemaPusher) {
    let mut ticker = tokio::time::interval(Duration::from_millis(ms::STORE_WATCH_INTERVAL));
    let mut last: Option<Value> = None;

    loop {
        ticker.tick().await;
        let file = path.clone();
        let key = params.clone();
        let current = match off_runtime(move || FileStoreHost::load_from(&file, &key)).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("failed to read {}: {}", path.display(), e);
                continue;
            }
        };
        if current.is_some() && current != last {
            if let Some(value) = current.clone() {
                pusher.push(&params, value);
            }
            last = current;
        }
    }
}
