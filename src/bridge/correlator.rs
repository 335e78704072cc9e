use super::message::{RequestMessage, ResponseMessage};
use super::transport::{Endpoint, Subscription, Transport};
use crate::{BridgeError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseMessage>>>>;

/// Process-wide, so correlators sharing a response channel never hand out
/// the same id.
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatorConfig {
    pub request_channel: String,
    pub response_channel: String,
    pub local_source: String,
    pub remote_source: String,
}

struct ResponseListener {
    channel: String,
    remote_source: String,
    _subscription: Subscription,
}

/// Turns the fire-and-forget transport into request/response calls.
///
/// Every call gets a `req-<n>` id and a oneshot slot in the pending map. A
/// single response listener, installed on first use, settles slots by id.
/// Whichever of response or deadline comes first removes the entry, so a
/// call settles exactly once and late replies find nothing to settle.
pub struct RequestCorrelator {
    transport: Arc<dyn Transport>,
    config: Mutex<CorrelatorConfig>,
    pending: PendingMap,
    listener: Mutex<Option<ResponseListener>>,
}

/// Removes the tracking entry however the call ends, including when the
/// caller drops the future.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.request_id);
    }
}

impl RequestCorrelator {
    pub fn new(transport: Arc<dyn Transport>, config: CorrelatorConfig) -> Self {
        Self {
            transport,
            config: Mutex::new(config),
            pending: Arc::new(Mutex::new(HashMap::new())),
            listener: Mutex::new(None),
        }
    }

    /// Applies new channel/source settings. The response listener is swapped
    /// on the next call if its channel or expected source changed.
    pub fn configure(&self, config: CorrelatorConfig) {
        let mut current = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != config {
            tracing::debug!(
                "correlator reconfigured: {} -> {}",
                current.request_channel,
                config.request_channel
            );
            *current = config;
        }
    }

    pub fn config(&self) -> CorrelatorConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn listener_channel(&self) -> Option<String> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.channel.clone())
    }

    fn next_request_id(&self) -> String {
        format!("req-{}", REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    fn ensure_listener(&self, config: &CorrelatorConfig) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = listener.as_ref()
            && current.channel == config.response_channel
            && current.remote_source == config.remote_source
        {
            return;
        }

        // Dropping the old listener unsubscribes it before the new one exists.
        *listener = None;

        let endpoint = Endpoint::new(
            self.transport.clone(),
            config.local_source.clone(),
            config.remote_source.clone(),
        );
        let pending = self.pending.clone();
        let subscription = endpoint.subscribe(&config.response_channel, move |detail| {
            settle(&pending, detail);
        });

        tracing::debug!("response listener installed on {}", config.response_channel);
        *listener = Some(ResponseListener {
            channel: config.response_channel.clone(),
            remote_source: config.remote_source.clone(),
            _subscription: subscription,
        });
    }

    /// Sends `{type, payload, requestId}` and waits for the correlated reply.
    /// A deadline expiry is the only locally produced failure.
    pub async fn call(
        &self,
        kind: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<ResponseMessage> {
        let config = self.config();
        self.ensure_listener(&config);

        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id: request_id.clone(),
        };

        let request = RequestMessage {
            kind: kind.to_string(),
            payload,
            request_id: request_id.clone(),
        };
        tracing::debug!("{} {} -> {}", request_id, kind, config.request_channel);

        let endpoint = Endpoint::new(
            self.transport.clone(),
            config.local_source.clone(),
            config.remote_source.clone(),
        );
        endpoint.send(&config.request_channel, serde_json::to_value(&request)?);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                tracing::debug!("{} settled (success={})", request_id, response.is_success());
                Ok(response)
            }
            Ok(Err(_)) => Err(BridgeError::ChannelClosed),
            Err(_) => {
                tracing::debug!("{} timed out after {:?}", request_id, timeout);
                Err(BridgeError::Timeout {
                    channel: config.request_channel,
                    seconds: timeout.as_secs(),
                })
            }
        }
    }
}

fn settle(pending: &PendingMap, detail: &Value) {
    let response: ResponseMessage = match serde_json::from_value(detail.clone()) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("ignoring malformed response: {}", e);
            return;
        }
    };

    let Some(request_id) = response.request_id.clone() else {
        tracing::debug!("ignoring uncorrelated message on response channel");
        return;
    };

    let slot = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&request_id);

    match slot {
        Some(tx) => {
            if tx.send(response).is_err() {
                tracing::debug!("{} caller went away before settlement", request_id);
            }
        }
        None => tracing::debug!("ignoring late or unknown response {}", request_id),
    }
}
