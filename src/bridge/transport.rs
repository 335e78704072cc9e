use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// A message as it travels on the page bus: the sender's source tag plus
/// the event detail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub source: String,
    pub detail: Value,
}

pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Same-window, fire-and-forget signalling between execution contexts.
pub trait Transport: Send + Sync {
    fn send(&self, channel: &str, envelope: Envelope);

    /// Registers `handler` for messages on `channel` tagged with
    /// `expected_source`.
    fn subscribe(&self, channel: &str, expected_source: &str, handler: Handler) -> Subscription;
}

/// Keeps a listener registered until dropped or unsubscribed.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Global function exposed by the host page to the legacy relay. An `Err`
/// stands for a thrown exception.
pub type GlobalFunction =
    Arc<dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync>;

/// The page's `window[...]` function table.
#[derive(Default)]
pub struct PageGlobals {
    functions: Mutex<HashMap<String, GlobalFunction>>,
}

impl PageGlobals {
    pub fn define(
        &self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    ) {
        self.functions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(f));
    }

    pub fn remove(&self, name: &str) -> bool {
        self.functions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<GlobalFunction> {
        self.functions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

struct Listener {
    id: u64,
    channel: String,
    expected_source: String,
    handler: Handler,
}

/// In-process page bus. Dispatch is synchronous and in registration order;
/// handlers run without the listener lock so they may send in turn.
pub struct PageWindow {
    me: Weak<PageWindow>,
    listeners: Mutex<Vec<Listener>>,
    next_listener_id: AtomicU64,
    globals: PageGlobals,
    relay_injected: AtomicBool,
    /// Listeners owned by scripts injected into the page. They live as long
    /// as the page does.
    page_scripts: Mutex<Vec<Subscription>>,
}

impl PageWindow {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            globals: PageGlobals::default(),
            relay_injected: AtomicBool::new(false),
            page_scripts: Mutex::new(Vec::new()),
        })
    }

    pub fn globals(&self) -> &PageGlobals {
        &self.globals
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|l| l.channel == channel)
            .count()
    }

    /// Sets the page-wide "relay injected" marker. Returns false if it was
    /// already set.
    pub(crate) fn mark_relay_injected(&self) -> bool {
        !self.relay_injected.swap(true, Ordering::SeqCst)
    }

    pub fn relay_injected(&self) -> bool {
        self.relay_injected.load(Ordering::SeqCst)
    }

    pub(crate) fn retain_script(&self, subscription: Subscription) {
        self.page_scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription);
    }

    pub(crate) fn handle(&self) -> Option<Arc<PageWindow>> {
        self.me.upgrade()
    }

    fn remove_listener(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| l.id != id);
    }
}

impl Transport for PageWindow {
    fn send(&self, channel: &str, envelope: Envelope) {
        let targets: Vec<Handler> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|l| l.channel == channel && l.expected_source == envelope.source)
            .map(|l| l.handler.clone())
            .collect();

        tracing::trace!(
            "dispatch {} from {} to {} listener(s)",
            channel,
            envelope.source,
            targets.len()
        );

        for handler in targets {
            handler(&envelope);
        }
    }

    fn subscribe(&self, channel: &str, expected_source: &str, handler: Handler) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener {
                id,
                channel: channel.to_string(),
                expected_source: expected_source.to_string(),
                handler,
            });

        let me = self.me.clone();
        Subscription::new(move || {
            if let Some(window) = me.upgrade() {
                window.remove_listener(id);
            }
        })
    }
}

/// A transport bound to one side of a conversation. Outgoing messages carry
/// `local`; incoming ones are accepted only from `remote`, and echoes of our
/// own tag are dropped.
#[derive(Clone)]
pub struct Endpoint {
    transport: Arc<dyn Transport>,
    local: String,
    remote: String,
}

impl Endpoint {
    pub fn new(
        transport: Arc<dyn Transport>,
        local: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            local: local.into(),
            remote: remote.into(),
        }
    }

    pub fn send(&self, channel: &str, detail: Value) {
        self.transport.send(
            channel,
            Envelope {
                source: self.local.clone(),
                detail,
            },
        );
    }

    pub fn subscribe(
        &self,
        channel: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let local = self.local.clone();
        let remote = self.remote.clone();
        self.transport.subscribe(
            channel,
            &self.remote,
            Arc::new(move |envelope: &Envelope| {
                if envelope.source == local || envelope.source != remote {
                    return;
                }
                handler(&envelope.detail);
            }),
        )
    }
}
