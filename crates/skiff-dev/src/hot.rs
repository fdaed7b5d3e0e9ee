//! The hot-update channel between an environment and its clients.
//!
//! The container side only defines the subscription contract; the wire
//! format and transport live upstream. [`NoopHotChannel`] is the disabled
//! fallback where every operation silently succeeds, and
//! [`LocalHotChannel`] is the in-process implementation used by the
//! environment and its tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One module touched by a hot update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HotUpdate {
    pub path: String,
    pub timestamp: u64,
}

/// Payload pushed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HotPayload {
    FullReload {
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Update {
        updates: Vec<HotUpdate>,
    },
    Custom {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

/// Handler for events arriving from clients (e.g. `hmr-invalidate`).
pub type HotListener = Arc<dyn Fn(Value) + Send + Sync>;

/// Subscription contract observed by the environment.
pub trait HotChannel: Send + Sync {
    /// Push a payload toward connected clients.
    fn send(&self, payload: HotPayload);

    /// Subscribe to a client-originated event by name.
    fn on(&self, event: &str, listener: HotListener);

    /// Deliver a client-originated event to subscribers. Transports call
    /// this when a message arrives off the wire.
    fn emit(&self, event: &str, data: Value);

    fn close(&self);
}

/// Disabled channel: all operations succeed and do nothing.
#[derive(Debug, Default)]
pub struct NoopHotChannel;

impl HotChannel for NoopHotChannel {
    fn send(&self, _payload: HotPayload) {}
    fn on(&self, _event: &str, _listener: HotListener) {}
    fn emit(&self, _event: &str, _data: Value) {}
    fn close(&self) {}
}

/// In-process channel with a listener registry and a buffer of sent
/// payloads for transports (and tests) to drain.
#[derive(Default)]
pub struct LocalHotChannel {
    listeners: RwLock<FxHashMap<String, Vec<HotListener>>>,
    sent: Mutex<Vec<HotPayload>>,
    closed: AtomicBool,
}

impl LocalHotChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything sent since the last call.
    pub fn take_sent(&self) -> Vec<HotPayload> {
        std::mem::take(&mut self.sent.lock())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl HotChannel for LocalHotChannel {
    fn send(&self, payload: HotPayload) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.sent.lock().push(payload);
    }

    fn on(&self, event: &str, listener: HotListener) {
        self.listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push(listener);
    }

    fn emit(&self, event: &str, data: Value) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let listeners = self
            .listeners
            .read()
            .get(event)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener(data.clone());
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
