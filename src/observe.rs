//! Abstract observability sink.
//!
//! The runtime pushes structured events at fixed points of a request's
//! life; what happens to them (metrics, traces, logs, nothing) is the
//! embedder's business. The default sink is a no-op; [`TracingSink`]
//! bridges events onto `tracing` for quick setups.
//!
//! Secrets are redacted before an event leaves the runtime: attribute
//! values under key names that smell like credentials never carry the raw
//! value.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;

/// Emission severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured observability event.
#[derive(Debug, Clone)]
pub struct SinkEvent {
    pub ts: SystemTime,
    pub level: SinkLevel,
    pub name: &'static str,
    pub attributes: BTreeMap<String, Value>,
}

impl SinkEvent {
    pub fn new(name: &'static str) -> Self {
        Self {
            ts: SystemTime::now(),
            level: SinkLevel::Info,
            name,
            attributes: BTreeMap::new(),
        }
    }

    pub fn level(mut self, level: SinkLevel) -> Self {
        self.level = level;
        self
    }

    /// Attach an attribute, redacting credential-shaped keys.
    pub fn attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let value = if is_sensitive_key(key) { redacted(&value) } else { value };
        self.attributes.insert(key.to_string(), value);
        self
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    k.contains("api_key")
        || k.contains("apikey")
        || k.contains("authorization")
        || k.contains("token")
        || k.contains("secret")
        || k.contains("password")
}

fn redacted(value: &Value) -> Value {
    match value {
        Value::String(s) if s.len() > 8 => {
            Value::String(format!("{}…(redacted)", &s[..4.min(s.len())]))
        }
        Value::String(_) => Value::String("(redacted)".to_string()),
        other => other.clone(),
    }
}

/// Destination for runtime events. Implementations must be cheap and
/// non-blocking; the executor calls `emit` on the hot path.
pub trait ObservabilitySink: Send + Sync {
    fn emit(&self, event: SinkEvent);
}

/// Discards everything.
pub struct NoopSink;

impl ObservabilitySink for NoopSink {
    fn emit(&self, _event: SinkEvent) {}
}

/// Bridges events onto `tracing`.
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn emit(&self, event: SinkEvent) {
        let attrs = serde_json::to_string(&event.attributes).unwrap_or_default();
        info!(event = event.name, attrs = attrs.as_str(), "observability event");
    }
}

/// Shared sink handle used throughout the executor.
pub type SharedSink = Arc<dyn ObservabilitySink>;

pub fn noop_sink() -> SharedSink {
    Arc::new(NoopSink)
}

/// In-memory sink for tests.
pub struct MemorySink {
    events: std::sync::Mutex<Vec<SinkEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .expect("memory sink lock")
            .iter()
            .map(|e| e.name)
            .collect()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().expect("memory sink lock").clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservabilitySink for MemorySink {
    fn emit(&self, event: SinkEvent) {
        self.events.lock().expect("memory sink lock").push(event);
    }
}
