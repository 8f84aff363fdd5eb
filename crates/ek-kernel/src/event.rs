// SPDX-License-Identifier: Apache-2.0
//! The event object passed to every listener during a single emission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// One emission's payload: name, immutable data, a mutable shared context,
/// and a stop-propagation flag.
///
/// An `Event` is created fresh for every call to [`crate::Kernel::emit`] or
/// [`crate::Kernel::emit_serial`] and is never reused across emissions.
/// Cloning an `Event` shares the same underlying context and stop flag —
/// every listener invoked for one emission, and every composite consumer
/// downstream of it, observes the same mutable state.
#[derive(Clone, Debug)]
pub struct Event {
    name: Arc<str>,
    data: Arc<Value>,
    context: Arc<Mutex<HashMap<String, Value>>>,
    timestamp_ms: u64,
    stopped: Arc<AtomicBool>,
}

impl Event {
    /// Creates a fresh event with an empty context and the current time.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, data: Value) -> Self {
        Self {
            name: name.into(),
            data: Arc::new(data),
            context: Arc::new(Mutex::new(HashMap::new())),
            timestamp_ms: now_ms(),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds an event whose context is pre-seeded, used by the composition
    /// engine to carry forward a per-source context snapshot.
    #[must_use]
    pub fn with_context(name: impl Into<Arc<str>>, data: Value, context: HashMap<String, Value>) -> Self {
        let event = Self::new(name, data);
        if let Ok(mut guard) = event.context.lock() {
            *guard = context;
        }
        event
    }

    /// The concrete event name this instance was emitted under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The payload attached at emission. Immutable by convention: listeners
    /// that want to pass derived data forward use the context instead.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Milliseconds since the Unix epoch when this event was created.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Reads one key out of the shared context.
    #[must_use]
    pub fn context_get(&self, key: &str) -> Option<Value> {
        self.context
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Writes one key into the shared context, visible to every listener
    /// scheduled after this call within the same emission.
    pub fn context_set(&self, key: impl Into<String>, value: Value) {
        self.context
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.into(), value);
    }

    /// A point-in-time copy of the full context, used by the composition
    /// engine to capture a source's contribution at buffering time.
    #[must_use]
    pub fn context_snapshot(&self) -> HashMap<String, Value> {
        self.context
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Whether a listener has already requested propagation stop.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
