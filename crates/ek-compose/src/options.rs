// SPDX-License-Identifier: Apache-2.0
//! Configuration, TTL policy, and merge strategy for [`crate::Composition`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

/// Default per-source buffer size when [`ComposeOptions::buffer_limit`] is
/// not overridden.
pub const DEFAULT_BUFFER_LIMIT: usize = 100;

/// How long a buffered entry from one source stays eligible to take part
/// in a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Expires `ms` milliseconds after it was buffered.
    Millis(u64),
    /// Never expires; only capacity eviction removes it.
    Permanent,
    /// Eligible only for the completion check run at the moment it
    /// arrives; dropped immediately afterward whether or not the
    /// composition fired.
    Instant,
}

/// One key written by more than one source under [`MergeStrategy::Override`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The context key every listed source wrote.
    pub key: String,
    /// Sources that wrote `key`, in join order; the last entry won.
    pub sources: Vec<String>,
    /// The value each corresponding source in `sources` wrote.
    pub values: Vec<Value>,
}

/// How each source's context is folded into the composite event's context.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Every key is prefixed `{source}{delimiter}{key}`; keys can never
    /// collide across sources.
    Namespace,
    /// Keys are merged flat; a key written by more than one source keeps
    /// the last writer's value and is recorded as a [`Conflict`].
    Override,
}

/// Runtime configuration for a [`crate::Composition`].
///
/// `event_ttl` and `event_ttls` are held behind a [`Mutex`] rather than by
/// plain value: [`ComposeOptions::set_event_ttl`] and friends let a caller
/// change TTL policy on a live composition, and every subsequent arrival
/// reads the current value through [`ComposeOptions::ttl_for`]. Because of
/// this interior mutability, `ComposeOptions` does not implement `Clone`;
/// build one value per composition and share it, rather than cloning it.
pub struct ComposeOptions {
    /// How per-source contexts are folded together on a join.
    pub merger: MergeStrategy,
    /// Delimiter used by [`MergeStrategy::Namespace`]. Defaults to `:`.
    pub delimiter: char,
    /// Maximum buffered entries retained per source; oldest is evicted
    /// first. Defaults to [`DEFAULT_BUFFER_LIMIT`].
    pub buffer_limit: usize,
    /// When true (the default), a successful join truncates every
    /// source's buffer down to the single entry it just contributed,
    /// instead of leaving prior entries to participate again.
    pub reset: bool,
    /// TTL applied to sources with no entry in `event_ttls`. Defaults to
    /// [`Ttl::Permanent`]. Mutable at runtime through
    /// [`ComposeOptions::set_event_ttl`].
    pub event_ttl: Mutex<Ttl>,
    /// Per-source TTL overrides, keyed by source event name. Mutable at
    /// runtime through [`ComposeOptions::set_event_ttl_for`] and
    /// [`ComposeOptions::clear_event_ttl_for`].
    pub event_ttls: Mutex<HashMap<String, Ttl>>,
    /// Invoked once per recorded conflict when `merger` is
    /// [`MergeStrategy::Override`].
    pub on_conflict: Option<Arc<dyn Fn(&Conflict) + Send + Sync>>,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            merger: MergeStrategy::Namespace,
            delimiter: ':',
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            reset: true,
            event_ttl: Mutex::new(Ttl::Permanent),
            event_ttls: Mutex::new(HashMap::new()),
            on_conflict: None,
        }
    }
}

impl ComposeOptions {
    pub(crate) fn ttl_for(&self, source: &str) -> Ttl {
        let overrides = self.event_ttls.lock().unwrap_or_else(PoisonError::into_inner);
        overrides.get(source).copied().unwrap_or_else(|| self.get_event_ttl())
    }

    /// Replaces the global default TTL applied to sources with no
    /// per-source override. Applies only to events received after this
    /// call; a timer already scheduled for an earlier arrival is not
    /// rescheduled.
    pub fn set_event_ttl(&self, ttl: Ttl) {
        *self.event_ttl.lock().unwrap_or_else(PoisonError::into_inner) = ttl;
    }

    /// The global default TTL currently in effect.
    #[must_use]
    pub fn get_event_ttl(&self) -> Ttl {
        *self.event_ttl.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets (or replaces) a per-source TTL override. Applies only to
    /// events from `source` received after this call.
    pub fn set_event_ttl_for(&self, source: impl Into<String>, ttl: Ttl) {
        self.event_ttls.lock().unwrap_or_else(PoisonError::into_inner).insert(source.into(), ttl);
    }

    /// Removes a per-source TTL override, falling back to the global
    /// default for that source on subsequent arrivals.
    pub fn clear_event_ttl_for(&self, source: &str) {
        self.event_ttls.lock().unwrap_or_else(PoisonError::into_inner).remove(source);
    }

    /// Snapshot of every per-source TTL override currently configured.
    #[must_use]
    pub fn get_event_ttls(&self) -> HashMap<String, Ttl> {
        self.event_ttls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
