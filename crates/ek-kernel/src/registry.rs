// SPDX-License-Identifier: Apache-2.0
//! The listener registry (pattern, priority, dependency, and lifecycle
//! bookkeeping behind `Kernel::on`/`off`/`emit`).

use std::collections::HashMap;
use std::sync::Arc;

use ek_pattern::PatternCache;

use crate::context::{Handler, Once};
use crate::error::KernelError;
use crate::signal::Signal;

/// One registered listener.
#[derive(Clone)]
pub struct ListenerRecord {
    /// Unique id, supplied at registration or generated.
    pub id: String,
    /// The pattern this listener was registered under.
    pub pattern: String,
    /// Higher priority runs earlier among otherwise-eligible listeners.
    pub priority: i32,
    /// Ids of listeners that must run first, when matched by the same
    /// emission.
    pub after: Vec<String>,
    /// Removal policy applied after each invocation.
    pub once: Once,
    /// Cancellation handle, if registered with one.
    pub signal: Option<Signal>,
    /// Precomputed so the dispatch hot path never re-scans the pattern text.
    pub has_wildcard: bool,
    pub(crate) seq: u64,
    pub(crate) handler: Handler,
}

/// Options accepted by [`crate::Kernel::on`].
#[derive(Default)]
pub struct ListenOptions {
    /// Explicit id; generated when absent.
    pub id: Option<String>,
    /// Dependency ids this listener must run after, when matched together.
    pub after: Vec<String>,
    /// Scheduling priority; defaults to 0.
    pub priority: i32,
    /// Removal policy; defaults to running indefinitely.
    pub once: Once,
    /// Optional cancellation handle.
    pub signal: Option<Signal>,
}

/// Pattern-keyed listener storage backing a [`crate::Kernel`]. Not part of
/// the public API — reached only through `Kernel`'s methods.
#[derive(Default)]
pub struct Registry {
    by_pattern: HashMap<String, Vec<ListenerRecord>>,
    pattern_of_id: HashMap<String, String>,
    next_seq: u64,
}

impl Registry {
    pub(crate) fn add(
        &mut self,
        pattern: &str,
        handler: Handler,
        opts: ListenOptions,
        max_listeners: Option<usize>,
    ) -> Result<String, KernelError> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = opts.id.unwrap_or_else(|| format!("listener-{seq}"));
        if self.pattern_of_id.contains_key(&id) {
            return Err(KernelError::Usage(format!("listener id `{id}` is already registered")));
        }

        let bucket = self.by_pattern.entry(pattern.to_owned()).or_default();
        if let Some(limit) = max_listeners {
            if bucket.len() >= limit {
                tracing::warn!(pattern, limit, "listener count exceeds configured max_listeners");
            }
        }

        bucket.push(ListenerRecord {
            id: id.clone(),
            pattern: pattern.to_owned(),
            priority: opts.priority,
            after: opts.after,
            once: opts.once,
            signal: opts.signal,
            has_wildcard: ek_pattern::has_wildcard(pattern),
            seq,
            handler,
        });
        self.pattern_of_id.insert(id.clone(), pattern.to_owned());
        Ok(id)
    }

    pub(crate) fn remove_by_id(&mut self, id: &str) -> bool {
        let Some(pattern) = self.pattern_of_id.remove(id) else {
            return false;
        };
        if let Some(bucket) = self.by_pattern.get_mut(&pattern) {
            bucket.retain(|l| l.id != id);
            if bucket.is_empty() {
                self.by_pattern.remove(&pattern);
            }
        }
        true
    }

    pub(crate) fn remove_by_handler(&mut self, pattern: &str, handler: &Handler) -> usize {
        let mut removed_ids = Vec::new();
        if let Some(bucket) = self.by_pattern.get_mut(pattern) {
            bucket.retain(|l| {
                if Arc::ptr_eq(&l.handler, handler) {
                    removed_ids.push(l.id.clone());
                    false
                } else {
                    true
                }
            });
            if bucket.is_empty() {
                self.by_pattern.remove(pattern);
            }
        }
        for id in &removed_ids {
            self.pattern_of_id.remove(id);
        }
        removed_ids.len()
    }

    pub(crate) fn remove_all(&mut self, pattern: Option<&str>) -> usize {
        match pattern {
            Some(pattern) => {
                let Some(bucket) = self.by_pattern.remove(pattern) else {
                    return 0;
                };
                for listener in &bucket {
                    self.pattern_of_id.remove(&listener.id);
                }
                bucket.len()
            }
            None => {
                let total = self.by_pattern.values().map(Vec::len).sum();
                self.by_pattern.clear();
                self.pattern_of_id.clear();
                total
            }
        }
    }

    /// Drops any listener whose cancellation handle has fired. Called at
    /// the start of every registry-touching operation so that a triggered
    /// handle is reflected by the very next observation, matching the
    /// "removed asynchronously, at the next scheduling point" contract.
    pub(crate) fn prune_triggered(&mut self) {
        let dead: Vec<String> = self
            .by_pattern
            .values()
            .flatten()
            .filter(|l| l.signal.as_ref().is_some_and(Signal::is_triggered))
            .map(|l| l.id.clone())
            .collect();
        for id in dead {
            self.remove_by_id(&id);
        }
    }

    pub(crate) fn count(&self, pattern: Option<&str>) -> usize {
        match pattern {
            Some(pattern) => self.by_pattern.get(pattern).map_or(0, Vec::len),
            None => self.by_pattern.values().map(Vec::len).sum(),
        }
    }

    pub(crate) fn patterns(&self) -> Vec<String> {
        self.by_pattern.keys().cloned().collect()
    }

    /// Snapshots every listener whose pattern matches `name`, in
    /// registration order. The dispatch engine re-sorts this snapshot by
    /// priority and dependency edges; registration order here only serves
    /// as the tie-break baseline.
    pub(crate) fn matching(
        &mut self,
        name: &str,
        cache: &PatternCache,
        delimiter: char,
        wildcard_enabled: bool,
    ) -> Vec<ListenerRecord> {
        self.prune_triggered();
        let mut matched: Vec<&ListenerRecord> = self
            .by_pattern
            .iter()
            .filter(|(pattern, _)| {
                if wildcard_enabled {
                    cache.get_matcher(pattern, delimiter).is_match(name)
                } else {
                    pattern.as_str() == name
                }
            })
            .flat_map(|(_, bucket)| bucket.iter())
            .collect();
        matched.sort_by_key(|l| l.seq);
        matched.into_iter().cloned().collect()
    }
}
