// SPDX-License-Identifier: Apache-2.0
//! The composition engine: joins events across several source kernels into
//! one composite event on a dedicated internal kernel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use ek_kernel::{Event, Handler, Kernel, KernelOptions, ListenOptions};
use serde_json::{json, Value};

use crate::error::ComposeError;
use crate::merge::merge;
use crate::options::{ComposeOptions, Conflict, Ttl};

/// Event name the composition engine emits completed joins under. Never
/// pass this to [`Composition::new`] as a source name.
pub const RESERVED_COMPOSITE_NAME: &str = "__composed__";

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[derive(Clone)]
struct BufferedEntry {
    context: HashMap<String, Value>,
    inserted_at_ms: u64,
    ttl: Ttl,
}

impl BufferedEntry {
    /// `Instant` entries are only ever present in a buffer for the single
    /// completion check run at their own arrival, so their presence alone
    /// means they count as live; nothing further needs to expire them.
    fn is_live(&self, now: u64) -> bool {
        match self.ttl {
            Ttl::Permanent | Ttl::Instant => true,
            Ttl::Millis(ms) => now.saturating_sub(self.inserted_at_ms) < ms,
        }
    }
}

struct SourceLink {
    kernel: Kernel,
    event_name: String,
    listener_id: String,
}

/// Builds the source-name-to-latest-live-context mapping used both to fire
/// a join and to answer [`Composition::get_context`], or `None` if at
/// least one source currently has no live entry.
fn build_mapping(sources: &[SourceLink], buffers: &[VecDeque<BufferedEntry>], now: u64) -> Option<Vec<(String, HashMap<String, Value>)>> {
    let all_live = buffers.iter().all(|buffer| buffer.iter().any(|entry| entry.is_live(now)));
    if !all_live {
        return None;
    }
    Some(
        sources
            .iter()
            .zip(buffers.iter())
            .map(|(link, buffer)| {
                let context = buffer.iter().rev().find(|entry| entry.is_live(now)).map_or_else(HashMap::new, |entry| entry.context.clone());
                (link.event_name.clone(), context)
            })
            .collect(),
    )
}

struct ComposeInner {
    options: ComposeOptions,
    composite_kernel: Kernel,
    sources: Vec<SourceLink>,
    buffers: Mutex<Vec<VecDeque<BufferedEntry>>>,
    last_conflicts: Mutex<Vec<Conflict>>,
    disposed: AtomicBool,
}

/// Joins events from several `(Kernel, event name)` sources into one
/// composite event, buffering each source's recent contributions and
/// firing once every source has at least one live entry.
///
/// Cheap to clone; every clone shares the same buffers and source
/// subscriptions, and [`Composition::dispose`] tears them all down at
/// once regardless of which clone calls it.
#[derive(Clone)]
pub struct Composition(Arc<ComposeInner>);

impl Composition {
    /// Builds a composition over `sources`, subscribing one listener per
    /// source on its own kernel.
    ///
    /// Fails with [`ComposeError::ReservedName`] if any source's event
    /// name is [`RESERVED_COMPOSITE_NAME`].
    pub fn new(sources: Vec<(Kernel, String)>, options: ComposeOptions) -> Result<Self, ComposeError> {
        for (_, name) in &sources {
            if name == RESERVED_COMPOSITE_NAME {
                return Err(ComposeError::ReservedName(name.clone()));
            }
        }

        let composite_kernel = Kernel::new(KernelOptions::default());
        let source_count = sources.len();

        let inner = Arc::new_cyclic(|weak: &Weak<ComposeInner>| {
            let mut links = Vec::with_capacity(source_count);
            for (idx, (kernel, name)) in sources.into_iter().enumerate() {
                let id = format!("__compose_src_{idx}__");
                let weak_for_handler = Weak::clone(weak);
                let handler: Handler = Arc::new(move |event, _ctx| {
                    let weak = Weak::clone(&weak_for_handler);
                    let event = event.clone();
                    Box::pin(async move {
                        if let Some(inner) = weak.upgrade() {
                            Self::handle_arrival(&inner, idx, &event).await;
                            Ok(())
                        } else {
                            Err(ComposeError::SourceGone(event.name().to_owned()).to_string())
                        }
                    })
                });
                let _ = kernel.on(&name, handler, ListenOptions { id: Some(id.clone()), ..ListenOptions::default() });
                links.push(SourceLink { kernel, event_name: name, listener_id: id });
            }
            ComposeInner {
                options,
                composite_kernel,
                buffers: Mutex::new(vec![VecDeque::new(); links.len()]),
                last_conflicts: Mutex::new(Vec::new()),
                sources: links,
                disposed: AtomicBool::new(false),
            }
        });

        Ok(Self(inner))
    }

    /// Registers a listener for completed joins.
    pub fn on_composed(&self, handler: Handler, opts: ListenOptions) -> Result<String, ek_kernel::KernelError> {
        self.0.composite_kernel.on(RESERVED_COMPOSITE_NAME, handler, opts)
    }

    /// Removes a listener previously registered with [`Composition::on_composed`].
    pub fn off_composed(&self, id: &str) -> bool {
        self.0.composite_kernel.off_id(id)
    }

    /// Whether [`Composition::dispose`] has already run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::SeqCst)
    }

    /// Number of live buffered entries for the source registered under
    /// `event_name`, or 0 if no such source exists or it has none.
    #[must_use]
    pub fn buffered_count(&self, event_name: &str) -> usize {
        let Some(idx) = self.source_index(event_name) else {
            return 0;
        };
        let now = now_ms();
        self.lock_buffers()[idx].iter().filter(|entry| entry.is_live(now)).count()
    }

    /// The live buffered contexts for the source registered under
    /// `event_name`, oldest first, or empty if no such source exists or it
    /// has none.
    #[must_use]
    pub fn get_buffer(&self, event_name: &str) -> Vec<HashMap<String, Value>> {
        let Some(idx) = self.source_index(event_name) else {
            return Vec::new();
        };
        let now = now_ms();
        self.lock_buffers()[idx].iter().filter(|entry| entry.is_live(now)).map(|entry| entry.context.clone()).collect()
    }

    /// Clears every source's buffer without unsubscribing from sources or
    /// tearing down the internal composite kernel. Use [`Composition::dispose`]
    /// to tear the composition down entirely.
    pub fn clear_buffers(&self) {
        self.lock_buffers().iter_mut().for_each(VecDeque::clear);
    }

    /// The merged context that would result from the currently buffered
    /// state, or `None` if at least one source has no live entry yet.
    #[must_use]
    pub fn get_context(&self) -> Option<HashMap<String, Value>> {
        let now = now_ms();
        let buffers = self.lock_buffers();
        let mapping = build_mapping(&self.0.sources, &buffers, now)?;
        let (merged, _conflicts) = merge(self.0.options.merger, self.0.options.delimiter, &mapping);
        Some(merged)
    }

    /// The conflict list produced by the most recent composite emission.
    /// Empty before the first join and after [`Composition::dispose`].
    #[must_use]
    pub fn get_conflicts(&self) -> Vec<Conflict> {
        self.0.last_conflicts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the global default TTL applied to sources with no
    /// per-source override. Applies only to events received after this
    /// call.
    pub fn set_event_ttl(&self, ttl: Ttl) {
        self.0.options.set_event_ttl(ttl);
    }

    /// The global default TTL currently in effect.
    #[must_use]
    pub fn get_event_ttl(&self) -> Ttl {
        self.0.options.get_event_ttl()
    }

    /// Sets (or replaces) a per-source TTL override for `source`. Applies
    /// only to events from `source` received after this call.
    pub fn set_event_ttl_for(&self, source: impl Into<String>, ttl: Ttl) {
        self.0.options.set_event_ttl_for(source, ttl);
    }

    /// Removes a per-source TTL override, falling back to the global
    /// default for that source on subsequent arrivals.
    pub fn clear_event_ttl_for(&self, source: &str) {
        self.0.options.clear_event_ttl_for(source);
    }

    /// Snapshot of every per-source TTL override currently configured.
    #[must_use]
    pub fn get_event_ttls(&self) -> HashMap<String, Ttl> {
        self.0.options.get_event_ttls()
    }

    /// Unsubscribes from every source, clears all buffers, and tears down
    /// the internal composite kernel. Idempotent — calling it more than
    /// once has no further effect.
    pub fn dispose(&self) {
        if self.0.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for link in &self.0.sources {
            link.kernel.off_id(&link.listener_id);
        }
        self.lock_buffers().iter_mut().for_each(VecDeque::clear);
        self.0.last_conflicts.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.0.composite_kernel.off_all(None);
    }

    fn source_index(&self, event_name: &str) -> Option<usize> {
        self.0.sources.iter().position(|link| link.event_name == event_name)
    }

    fn lock_buffers(&self) -> std::sync::MutexGuard<'_, Vec<VecDeque<BufferedEntry>>> {
        self.0.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn handle_arrival(inner: &Arc<ComposeInner>, idx: usize, event: &Event) {
        if inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        let now = now_ms();
        let ttl = inner.options.ttl_for(&inner.sources[idx].event_name);
        let entry = BufferedEntry { context: event.context_snapshot(), inserted_at_ms: now, ttl };

        let fired = {
            let mut buffers = inner.buffers.lock().unwrap_or_else(PoisonError::into_inner);
            let buffer = &mut buffers[idx];
            buffer.push_back(entry);
            if buffer.len() > inner.options.buffer_limit {
                buffer.pop_front();
            }

            let mapping = build_mapping(&inner.sources, &buffers, now);

            if mapping.is_some() && inner.options.reset {
                for buffer in buffers.iter_mut() {
                    let survivor = buffer.iter().rev().find(|entry| entry.is_live(now)).cloned();
                    buffer.clear();
                    if let Some(survivor) = survivor {
                        if !matches!(survivor.ttl, Ttl::Instant) {
                            buffer.push_back(survivor);
                        }
                    }
                }
            }

            // An instant entry never outlives the single check it arrived
            // for, regardless of whether that check fired or reset ran.
            if matches!(ttl, Ttl::Instant) && buffers[idx].back().is_some_and(|entry| matches!(entry.ttl, Ttl::Instant)) {
                buffers[idx].pop_back();
            }

            mapping
        };

        let Some(mapping) = fired else {
            if matches!(ttl, Ttl::Instant) {
                tracing::debug!(source = %inner.sources[idx].event_name, "instant entry dropped without completing the composition");
            }
            return;
        };

        let (merged, conflicts) = merge(inner.options.merger, inner.options.delimiter, &mapping);
        *inner.last_conflicts.lock().unwrap_or_else(PoisonError::into_inner) = conflicts.clone();
        if let Some(on_conflict) = &inner.options.on_conflict {
            for conflict in &conflicts {
                on_conflict(conflict);
            }
        }
        let data = json!({
            "context": merged,
            "conflicts": conflicts
                .iter()
                .map(|conflict| json!({
                    "key": conflict.key,
                    "sources": conflict.sources,
                    "values": conflict.values,
                }))
                .collect::<Vec<_>>(),
        });
        if let Err(err) = inner.composite_kernel.emit(RESERVED_COMPOSITE_NAME, data).await {
            tracing::warn!(%err, "composite emission failed");
        }
    }
}
