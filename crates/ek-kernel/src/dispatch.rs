// SPDX-License-Identifier: Apache-2.0
//! The dispatch engine: turns one emission into an ordered, possibly
//! parallel, run of the listeners it matched.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use ek_graph::{topo_sort, NodeSpec};
use ek_pattern::PatternCache;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::instrument;

use crate::context::{Handler, ListenerContext, Once};
use crate::error::{KernelError, ListenerFailure};
use crate::event::{now_ms, Event};
use crate::registry::{ListenOptions, ListenerRecord, Registry};

/// Runtime configuration for a [`Kernel`].
#[derive(Clone)]
pub struct KernelOptions {
    /// Segment delimiter used when compiling patterns. Defaults to `:`.
    pub delimiter: char,
    /// When false, every pattern is matched by exact string equality and
    /// `*`/`**` segments lose their special meaning.
    pub wildcard: bool,
    /// Soft ceiling on listeners per pattern; exceeding it logs a warning
    /// rather than rejecting the registration.
    pub max_listeners: Option<usize>,
    /// Enables verbose tracing of dispatch internals beyond the default
    /// instrumentation.
    pub debug: bool,
    /// When true (the default), a failing listener is recorded and
    /// dispatch continues; when false, the first failing emission's
    /// listener set is aggregated into a returned error after every
    /// listener has run.
    pub error_boundary: bool,
    /// Invoked synchronously whenever a listener failure is recorded under
    /// the error boundary.
    pub on_error: Option<Arc<dyn Fn(&ListenerFailure) + Send + Sync>>,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            delimiter: ek_pattern::DEFAULT_DELIMITER,
            wildcard: true,
            max_listeners: None,
            debug: false,
            error_boundary: true,
            on_error: None,
        }
    }
}

enum Mode {
    Serial,
    Parallel,
}

pub(crate) struct KernelInner {
    pub(crate) options: KernelOptions,
    pub(crate) registry: Mutex<Registry>,
    pattern_cache: PatternCache,
    execution_errors: Mutex<Vec<ListenerFailure>>,
    debug: AtomicBool,
}

/// The event kernel: a listener registry plus the engine that dispatches
/// events against it.
///
/// Cheap to clone — every clone shares the same registry and pattern
/// cache. Listener contexts hold a [`Weak`] reference back to the kernel
/// they were dispatched from, so a kernel with no outstanding `Kernel`
/// clones is dropped even while listeners referencing it are registered.
#[derive(Clone)]
pub struct Kernel(pub(crate) Arc<KernelInner>);

impl Kernel {
    /// Builds a kernel with the given options and no registered listeners.
    #[must_use]
    pub fn new(options: KernelOptions) -> Self {
        let debug = AtomicBool::new(options.debug);
        Self(Arc::new(KernelInner {
            options,
            registry: Mutex::new(Registry::default()),
            pattern_cache: PatternCache::new(),
            execution_errors: Mutex::new(Vec::new()),
            debug,
        }))
    }

    pub(crate) fn from_inner(inner: Arc<KernelInner>) -> Self {
        Self(inner)
    }

    fn downgrade(&self) -> Weak<KernelInner> {
        Arc::downgrade(&self.0)
    }

    /// Registers `handler` against `pattern`, returning the assigned id.
    ///
    /// Fails only with [`KernelError::Usage`], when `opts.id` collides with
    /// an id already registered.
    pub fn on(&self, pattern: &str, handler: Handler, opts: ListenOptions) -> Result<String, KernelError> {
        let mut registry = self.lock_registry();
        registry.add(pattern, handler, opts, self.0.options.max_listeners)
    }

    /// Registers a one-shot listener against `pattern` and returns a
    /// future that resolves with the next event it matches. The listener
    /// is removed after that single invocation regardless of
    /// `opts.once`, which is overwritten with [`Once::Always`].
    ///
    /// The returned future resolves to [`KernelError::Usage`] if the
    /// listener is removed (by id, by handler, or via `off_all`) before it
    /// ever matches an event.
    pub fn once(
        &self,
        pattern: &str,
        opts: ListenOptions,
    ) -> Result<impl std::future::Future<Output = Result<Event, KernelError>> + Send, KernelError> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let handler: Handler = Arc::new(move |event, _ctx| {
            let event = event.clone();
            let sender = tx.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
            Box::pin(async move {
                if let Some(sender) = sender {
                    let _ = sender.send(event);
                }
                Ok(())
            })
        });
        self.on(pattern, handler, ListenOptions { once: Once::Always, ..opts })?;
        Ok(async move { rx.await.map_err(|_| KernelError::Usage("once listener was removed before it matched an event".to_owned())) })
    }

    /// Removes a listener by id. Returns false if no such listener exists.
    pub fn off_id(&self, id: &str) -> bool {
        self.lock_registry().remove_by_id(id)
    }

    /// Removes every listener registered under `pattern` with the same
    /// handler reference (compared by pointer identity).
    pub fn off_handler(&self, pattern: &str, handler: &Handler) -> usize {
        self.lock_registry().remove_by_handler(pattern, handler)
    }

    /// Removes every listener under `pattern`, or every listener in the
    /// kernel when `pattern` is `None`.
    pub fn off_all(&self, pattern: Option<&str>) -> usize {
        self.lock_registry().remove_all(pattern)
    }

    /// Number of listeners registered under `pattern`, or in total when
    /// `pattern` is `None`. Reflects pruning of fired cancellation handles.
    #[must_use]
    pub fn listener_count(&self, pattern: Option<&str>) -> usize {
        let mut registry = self.lock_registry();
        registry.prune_triggered();
        registry.count(pattern)
    }

    /// Every distinct pattern with at least one live listener.
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        let mut registry = self.lock_registry();
        registry.prune_triggered();
        registry.patterns()
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.0.registry.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Listener failures recorded under the error boundary since the last
    /// [`Kernel::clear_execution_errors`] call.
    #[must_use]
    pub fn execution_errors(&self) -> Vec<ListenerFailure> {
        self.0
            .execution_errors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Discards every recorded execution error.
    pub fn clear_execution_errors(&self) {
        self.0
            .execution_errors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    /// Enables or disables the kernel's own diagnostic tracing events
    /// (dispatch-internal bookkeeping, not user-emitted events). Does not
    /// affect the `tracing` subscriber's own level filtering — events are
    /// still emitted at `debug` level and are only visible if the
    /// subscriber is configured to show them.
    pub fn debug(&self, flag: bool) {
        self.0.debug.store(flag, Ordering::SeqCst);
    }

    fn is_debug(&self) -> bool {
        self.0.debug.load(Ordering::SeqCst)
    }

    /// Dispatches `name` to its matching listeners in priority/dependency
    /// waves, running every listener in a wave concurrently.
    #[instrument(level = "debug", skip(self, data), fields(event = %name))]
    pub async fn emit(&self, name: &str, data: Value) -> Result<(), KernelError> {
        self.dispatch(name, data, &Mode::Parallel).await
    }

    /// Dispatches `name` to its matching listeners one at a time, in
    /// dependency and priority order.
    #[instrument(level = "debug", skip(self, data), fields(event = %name))]
    pub async fn emit_serial(&self, name: &str, data: Value) -> Result<(), KernelError> {
        self.dispatch(name, data, &Mode::Serial).await
    }

    async fn dispatch(&self, name: &str, data: Value, mode: &Mode) -> Result<(), KernelError> {
        let event = Event::new(name, data);
        let snapshot = {
            let mut registry = self.lock_registry();
            registry.matching(name, &self.0.pattern_cache, self.0.options.delimiter, self.0.options.wildcard)
        };
        if snapshot.is_empty() {
            if self.is_debug() {
                tracing::debug!(event = name, "dispatch matched no listeners");
            }
            return Ok(());
        }
        if self.is_debug() {
            tracing::debug!(event = name, listener_count = snapshot.len(), "dispatch matched listeners");
        }

        let ids: HashSet<&str> = snapshot.iter().map(|l| l.id.as_str()).collect();
        for listener in &snapshot {
            for dep in &listener.after {
                if !ids.contains(dep.as_str()) {
                    return Err(KernelError::MissingDependency {
                        listener: listener.id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        let order = plan_order(&snapshot)?;

        let mut errors = Vec::new();
        match mode {
            Mode::Serial => self.run_serial(&event, &snapshot, &order, &mut errors).await,
            Mode::Parallel => {
                let waves = compute_waves(&snapshot, &order);
                self.run_parallel(&event, &snapshot, &waves, &mut errors).await;
            }
        }

        if !self.0.options.error_boundary && !errors.is_empty() {
            return Err(KernelError::Aggregate(errors));
        }
        Ok(())
    }

    async fn run_serial(&self, event: &Event, snapshot: &[ListenerRecord], order: &[usize], errors: &mut Vec<ListenerFailure>) {
        for &idx in order {
            if event.is_stopped() {
                break;
            }
            let listener = &snapshot[idx];
            let ctx = self.make_context(listener, event);
            let result = (listener.handler)(event, &ctx).await;
            self.post_invoke(listener, event, result, errors);
        }
    }

    async fn run_parallel(&self, event: &Event, snapshot: &[ListenerRecord], waves: &[Vec<usize>], errors: &mut Vec<ListenerFailure>) {
        for wave in waves {
            if event.is_stopped() {
                break;
            }
            let contexts: Vec<ListenerContext> = wave.iter().map(|&idx| self.make_context(&snapshot[idx], event)).collect();
            let handler_futures = wave
                .iter()
                .zip(contexts.iter())
                .map(|(&idx, ctx)| (snapshot[idx].handler)(event, ctx));
            let results = futures::future::join_all(handler_futures).await;
            for (&idx, result) in wave.iter().zip(results) {
                self.post_invoke(&snapshot[idx], event, result, errors);
            }
        }
    }

    fn make_context(&self, listener: &ListenerRecord, event: &Event) -> ListenerContext {
        ListenerContext {
            id: listener.id.clone(),
            matched_name: event.name().to_owned(),
            priority: listener.priority,
            dependencies: listener.after.clone(),
            signal: listener.signal.clone(),
            kernel: self.downgrade(),
            event: event.clone(),
        }
    }

    fn post_invoke(&self, listener: &ListenerRecord, event: &Event, result: Result<(), String>, errors: &mut Vec<ListenerFailure>) {
        if let Err(message) = result {
            tracing::warn!(listener_id = %listener.id, event = event.name(), %message, "listener failed");
            let failure = ListenerFailure {
                listener_id: listener.id.clone(),
                event_name: event.name().to_owned(),
                timestamp_ms: now_ms(),
                message,
            };
            if self.0.options.error_boundary {
                if let Some(on_error) = &self.0.options.on_error {
                    on_error(&failure);
                }
                self.0
                    .execution_errors
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(failure);
            } else {
                errors.push(failure);
            }
        }

        let should_remove = match &listener.once {
            Once::Never => false,
            Once::Always => true,
            Once::If(predicate) => predicate(event),
        };
        if should_remove {
            self.lock_registry().remove_by_id(&listener.id);
        }
    }
}

/// Orders the matched listeners, using a plain priority sort when none of
/// them declare dependencies (the common case) and Kahn's algorithm only
/// when at least one `after` edge is present.
fn plan_order(snapshot: &[ListenerRecord]) -> Result<Vec<usize>, KernelError> {
    if snapshot.iter().all(|l| l.after.is_empty()) {
        let mut order: Vec<usize> = (0..snapshot.len()).collect();
        order.sort_by(|&a, &b| snapshot[b].priority.cmp(&snapshot[a].priority).then(a.cmp(&b)));
        return Ok(order);
    }

    let nodes: Vec<NodeSpec> = snapshot
        .iter()
        .map(|l| NodeSpec::new(l.id.clone()).with_after(l.after.clone()).with_priority(l.priority))
        .collect();
    Ok(topo_sort(&nodes)?)
}

/// Groups `order` into waves for parallel dispatch: a listener's wave is
/// one past the highest wave of any listener it depends on, so every
/// dependency has already completed before its dependents start.
fn compute_waves(snapshot: &[ListenerRecord], order: &[usize]) -> Vec<Vec<usize>> {
    let id_to_idx: HashMap<&str, usize> = snapshot.iter().enumerate().map(|(i, l)| (l.id.as_str(), i)).collect();
    let mut level = vec![0usize; snapshot.len()];
    for &idx in order {
        let listener = &snapshot[idx];
        level[idx] = listener
            .after
            .iter()
            .filter_map(|dep| id_to_idx.get(dep.as_str()))
            .map(|&dep_idx| level[dep_idx] + 1)
            .max()
            .unwrap_or(0);
    }
    let wave_count = level.iter().copied().max().map_or(1, |max| max + 1);
    let mut waves = vec![Vec::new(); wave_count];
    for &idx in order {
        waves[level[idx]].push(idx);
    }
    waves
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::ListenOptions;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record_into(calls: Arc<Mutex<Vec<String>>>, label: &'static str) -> Handler {
        Arc::new(move |_event, _ctx| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(label.to_owned());
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn emits_to_no_listeners_is_a_noop() {
        let kernel = Kernel::new(KernelOptions::default());
        kernel.emit("nothing:here", json!(null)).await.expect("no listeners, no error");
    }

    #[tokio::test]
    async fn dependency_chain_runs_log_then_auth_then_handle() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let kernel = Kernel::new(KernelOptions::default());
        kernel
            .on("request", record_into(Arc::clone(&calls), "log"), ListenOptions { id: Some("log".into()), ..ListenOptions::default() })
            .unwrap();
        kernel
            .on(
                "request",
                record_into(Arc::clone(&calls), "auth"),
                ListenOptions { id: Some("auth".into()), after: vec!["log".into()], ..ListenOptions::default() },
            )
            .unwrap();
        kernel
            .on(
                "request",
                record_into(Arc::clone(&calls), "handle"),
                ListenOptions { id: Some("handle".into()), after: vec!["auth".into()], ..ListenOptions::default() },
            )
            .unwrap();

        kernel.emit_serial("request", json!(null)).await.expect("acyclic chain");
        let order = calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        assert_eq!(order, vec!["log", "auth", "handle"]);
    }

    #[tokio::test]
    async fn missing_after_dependency_is_a_fatal_error() {
        let kernel = Kernel::new(KernelOptions::default());
        kernel
            .on(
                "request",
                record_into(Arc::new(Mutex::new(Vec::new())), "handle"),
                ListenOptions { after: vec!["ghost".into()], ..ListenOptions::default() },
            )
            .unwrap();
        let err = kernel.emit("request", json!(null)).await.unwrap_err();
        assert!(matches!(err, KernelError::MissingDependency { .. }));
    }

    #[tokio::test]
    async fn cyclic_after_edges_are_reported_as_fatal() {
        let kernel = Kernel::new(KernelOptions::default());
        kernel
            .on(
                "request",
                record_into(Arc::new(Mutex::new(Vec::new())), "a"),
                ListenOptions { id: Some("a".into()), after: vec!["b".into()], ..ListenOptions::default() },
            )
            .unwrap();
        kernel
            .on(
                "request",
                record_into(Arc::new(Mutex::new(Vec::new())), "b"),
                ListenOptions { id: Some("b".into()), after: vec!["a".into()], ..ListenOptions::default() },
            )
            .unwrap();
        let err = kernel.emit("request", json!(null)).await.unwrap_err();
        assert!(matches!(err, KernelError::Cyclic { .. }));
    }

    #[tokio::test]
    async fn wildcard_pattern_matches_concrete_event_name() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let kernel = Kernel::new(KernelOptions::default());
        kernel.on("user:*", record_into(Arc::clone(&calls), "hit"), ListenOptions::default()).unwrap();
        kernel.emit("user:created", json!(null)).await.unwrap();
        kernel.emit("org:created", json!(null)).await.unwrap();
        assert_eq!(calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone(), vec!["hit"]);
    }

    #[tokio::test]
    async fn stop_propagation_halts_later_listeners_in_serial_mode() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let kernel = Kernel::new(KernelOptions::default());
        let first_calls = Arc::clone(&calls);
        kernel
            .on(
                "request",
                Arc::new(move |_event, ctx| {
                    let calls = Arc::clone(&first_calls);
                    ctx.stop_propagation();
                    Box::pin(async move {
                        calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push("first".to_owned());
                        Ok(())
                    })
                }),
                ListenOptions { priority: 10, ..ListenOptions::default() },
            )
            .unwrap();
        kernel.on("request", record_into(Arc::clone(&calls), "second"), ListenOptions::default()).unwrap();

        kernel.emit_serial("request", json!(null)).await.unwrap();
        assert_eq!(calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone(), vec!["first"]);
    }

    #[tokio::test]
    async fn once_listener_is_removed_after_its_first_invocation() {
        let count = Arc::new(AtomicUsize::new(0));
        let kernel = Kernel::new(KernelOptions::default());
        let counter = Arc::clone(&count);
        kernel
            .on(
                "tick",
                Arc::new(move |_event, _ctx| {
                    let counter = Arc::clone(&counter);
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
                ListenOptions { once: Once::Always, ..ListenOptions::default() },
            )
            .unwrap();

        kernel.emit("tick", json!(null)).await.unwrap();
        kernel.emit("tick", json!(null)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(kernel.listener_count(Some("tick")), 0);
    }

    #[tokio::test]
    async fn error_boundary_records_failures_instead_of_propagating() {
        let kernel = Kernel::new(KernelOptions::default());
        kernel
            .on(
                "task",
                Arc::new(|_event, _ctx| Box::pin(async move { Err("boom".to_owned()) })),
                ListenOptions { id: Some("failing".into()), ..ListenOptions::default() },
            )
            .unwrap();

        kernel.emit("task", json!(null)).await.expect("error boundary absorbs the failure");
        let errors = kernel.execution_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].listener_id, "failing");
        kernel.clear_execution_errors();
        assert!(kernel.execution_errors().is_empty());
    }

    #[tokio::test]
    async fn disabling_the_error_boundary_propagates_an_aggregate_error() {
        let mut options = KernelOptions::default();
        options.error_boundary = false;
        let kernel = Kernel::new(options);
        kernel
            .on("task", Arc::new(|_event, _ctx| Box::pin(async move { Err("boom".to_owned()) })), ListenOptions::default())
            .unwrap();

        let err = kernel.emit("task", json!(null)).await.unwrap_err();
        assert!(matches!(err, KernelError::Aggregate(failures) if failures.len() == 1));
    }

    #[tokio::test]
    async fn debug_flag_is_mutable_after_construction() {
        let kernel = Kernel::new(KernelOptions { debug: true, ..KernelOptions::default() });
        assert!(kernel.is_debug());
        kernel.debug(false);
        assert!(!kernel.is_debug());
    }

    #[tokio::test]
    async fn once_resolves_with_the_next_matching_event_and_does_not_rerun() {
        let kernel = Kernel::new(KernelOptions::default());
        let awaited = kernel.once("tick", ListenOptions::default()).unwrap();
        kernel.emit("tick", json!({"n": 1})).await.unwrap();
        let event = awaited.await.expect("resolves with the matched event");
        assert_eq!(event.data(), &json!({"n": 1}));
        assert_eq!(kernel.listener_count(Some("tick")), 0, "the one-shot listener is gone after its single match");
    }

    #[tokio::test]
    async fn once_future_errors_if_the_listener_is_removed_before_it_matches() {
        let kernel = Kernel::new(KernelOptions::default());
        let awaited = kernel.once("tick", ListenOptions { id: Some("once-tick".into()), ..ListenOptions::default() }).unwrap();
        kernel.off_id("once-tick");
        let err = awaited.await.unwrap_err();
        assert!(matches!(err, KernelError::Usage(_)));
    }

    #[tokio::test]
    async fn off_handler_removes_every_registration_sharing_that_handler() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let kernel = Kernel::new(KernelOptions::default());
        let handler = record_into(Arc::clone(&calls), "shared");
        kernel.on("a", Arc::clone(&handler), ListenOptions::default()).unwrap();
        kernel.on("a", Arc::clone(&handler), ListenOptions::default()).unwrap();
        assert_eq!(kernel.off_handler("a", &handler), 2);
        assert_eq!(kernel.listener_count(Some("a")), 0);
    }
}
