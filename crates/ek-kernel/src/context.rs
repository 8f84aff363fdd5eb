// SPDX-License-Identifier: Apache-2.0
//! The handler function type and the context passed to every invocation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::KernelInner;
use crate::event::Event;
use crate::signal::Signal;

/// The future a [`Handler`] returns. Borrows from the event and context for
/// the duration of one invocation; does not need to be `'static` since the
/// dispatch engine polls every wave to completion before its locals drop.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// A registered listener body.
///
/// Plain closures are the common case: `Arc::new(|event, ctx| Box::pin(async
/// move { ... }))`. Wrapping in `Arc` (rather than taking `Box<dyn Fn>`)
/// lets [`crate::Kernel::off_handler`] compare registrations by pointer
/// identity, mirroring reference-equality removal semantics.
pub type Handler = Arc<dyn for<'a> Fn(&'a Event, &'a ListenerContext) -> HandlerFuture<'a> + Send + Sync>;

/// Controls whether a listener is removed after it has run.
#[derive(Clone)]
pub enum Once {
    /// Runs for every matching emission until explicitly removed.
    Never,
    /// Removed unconditionally immediately after its first invocation.
    Always,
    /// Removed after an invocation iff the predicate returns true, given
    /// the event that was just dispatched. Evaluated after the handler
    /// returns, so it may inspect context the handler itself set.
    If(Arc<dyn Fn(&Event) -> bool + Send + Sync>),
}

impl Default for Once {
    fn default() -> Self {
        Self::Never
    }
}

/// Metadata handed to a listener alongside the [`Event`] it is reacting to.
///
/// Constructed fresh for each invocation and valid only for its duration —
/// there is no way to obtain one outside of an active dispatch, which is
/// why stopping propagation or re-entering the kernel from a handler can
/// never be a "used outside an emission" usage error: the type simply
/// cannot be constructed in that state.
pub struct ListenerContext {
    /// Id of the listener currently running.
    pub id: String,
    /// The concrete event name this invocation matched, not the pattern it
    /// was registered under.
    pub matched_name: String,
    /// This listener's priority as registered.
    pub priority: i32,
    /// This listener's declared `after` dependencies.
    pub dependencies: Vec<String>,
    /// The cancellation handle this listener was registered with, if any.
    pub signal: Option<Signal>,
    pub(crate) kernel: std::sync::Weak<KernelInner>,
    pub(crate) event: Event,
}

impl ListenerContext {
    /// Requests that no further listeners run for the current emission.
    ///
    /// Already-dispatched listeners (or, in parallel mode, the rest of the
    /// in-flight wave) still complete; no new listener or wave starts
    /// after the flag is observed.
    pub fn stop_propagation(&self) {
        self.event.stop();
    }

    /// Re-emits through the same kernel this listener was registered on,
    /// in parallel mode. A no-op returning `Ok(())` if the kernel has since
    /// been dropped.
    pub async fn emit(&self, name: &str, data: Value) -> Result<(), crate::error::KernelError> {
        match self.kernel.upgrade() {
            Some(inner) => crate::dispatch::Kernel::from_inner(inner).emit(name, data).await,
            None => Ok(()),
        }
    }

    /// Removes the currently running listener's own registration.
    pub fn remove_self(&self) {
        if let Some(inner) = self.kernel.upgrade() {
            inner.registry.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove_by_id(&self.id);
        }
    }
}
