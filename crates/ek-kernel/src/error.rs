// SPDX-License-Identifier: Apache-2.0
//! Error types surfaced by [`crate::Kernel`].

use thiserror::Error;

/// One listener's failure during a single emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    /// Id of the listener that failed.
    pub listener_id: String,
    /// Concrete event name being dispatched when it failed.
    pub event_name: String,
    /// Milliseconds since the Unix epoch when the failure was recorded.
    pub timestamp_ms: u64,
    /// Display text of the error the listener returned.
    pub message: String,
}

/// Failure modes of [`crate::Kernel::emit`] and [`crate::Kernel::emit_serial`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// The listeners matched by an emission form a cyclic `after` graph.
    #[error("cyclic listener dependency: {}", .cycle.join(" -> "))]
    Cyclic {
        /// Listener ids forming the detected cycle.
        cycle: Vec<String>,
    },
    /// A matched listener's `after` list named an id absent from the
    /// listeners matched by the same emission.
    #[error("listener `{listener}` depends on `{missing}`, which is not registered for this event")]
    MissingDependency {
        /// The listener that declared the unresolvable dependency.
        listener: String,
        /// The id it referenced.
        missing: String,
    },
    /// One or more listeners failed and the kernel's error boundary is
    /// disabled, so the failures propagate to the caller instead of being
    /// recorded for later inspection.
    #[error("{} listener(s) failed", .0.len())]
    Aggregate(Vec<ListenerFailure>),
    /// The caller used the API incorrectly (e.g. emitted a reserved name).
    #[error("{0}")]
    Usage(String),
}

impl From<ek_graph::SortError> for KernelError {
    fn from(err: ek_graph::SortError) -> Self {
        match err {
            ek_graph::SortError::Cyclic { cycle } => Self::Cyclic { cycle },
            ek_graph::SortError::MissingDependency { node, missing } => {
                Self::MissingDependency { listener: node, missing }
            }
        }
    }
}
