// SPDX-License-Identifier: Apache-2.0
//! Error types surfaced by [`crate::Composition`].

use thiserror::Error;

/// Failure modes of [`crate::Composition::new`] and composite-event access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// A source's event name collides with the name the composition
    /// reserves for its own composite event.
    #[error("source event name `{0}` collides with the reserved composite event name")]
    ReservedName(String),
    /// An operation referenced a source that is no longer part of a live
    /// composition (observed after [`crate::Composition::dispose`]).
    #[error("source `{0}` is no longer registered with this composition")]
    SourceGone(String),
}
