// SPDX-License-Identifier: Apache-2.0
//! Cancellation handles for listener registrations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A handle a caller holds to later cancel a listener registration.
///
/// Triggering the handle does not remove the listener synchronously — it
/// marks the registration dead, and the kernel prunes dead registrations at
/// its next registry-touching operation (the next `on`, `off`, or `emit`).
/// If a handle is already triggered at registration time, the listener is
/// still inserted and then pruned on that same next operation.
#[derive(Clone, Default)]
pub struct Signal(Arc<AtomicBool>);

impl Signal {
    /// Creates a handle that has not yet fired.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks every listener registered with this handle for removal.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`Signal::trigger`] has been called.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::Signal;

    #[test]
    fn starts_untriggered_and_latches_once_fired() {
        let signal = Signal::new();
        assert!(!signal.is_triggered());
        signal.trigger();
        assert!(signal.is_triggered());
    }

    #[test]
    fn clones_share_the_same_underlying_flag() {
        let signal = Signal::new();
        let clone = signal.clone();
        clone.trigger();
        assert!(signal.is_triggered());
    }
}
