// SPDX-License-Identifier: Apache-2.0
//! The in-process event kernel: a listener registry, the event object
//! passed through one emission, and the dispatch engine that turns a
//! single `emit` call into an ordered run of the listeners it matched.
//!
//! Listeners are registered against hierarchical patterns ([`ek_pattern`])
//! and may declare both a priority and a set of ids they must run after;
//! when an emission matches listeners with dependency edges between them,
//! the dispatch engine orders them with [`ek_graph::topo_sort`] instead of
//! a flat priority sort.
//!
//! ```
//! use ek_kernel::{Kernel, KernelOptions, ListenOptions};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let kernel = Kernel::new(KernelOptions::default());
//! kernel
//!     .on(
//!         "user:created",
//!         Arc::new(|event, _ctx| {
//!             Box::pin(async move {
//!                 println!("got {}", event.name());
//!                 Ok(())
//!             })
//!         }),
//!         ListenOptions::default(),
//!     )
//!     .expect("fresh id");
//! kernel.emit("user:created", serde_json::json!({"id": 1})).await.expect("no deps, no cycle");
//! # }
//! ```

mod context;
mod dispatch;
mod error;
mod event;
mod registry;
mod signal;

pub use context::{Handler, HandlerFuture, ListenerContext, Once};
pub use dispatch::{Kernel, KernelOptions};
pub use error::{KernelError, ListenerFailure};
pub use event::Event;
pub use registry::{ListenOptions, ListenerRecord};
pub use signal::Signal;
