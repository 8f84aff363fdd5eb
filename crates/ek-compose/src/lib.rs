// SPDX-License-Identifier: Apache-2.0
//! Multi-source event composition built on top of [`ek_kernel`].
//!
//! A [`Composition`] subscribes to one event on each of several source
//! kernels, buffers each source's recent context under a configurable TTL,
//! and emits a composite event once every source has a live entry.
//!
//! ```
//! use ek_compose::{ComposeOptions, Composition};
//! use ek_kernel::{Kernel, KernelOptions};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sensor_a = Kernel::new(KernelOptions::default());
//! let sensor_b = Kernel::new(KernelOptions::default());
//! let composition = Composition::new(
//!     vec![(sensor_a.clone(), "reading".to_owned()), (sensor_b.clone(), "reading".to_owned())],
//!     ComposeOptions::default(),
//! )
//! .expect("source names do not collide with the reserved composite name");
//!
//! sensor_a.emit("reading", serde_json::json!({"celsius": 21})).await.ok();
//! sensor_b.emit("reading", serde_json::json!({"celsius": 22})).await.ok();
//! # }
//! ```

mod composition;
mod error;
mod merge;
mod options;

pub use composition::{Composition, RESERVED_COMPOSITE_NAME};
pub use error::ComposeError;
pub use options::{ComposeOptions, Conflict, MergeStrategy, Ttl, DEFAULT_BUFFER_LIMIT};
