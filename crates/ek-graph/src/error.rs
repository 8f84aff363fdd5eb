// SPDX-License-Identifier: Apache-2.0
//! Error types for [`crate::topo_sort`].

use thiserror::Error;

/// Failure modes of [`crate::topo_sort`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SortError {
    /// A node's `after` list named an id not present among the input nodes.
    #[error("node `{node}` depends on unknown id `{missing}`")]
    MissingDependency {
        /// The node that declared the unresolvable dependency.
        node: String,
        /// The id it referenced.
        missing: String,
    },
    /// The dependency graph contains a cycle; `cycle` names one concrete
    /// cycle (in traversal order) for diagnostics.
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    Cyclic {
        /// Ids forming the detected cycle, in traversal order.
        cycle: Vec<String>,
    },
}
