// SPDX-License-Identifier: Apache-2.0
//! Kahn's-algorithm topological sort over `after`-dependency edges, with
//! priority-descending/registration-order-ascending tie-breaking and
//! cycle/missing-dependency diagnostics.
//!
//! Dependency edges are hard constraints: if node `a` lists node `b` in
//! `after`, `b` always precedes `a` in the returned order. Priority is a
//! soft preference applied only among nodes that are simultaneously
//! eligible (all of their dependencies already placed).

use std::collections::HashMap;

mod error;
pub use error::SortError;

/// One node to be ordered: an identifier, its priority, and the set of
/// node ids it must follow.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Identifier, unique within the slice passed to [`topo_sort`].
    pub id: String,
    /// Ids of nodes that must appear earlier in the returned order.
    pub after: Vec<String>,
    /// Higher priority is preferred when multiple nodes are eligible at once.
    pub priority: i32,
}

impl NodeSpec {
    /// Creates a node with no dependencies and priority 0.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            after: Vec::new(),
            priority: 0,
        }
    }

    /// Sets the dependency list.
    #[must_use]
    pub fn with_after(mut self, after: Vec<String>) -> Self {
        self.after = after;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Orders `nodes` respecting every `after` edge, breaking ties by priority
/// descending then by position in `nodes` (registration order) ascending.
///
/// Returns the order as indices into `nodes`. Fails with
/// [`SortError::MissingDependency`] if any `after` entry names an id not
/// present in `nodes`, or [`SortError::Cyclic`] if the dependency graph
/// contains a cycle.
pub fn topo_sort(nodes: &[NodeSpec]) -> Result<Vec<usize>, SortError> {
    let index_of: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    for node in nodes {
        for dep in &node.after {
            if !index_of.contains_key(dep.as_str()) {
                return Err(SortError::MissingDependency {
                    node: node.id.clone(),
                    missing: dep.clone(),
                });
            }
        }
    }

    let n = nodes.len();
    let mut in_degree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, node) in nodes.iter().enumerate() {
        let unique_deps: std::collections::HashSet<&str> =
            node.after.iter().map(String::as_str).collect();
        in_degree[i] = unique_deps.len();
        for dep in unique_deps {
            successors[index_of[dep]].push(i);
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while !ready.is_empty() {
        // Among eligible nodes, prefer higher priority, then earlier
        // registration order (its index in `nodes`).
        let pick_pos = ready
            .iter()
            .enumerate()
            .max_by(|&(_, &a), &(_, &b)| {
                nodes[a]
                    .priority
                    .cmp(&nodes[b].priority)
                    .then_with(|| b.cmp(&a))
            })
            .map(|(pos, _)| pos)
            .unwrap_or(0);
        let pick = ready.swap_remove(pick_pos);
        order.push(pick);
        for &succ in &successors[pick] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.push(succ);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    let placed: std::collections::HashSet<usize> = order.iter().copied().collect();
    let remaining: Vec<usize> = (0..n).filter(|i| !placed.contains(i)).collect();
    Err(SortError::Cyclic {
        cycle: find_cycle(nodes, &index_of, &remaining),
    })
}

/// DFS over `after` edges restricted to `remaining`, returning the ids of
/// one concrete cycle for diagnostics.
fn find_cycle(nodes: &[NodeSpec], index_of: &HashMap<&str, usize>, remaining: &[usize]) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let remaining_set: std::collections::HashSet<usize> = remaining.iter().copied().collect();
    let mut color = vec![Color::White; nodes.len()];
    let mut stack: Vec<usize> = Vec::new();

    fn visit(
        u: usize,
        nodes: &[NodeSpec],
        index_of: &HashMap<&str, usize>,
        remaining_set: &std::collections::HashSet<usize>,
        color: &mut [Color],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        color[u] = Color::Gray;
        stack.push(u);
        for dep in &nodes[u].after {
            let v = index_of[dep.as_str()];
            if !remaining_set.contains(&v) {
                continue;
            }
            match color[v] {
                Color::Gray => {
                    let pos = stack.iter().position(|&x| x == v).unwrap_or(0);
                    return Some(stack[pos..].to_vec());
                }
                Color::White => {
                    if let Some(cycle) = visit(v, nodes, index_of, remaining_set, color, stack) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }
        stack.pop();
        color[u] = Color::Black;
        None
    }

    for &start in remaining {
        if color[start] == Color::White {
            if let Some(cycle) = visit(start, nodes, index_of, &remaining_set, &mut color, &mut stack) {
                return cycle.into_iter().map(|i| nodes[i].id.clone()).collect();
            }
        }
    }

    // `remaining` is non-empty only when a cycle exists, so this is unreachable
    // in practice; fall back to naming the first unresolved node.
    remaining
        .first()
        .map(|&i| vec![nodes[i].id.clone()])
        .unwrap_or_default()
}
