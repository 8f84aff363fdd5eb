// SPDX-License-Identifier: Apache-2.0
//! P1/P2: for any acyclic `after` graph, the returned order respects every
//! dependency edge, and among nodes with no edges the order is priority
//! descending then registration order ascending.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use ek_graph::{topo_sort, NodeSpec};
use proptest::prelude::*;

proptest! {
    #[test]
    fn chain_dependencies_are_respected(len in 1usize..8) {
        // node i depends on node i-1; any valid ordering must place them
        // in index order regardless of priority noise.
        let priorities: Vec<i32> = (0..len).map(|i| (i as i32 * 7) % 5 - 2).collect();
        let nodes: Vec<NodeSpec> = (0..len)
            .map(|i| {
                let mut n = NodeSpec::new(i.to_string()).with_priority(priorities[i]);
                if i > 0 {
                    n = n.with_after(vec![(i - 1).to_string()]);
                }
                n
            })
            .collect();
        let order = topo_sort(&nodes).expect("chain is acyclic");
        let positions: Vec<usize> = order.iter().map(|&i| nodes[i].id.parse().unwrap()).collect();
        prop_assert_eq!(positions, (0..len).collect::<Vec<_>>());
    }

    #[test]
    fn no_edges_sorts_by_priority_desc_then_registration_asc(
        priorities in proptest::collection::vec(-5i32..5, 1..12)
    ) {
        let nodes: Vec<NodeSpec> = priorities
            .iter()
            .enumerate()
            .map(|(i, &p)| NodeSpec::new(i.to_string()).with_priority(p))
            .collect();
        let order = topo_sort(&nodes).expect("no edges, no cycle");
        let mut expected: Vec<usize> = (0..nodes.len()).collect();
        expected.sort_by(|&a, &b| priorities[b].cmp(&priorities[a]).then(a.cmp(&b)));
        prop_assert_eq!(order, expected);
    }
}
