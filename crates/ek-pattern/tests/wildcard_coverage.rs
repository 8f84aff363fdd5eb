// SPDX-License-Identifier: Apache-2.0
//! P7: wildcard coverage — `**` matches every name including the empty
//! name, `*` matches exactly one non-empty segment, and a pattern with no
//! wildcard segment is satisfied only by the name equal to it.

use ek_pattern::matches;
use proptest::prelude::*;

fn arb_segment() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

fn arb_name(max_segments: usize) -> impl Strategy<Value = String> {
    proptest::collection::vec(arb_segment(), 0..=max_segments).prop_map(|segs| segs.join(":"))
}

proptest! {
    #[test]
    fn double_star_matches_any_name(name in arb_name(6)) {
        prop_assert!(matches(&name, "**", ':'));
    }

    #[test]
    fn single_star_matches_iff_one_nonempty_segment(name in arb_name(6)) {
        let segments: Vec<&str> = name.split(':').collect();
        let expected = segments.len() == 1 && !segments[0].is_empty();
        prop_assert_eq!(matches(&name, "*", ':'), expected);
    }

    #[test]
    fn literal_pattern_is_singleton(pattern in arb_segment(), name in arb_name(3)) {
        let expected = name == pattern;
        prop_assert_eq!(matches(&name, &pattern, ':'), expected);
    }
}
