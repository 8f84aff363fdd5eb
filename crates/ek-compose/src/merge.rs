// SPDX-License-Identifier: Apache-2.0
//! Folding per-source contexts into one composite context.

use std::collections::HashMap;

use serde_json::Value;

use crate::options::{Conflict, MergeStrategy};

/// Applies `strategy` to `mapping` (source name, its contributed context),
/// given in source-registration order so [`MergeStrategy::Override`]'s
/// last-writer-wins rule is deterministic.
pub(crate) fn merge(
    strategy: MergeStrategy,
    delimiter: char,
    mapping: &[(String, HashMap<String, Value>)],
) -> (HashMap<String, Value>, Vec<Conflict>) {
    match strategy {
        MergeStrategy::Namespace => (namespace(delimiter, mapping), Vec::new()),
        MergeStrategy::Override => r#override(mapping),
    }
}

fn namespace(delimiter: char, mapping: &[(String, HashMap<String, Value>)]) -> HashMap<String, Value> {
    let mut merged = HashMap::new();
    for (source, context) in mapping {
        for (key, value) in context {
            merged.insert(format!("{source}{delimiter}{key}"), value.clone());
        }
    }
    merged
}

fn r#override(mapping: &[(String, HashMap<String, Value>)]) -> (HashMap<String, Value>, Vec<Conflict>) {
    let mut merged = HashMap::new();
    let mut writers: HashMap<String, Vec<(String, Value)>> = HashMap::new();

    for (source, context) in mapping {
        for (key, value) in context {
            merged.insert(key.clone(), value.clone());
            writers.entry(key.clone()).or_default().push((source.clone(), value.clone()));
        }
    }

    let mut conflicts: Vec<Conflict> = writers
        .into_iter()
        .filter(|(_, writes)| writes.len() > 1)
        .map(|(key, writes)| Conflict {
            key,
            sources: writes.iter().map(|(source, _)| source.clone()).collect(),
            values: writes.into_iter().map(|(_, value)| value).collect(),
        })
        .collect();
    conflicts.sort_by(|a, b| a.key.cmp(&b.key));

    (merged, conflicts)
}
