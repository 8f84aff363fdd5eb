// SPDX-License-Identifier: Apache-2.0
//! Hierarchical wildcard pattern compiler and matcher.
//!
//! A pattern is a string of segments joined by a delimiter (`:` by
//! default). A segment of `*` matches exactly one non-empty segment of the
//! concrete name; a segment of `**` matches zero or more segments,
//! including empty ones. Any other segment matches literally. Patterns
//! with no wildcard segment are matched by direct string equality, which
//! is the fast path taken on every emission.
//!
//! Compiled matchers are cached by `(pattern, delimiter)` in a bounded LRU
//! cache (capacity 100) so that repeated emissions against the same
//! registered patterns never re-parse the pattern string.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

/// Default segment delimiter used when a kernel does not override it.
pub const DEFAULT_DELIMITER: char = ':';

/// Maximum number of compiled matchers retained per [`PatternCache`].
pub const CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `*` — exactly one non-empty name segment.
    Single,
    /// `**` — zero or more name segments, possibly empty.
    Multi,
    /// Any other text, matched by exact equality against the name segment.
    Literal(String),
}

/// A compiled representation of a pattern string for a given delimiter.
///
/// Matchers are pure functions of `(pattern, delimiter)`; two matchers
/// built from the same inputs always agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    pattern: String,
    delimiter: char,
    segments: Vec<Segment>,
    has_wildcard: bool,
}

impl Matcher {
    /// Compiles `pattern` for matching against names split on `delimiter`.
    #[must_use]
    pub fn compile(pattern: &str, delimiter: char) -> Self {
        let has_wildcard = has_wildcard(pattern);
        let segments = pattern
            .split(delimiter)
            .map(|seg| match seg {
                "*" => Segment::Single,
                "**" => Segment::Multi,
                literal => Segment::Literal(literal.to_owned()),
            })
            .collect();
        Self {
            pattern: pattern.to_owned(),
            delimiter,
            segments,
            has_wildcard,
        }
    }

    /// The source pattern string this matcher was compiled from.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The delimiter this matcher was compiled with.
    #[must_use]
    pub const fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Whether this pattern contains any wildcard segment.
    #[must_use]
    pub const fn has_wildcard(&self) -> bool {
        self.has_wildcard
    }

    /// Returns true iff `name` satisfies this pattern.
    #[must_use]
    pub fn is_match(&self, name: &str) -> bool {
        if !self.has_wildcard {
            return self.pattern == name;
        }
        let name_segments: Vec<&str> = name.split(self.delimiter).collect();
        match_segments(&self.segments, &name_segments)
    }
}

fn match_segments(pattern: &[Segment], name: &[&str]) -> bool {
    let Some((head, pattern_rest)) = pattern.split_first() else {
        return name.is_empty();
    };
    match head {
        Segment::Multi => {
            // `**` may consume any prefix of the remaining name segments,
            // including none — try shortest-to-longest and accept the
            // first consumption that lets the rest of the pattern match.
            (0..=name.len()).any(|consumed| match_segments(pattern_rest, &name[consumed..]))
        }
        Segment::Single => match name.split_first() {
            Some((first, name_rest)) if !first.is_empty() => {
                match_segments(pattern_rest, name_rest)
            }
            _ => false,
        },
        Segment::Literal(literal) => match name.split_first() {
            Some((first, name_rest)) if first == literal => match_segments(pattern_rest, name_rest),
            _ => false,
        },
    }
}

/// Constant-time test for whether `pattern` contains a wildcard segment.
///
/// This is a plain substring scan, not a compile; use it to skip matcher
/// compilation entirely for patterns that are known to be literal.
#[must_use]
pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains('*')
}

/// Returns true iff `name` satisfies `pattern` under `delimiter`, without
/// consulting or populating a cache. Prefer [`PatternCache::get_matcher`]
/// on a hot path that repeats the same pattern across many emissions.
#[must_use]
pub fn matches(name: &str, pattern: &str, delimiter: char) -> bool {
    Matcher::compile(pattern, delimiter).is_match(name)
}

/// Bounded LRU cache of compiled matchers, keyed by `(pattern, delimiter)`.
///
/// Capacity is fixed at [`CACHE_CAPACITY`]; the oldest (least recently
/// used) entry is evicted once the cache is full and a new pattern is
/// compiled. Safe to share across threads behind a shared reference —
/// interior mutability is a plain mutex, adequate for the kernel's
/// single-threaded cooperative scheduling model.
pub struct PatternCache {
    inner: Mutex<LruCache<(String, char), Arc<Matcher>>>,
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternCache {
    /// Creates an empty cache with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        #[allow(clippy::missing_panics_doc)]
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached matcher for `(pattern, delimiter)`, compiling and
    /// inserting it on a miss.
    #[must_use]
    pub fn get_matcher(&self, pattern: &str, delimiter: char) -> Arc<Matcher> {
        let key = (pattern.to_owned(), delimiter);
        let mut cache = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(hit) = cache.get(&key) {
            return Arc::clone(hit);
        }
        let compiled = Arc::new(Matcher::compile(pattern, delimiter));
        cache.put(key, Arc::clone(&compiled));
        compiled
    }

    /// Number of matchers currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the cache currently holds no matchers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
