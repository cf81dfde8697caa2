//! Dotted key-path utilities
//!
//! Block keys use dot-separated paths (`"a.b.c"`) to place values in a
//! nested output structure. This module keeps the mapping between the
//! flat dotted form and the nested form: resolving a path against a
//! nested input for encoding, inserting along a path (with deep merge
//! of sibling branches) for decoding, and collision detection over a
//! flattened key list for schema validation.

use core::fmt;

use serde_json::{Map, Value};

/// An ordered sequence of path segments parsed from a dotted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// Parse a dotted key into its segments
    pub fn parse(key: &str) -> Self {
        Self {
            segments: key.split('.').map(str::to_owned).collect(),
        }
    }

    /// The path segments in order
    #[inline]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Resolve a path against a nested mapping, descending one segment at
/// a time. Returns `None` if any segment is absent or a non-object is
/// hit before the last segment.
pub fn get_value<'a>(obj: &'a Value, path: &KeyPath) -> Option<&'a Value> {
    let mut current = obj;
    for segment in path.segments() {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Insert `value` into `map` along `path`, creating intermediate
/// objects as needed and deep-merging when the leaf is itself an
/// object landing on an existing branch. Leaf collisions are
/// last-writer-wins; the schema-level collision check rejects specs
/// that could reach one.
pub fn insert_value(map: &mut Map<String, Value>, path: &KeyPath, value: Value) {
    let (last, parents) = match path.segments().split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = map;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry.as_object_mut() {
            Some(obj) => obj,
            None => return,
        };
    }

    match (current.get_mut(last), value) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            merge(existing, incoming);
        }
        (_, value) => {
            current.insert(last.clone(), value);
        }
    }
}

/// Deep-merge `src` into `dst`: object branches merge recursively,
/// anything else overwrites.
pub fn merge(dst: &mut Map<String, Value>, src: Map<String, Value>) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge(existing, incoming);
            }
            (_, value) => {
                dst.insert(key, value);
            }
        }
    }
}

/// Find a collision in a list of flattened dotted keys: an exact
/// duplicate, or a key that is a strict prefix of another (which could
/// never produce a well-formed nested output). Returns the offending
/// key.
pub fn find_collision(keys: &[String]) -> Option<String> {
    let mut sorted: Vec<&str> = keys.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        if pair[0] == pair[1] {
            return Some(pair[0].to_owned());
        }
        if pair[1].len() > pair[0].len()
            && pair[1].starts_with(pair[0])
            && pair[1].as_bytes()[pair[0].len()] == b'.'
        {
            return Some(pair[0].to_owned());
        }
    }
    None
}
