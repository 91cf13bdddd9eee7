//! Configuration snapshot and dotted-path lookup.
//!
//! A snapshot is the parsed settings document frozen at one point in time.
//! Lookups use dotted paths (`"encryption.keyring"`) and fan out across
//! arrays, so `"servers.host"` against `{"servers": [{"host": "a"}, {"host": "b"}]}`
//! resolves to `["a", "b"]`.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Immutable view of one successfully parsed settings document.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    root: Value,
    generation: u64,
    source: PathBuf,
}

impl ConfigSnapshot {
    /// Wrap a parsed document. The generation starts at zero and is assigned
    /// by the store when the snapshot is published.
    pub fn new(root: Value, source: impl Into<PathBuf>) -> Self {
        Self {
            root,
            generation: 0,
            source: source.into(),
        }
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Publish counter; 1 for the initial load, incremented per accepted reload.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// File the snapshot was read from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Raw document tree.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// First value at `path`, or `""` when the path does not resolve.
    pub fn get(&self, path: &str) -> String {
        self.values(path).into_iter().next().unwrap_or_default()
    }

    /// Every value at `path` in document order; empty when the path does not resolve.
    pub fn get_all(&self, path: &str) -> Vec<String> {
        self.values(path)
    }

    /// Whether `path` resolves to at least one value.
    pub fn contains(&self, path: &str) -> bool {
        !self.values(path).is_empty()
    }

    /// Set `path` to `value`, creating intermediate tables as needed.
    ///
    /// Intended for validators filling defaults into a candidate snapshot
    /// before it is published. Non-table intermediates are replaced.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let mut segments = path.split('.').filter(|s| !s.is_empty()).peekable();
        let mut node = &mut self.root;
        while let Some(segment) = segments.next() {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let Some(map) = node.as_object_mut() else {
                return;
            };
            if segments.peek().is_none() {
                map.insert(segment.to_string(), value.into());
                return;
            }
            node = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }

    fn values(&self, path: &str) -> Vec<String> {
        if path.is_empty() {
            return Vec::new();
        }

        let mut current = vec![&self.root];
        for segment in path.split('.') {
            let mut next = Vec::new();
            for node in current {
                collect_child(node, segment, &mut next);
            }
            if next.is_empty() {
                return Vec::new();
            }
            current = next;
        }

        let mut out = Vec::new();
        for node in current {
            flatten_leaf(node, &mut out);
        }
        out
    }
}

fn collect_child<'a>(node: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match node {
        Value::Object(map) => {
            if let Some(child) = map.get(segment) {
                out.push(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_child(item, segment, out);
            }
        }
        _ => {}
    }
}

fn flatten_leaf(node: &Value, out: &mut Vec<String>) {
    match node {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => {
            for item in items {
                flatten_leaf(item, out);
            }
        }
        Value::Null | Value::Object(_) => {}
    }
}
