//! Splits bulk arrays out of traces into per-trace columnar buffers.
//!
//! Structural trace data stays small and JSON friendly while array payloads
//! travel in their binary encoding.

use anyhow::Result;
use indexmap::IndexMap;
use serde::Serialize;

use crate::figure::{Array, Figure, Map, Trace, Value};
use crate::utils::{parse_path, set_path};

/// Bulk arrays of one trace keyed by dotted property path. Every column
/// wraps exactly one array.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ColumnarBuffer {
    columns: IndexMap<String, Vec<Array>>,
}

impl ColumnarBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, array: Array) {
        self.columns.insert(key.into(), vec![array]);
    }

    /// The array wrapped in column `key`.
    pub fn get(&self, key: &str) -> Option<&Array> {
        self.columns.get(key).and_then(|column| column.first())
    }

    pub fn column(&self, key: &str) -> Option<&[Array]> {
        self.columns.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array)> {
        self.columns
            .iter()
            .filter_map(|(k, column)| column.first().map(|a| (k.as_str(), a)))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Overwrite every column of `fresh` whose array differs from the stored
    /// one and return the keys that changed. Columns absent from `fresh` are
    /// left alone.
    pub fn update_from(&mut self, fresh: ColumnarBuffer) -> Vec<String> {
        let mut changed = Vec::new();
        for (key, mut column) in fresh.columns {
            let Some(new) = column.pop() else {
                continue;
            };
            let update = match self.get(&key) {
                Some(old) => old.differs_from(&new),
                None => true,
            };
            if update {
                self.insert(key.clone(), new);
                changed.push(key);
            }
        }
        changed
    }
}

/// Remove every bulk array from `trace` (depth first, in key order, through
/// nested mappings and lists of mappings) and return them as a buffer keyed
/// by dotted path.
pub fn extract_arrays(trace: &mut Trace) -> ColumnarBuffer {
    let mut buffer = ColumnarBuffer::new();
    extract_into(trace, &mut buffer, "");
    buffer
}

fn extract_into(map: &mut Map, buffer: &mut ColumnarBuffer, parent: &str) {
    let keys: Vec<String> = map.keys().cloned().collect();
    for key in keys {
        let full_path = if parent.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", parent, key)
        };

        if matches!(map.get(&key), Some(Value::Array(_))) {
            if let Some(Value::Array(array)) = map.shift_remove(&key) {
                buffer.insert(full_path, array);
            }
            continue;
        }

        match map.get_mut(&key) {
            Some(Value::Map(child)) => extract_into(child, buffer, &full_path),
            Some(Value::List(items)) if matches!(items.first(), Some(Value::Map(_))) => {
                for (i, item) in items.iter_mut().enumerate() {
                    if let Value::Map(child) = item {
                        extract_into(child, buffer, &format!("{}.{}", full_path, i));
                    }
                }
            }
            _ => {}
        }
    }
}

/// Extract every trace of `figure` in place, one buffer per trace.
pub fn get_sources(figure: &mut Figure) -> Vec<ColumnarBuffer> {
    figure.data.iter_mut().map(extract_arrays).collect()
}

/// Put the arrays of `buffer` back into `trace` at their paths.
pub fn merge_arrays(trace: &mut Trace, buffer: &ColumnarBuffer) -> Result<()> {
    for (key, array) in buffer.iter() {
        let path = parse_path(key)?;
        set_path(trace, &path, Value::Array(array.clone()))?;
    }
    Ok(())
}
