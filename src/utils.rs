use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use crate::figure::{Map, Value};

// Cached regexes, compiled once
static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\[\]]*)((?:\[\d+\])*)$").unwrap());
static INDEX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").unwrap());

/// How far past the end of a list `set_path` may write, padding with nulls.
pub const MAX_LIST_PADDING: usize = 1024;

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {:?}", path))?;
    }
    Ok(())
}

/// Find the largest char boundary in `s` that is <= `max_bytes`.
/// Safe for slicing: `&s[..find_char_boundary(s, max_bytes)]` never panics.
pub fn find_char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

/// One step of a plotly property path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    fn as_key(&self) -> String {
        match self {
            PathSegment::Key(k) => k.clone(),
            PathSegment::Index(i) => i.to_string(),
        }
    }

    fn empty_container(&self) -> Value {
        match self {
            PathSegment::Key(_) => Value::Map(Map::new()),
            PathSegment::Index(_) => Value::List(Vec::new()),
        }
    }
}

/// Parse a property path such as `marker.color`, `xaxis.range[1]` or
/// `transforms.0.value`. Purely numeric dotted segments become indexes.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    if path.is_empty() {
        bail!("Empty property path");
    }
    let mut segments = Vec::new();
    for part in path.split('.') {
        let caps = SEGMENT_RE
            .captures(part)
            .ok_or_else(|| anyhow!("Invalid property path '{}'", path))?;
        let key = &caps[1];
        if key.is_empty() {
            bail!("Empty segment in property path '{}'", path);
        }
        match key.parse::<usize>() {
            Ok(i) => segments.push(PathSegment::Index(i)),
            Err(_) => segments.push(PathSegment::Key(key.to_string())),
        }
        for index in INDEX_RE.captures_iter(&caps[2]) {
            let i = index[1]
                .parse::<usize>()
                .with_context(|| format!("Index out of range in '{}'", path))?;
            segments.push(PathSegment::Index(i));
        }
    }
    Ok(segments)
}

pub fn get_path<'a>(map: &'a Map, path: &[PathSegment]) -> Option<&'a Value> {
    let (head, rest) = path.split_first()?;
    let mut current = map.get(&head.as_key())?;
    for segment in rest {
        current = match (current, segment) {
            (Value::Map(m), seg) => m.get(&seg.as_key())?,
            (Value::List(items), PathSegment::Index(i)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set `value` at `path`, creating intermediate containers as needed.
/// Returns whether anything changed.
pub fn set_path(map: &mut Map, path: &[PathSegment], value: Value) -> Result<bool> {
    let (head, rest) = path
        .split_first()
        .ok_or_else(|| anyhow!("Empty property path"))?;
    let key = head.as_key();
    if rest.is_empty() {
        if map.get(&key) == Some(&value) {
            return Ok(false);
        }
        map.insert(key, value);
        return Ok(true);
    }
    let child = map
        .entry(key)
        .or_insert_with(|| rest[0].empty_container());
    set_in_value(child, rest, value)
}

fn set_in_value(target: &mut Value, path: &[PathSegment], value: Value) -> Result<bool> {
    if matches!(target, Value::Null) {
        *target = path[0].empty_container();
    }
    match target {
        Value::Map(m) => set_path(m, path, value),
        Value::List(items) => {
            let (head, rest) = path
                .split_first()
                .ok_or_else(|| anyhow!("Empty property path"))?;
            let PathSegment::Index(i) = head else {
                bail!("Cannot index a list with key '{}'", head.as_key());
            };
            if *i > items.len() + MAX_LIST_PADDING {
                bail!(
                    "List index {} is too far past the end of a list of length {}",
                    i,
                    items.len()
                );
            }
            let mut changed = false;
            while items.len() <= *i {
                items.push(Value::Null);
                changed = true;
            }
            if rest.is_empty() {
                if items[*i] == value {
                    return Ok(changed);
                }
                items[*i] = value;
                return Ok(true);
            }
            Ok(set_in_value(&mut items[*i], rest, value)? || changed)
        }
        other => bail!(
            "Cannot set '{}' inside a scalar value {:?}",
            path[0].as_key(),
            other
        ),
    }
}

/// Remove the value at `path`. List elements are reset to null rather than
/// shifted so sibling indexes stay stable. Returns whether anything changed.
pub fn remove_path(map: &mut Map, path: &[PathSegment]) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return false;
    };
    let key = head.as_key();
    if rest.is_empty() {
        return map.shift_remove(&key).is_some();
    }
    match map.get_mut(&key) {
        Some(child) => remove_in_value(child, rest),
        None => false,
    }
}

fn remove_in_value(target: &mut Value, path: &[PathSegment]) -> bool {
    match target {
        Value::Map(m) => remove_path(m, path),
        Value::List(items) => {
            let Some((PathSegment::Index(i), rest)) = path.split_first() else {
                return false;
            };
            let Some(item) = items.get_mut(*i) else {
                return false;
            };
            if rest.is_empty() {
                let changed = !matches!(item, Value::Null);
                *item = Value::Null;
                changed
            } else {
                remove_in_value(item, rest)
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(json: serde_json::Value) -> Map {
        match Value::from(json) {
            Value::Map(m) => m,
            other => panic!("not a map: {:?}", other),
        }
    }

    #[test]
    fn test_parse_path_dotted() {
        assert_eq!(
            parse_path("marker.color").unwrap(),
            vec![
                PathSegment::Key("marker".into()),
                PathSegment::Key("color".into())
            ]
        );
    }

    #[test]
    fn test_parse_path_brackets_and_numeric_segments() {
        assert_eq!(
            parse_path("annotations[1].text").unwrap(),
            vec![
                PathSegment::Key("annotations".into()),
                PathSegment::Index(1),
                PathSegment::Key("text".into())
            ]
        );
        assert_eq!(
            parse_path("transforms.0.value").unwrap(),
            vec![
                PathSegment::Key("transforms".into()),
                PathSegment::Index(0),
                PathSegment::Key("value".into())
            ]
        );
    }

    #[test]
    fn test_parse_path_invalid() {
        assert!(parse_path("").is_err());
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[x]").is_err());
    }

    #[test]
    fn test_set_path_creates_containers() {
        let mut m = Map::new();
        let path = parse_path("xaxis.range[1]").unwrap();
        assert!(set_path(&mut m, &path, Value::Int(10)).unwrap());
        assert_eq!(
            serde_json::to_value(&m).unwrap(),
            json!({"xaxis": {"range": [null, 10]}})
        );
    }

    #[test]
    fn test_set_path_unchanged() {
        let mut m = map(json!({"marker": {"color": "red"}}));
        let path = parse_path("marker.color").unwrap();
        assert!(!set_path(&mut m, &path, Value::from("red")).unwrap());
        assert!(set_path(&mut m, &path, Value::from("blue")).unwrap());
        assert_eq!(get_path(&m, &path), Some(&Value::from("blue")));
    }

    #[test]
    fn test_set_path_into_scalar_fails() {
        let mut m = map(json!({"name": "a"}));
        let path = parse_path("name.first").unwrap();
        assert!(set_path(&mut m, &path, Value::Int(1)).is_err());
    }

    #[test]
    fn test_set_path_rejects_far_index() {
        let mut m = map(json!({"xaxis": {"range": [0, 1]}}));
        let path = parse_path("xaxis.range[5000000]").unwrap();
        assert!(set_path(&mut m, &path, Value::Int(1)).is_err());
        assert_eq!(
            serde_json::to_value(&m).unwrap(),
            json!({"xaxis": {"range": [0, 1]}})
        );

        let path = parse_path("xaxis.range[4]").unwrap();
        assert!(set_path(&mut m, &path, Value::Int(1)).unwrap());
    }

    #[test]
    fn test_remove_path() {
        let mut m = map(json!({"marker": {"color": "red", "size": 3}}));
        assert!(remove_path(&mut m, &parse_path("marker.color").unwrap()));
        assert!(!remove_path(&mut m, &parse_path("marker.color").unwrap()));
        assert_eq!(serde_json::to_value(&m).unwrap(), json!({"marker": {"size": 3}}));
    }

    #[test]
    fn test_ensure_dir_creates_new() {
        use std::path::PathBuf;
        let temp_dir = PathBuf::from("test_temp_dir_plotly_pane_12345");
        let _ = fs::remove_dir_all(&temp_dir);

        assert!(ensure_dir(&temp_dir).is_ok());
        assert!(temp_dir.exists());

        let _ = fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn test_find_char_boundary_multibyte() {
        let s = "Héllo wörld";
        assert_eq!(find_char_boundary(s, 2), 1);
        assert_eq!(find_char_boundary(s, 3), 3);
        assert_eq!(find_char_boundary(s, 100), s.len());
    }
}
