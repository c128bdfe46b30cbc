use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::array::{Array, ArrayData};

/// Ordered string-keyed mapping used for traces, layouts and nested objects.
pub type Map = IndexMap<String, Value>;

/// A dynamically typed figure value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Map(Map),
    Array(Array),
}

impl Value {
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Value::Date(_) | Value::DateTime(_))
    }

    /// Dynamic truthiness: null, false, zero and empty containers are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Date(_) | Value::DateTime(_) => true,
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Array(a) => !a.is_empty(),
        }
    }

    /// String form of a date or datetime scalar.
    pub fn temporal_string(&self) -> Option<String> {
        match self {
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => Some(dt.to_string()),
            _ => None,
        }
    }

    /// Turn numeric lists into bulk arrays, recursively.
    ///
    /// Figures loaded from plain JSON carry no native arrays; this gives the
    /// extractor something to move into columnar buffers. A list of equally
    /// long numeric rows becomes a two-dimensional array.
    pub fn promote_numeric_lists(&mut self) {
        match self {
            Value::Map(map) => {
                for value in map.values_mut() {
                    value.promote_numeric_lists();
                }
            }
            Value::List(items) => {
                if let Some(array) = numeric_array(items) {
                    *self = Value::Array(array);
                } else if let Some(array) = numeric_matrix(items) {
                    *self = Value::Array(array);
                } else {
                    for item in items.iter_mut() {
                        item.promote_numeric_lists();
                    }
                }
            }
            _ => {}
        }
    }
}

fn numeric_array(items: &[Value]) -> Option<Array> {
    if items.is_empty() {
        return None;
    }
    if items.iter().all(|v| matches!(v, Value::Int(_))) {
        let ints = items
            .iter()
            .filter_map(|v| match v {
                Value::Int(i) => Some(*i),
                _ => None,
            })
            .collect();
        return Some(Array::from_i64(ints));
    }
    let floats = items.iter().map(Value::as_f64).collect::<Option<Vec<_>>>()?;
    Some(Array::from_f64(floats))
}

fn numeric_matrix(items: &[Value]) -> Option<Array> {
    let first = items.first()?.as_list()?;
    let cols = first.len();
    if cols == 0 {
        return None;
    }
    let mut flat = Vec::with_capacity(items.len() * cols);
    for row in items {
        let row = row.as_list()?;
        if row.len() != cols {
            return None;
        }
        for v in row {
            flat.push(v.as_f64()?);
        }
    }
    Array::with_shape(ArrayData::Float(flat), vec![items.len(), cols]).ok()
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => match Array::decode(&obj) {
                Some(array) => Value::Array(array),
                None => Value::Map(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(_) => serializer.serialize_unit(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Date(_) | Value::DateTime(_) => {
                serializer.serialize_str(&self.temporal_string().unwrap_or_default())
            }
            Value::List(items) => items.serialize(serializer),
            Value::Map(map) => map.serialize(serializer),
            Value::Array(array) => array.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_key_order() {
        let value = Value::from(json!({"z": 1, "a": 2, "m": 3}));
        let keys: Vec<_> = value.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(Value::from(json!(3)), Value::Int(3));
        assert_eq!(Value::from(json!(3.5)), Value::Float(3.5));
    }

    #[test]
    fn test_from_json_decodes_ndarray() {
        let encoded = serde_json::to_value(Array::from_i64(vec![4, 5])).unwrap();
        assert_eq!(
            Value::from(encoded),
            Value::Array(Array::from_i64(vec![4, 5]))
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::String("x".into()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
    }

    #[test]
    fn test_promote_numeric_lists() {
        let mut value = Value::from(json!({
            "x": [1, 2, 3],
            "y": [1.5, 2, 3],
            "text": ["a", "b"],
            "z": [[1, 2], [3, 4]],
            "empty": []
        }));
        value.promote_numeric_lists();
        let map = value.as_map().unwrap();
        assert_eq!(map["x"], Value::Array(Array::from_i64(vec![1, 2, 3])));
        assert_eq!(map["y"], Value::Array(Array::from_f64(vec![1.5, 2.0, 3.0])));
        assert!(matches!(map["text"], Value::List(_)));
        assert!(matches!(map["empty"], Value::List(_)));
        match &map["z"] {
            Value::Array(a) => assert_eq!(a.shape(), &[2, 2]),
            other => panic!("expected matrix, got {:?}", other),
        }
    }

    #[test]
    fn test_serialize_temporal_and_nan() {
        let date = NaiveDate::from_ymd_opt(2021, 3, 4).unwrap();
        let value = Value::List(vec![Value::Date(date), Value::Float(f64::NAN)]);
        assert_eq!(serde_json::to_value(&value).unwrap(), json!(["2021-03-04", null]));
    }
}
