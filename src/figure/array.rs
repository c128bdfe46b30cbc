use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::NaiveDateTime;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Element type of a bulk array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Float64,
    Int64,
    Bool,
    Str,
    DateTime,
}

impl DType {
    pub fn name(&self) -> &'static str {
        match self {
            DType::Float64 => "float64",
            DType::Int64 => "int64",
            DType::Bool => "bool",
            DType::Str => "str",
            DType::DateTime => "datetime",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
    DateTime(Vec<NaiveDateTime>),
}

impl ArrayData {
    fn len(&self) -> usize {
        match self {
            ArrayData::Float(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::Bool(v) => v.len(),
            ArrayData::Str(v) => v.len(),
            ArrayData::DateTime(v) => v.len(),
        }
    }
}

/// A bulk, homogeneously typed array with a shape.
///
/// These are the values the extractor moves out of traces into columnar
/// buffers. Plain `Value::List`s are never treated as bulk arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    data: ArrayData,
    shape: Vec<usize>,
}

impl Array {
    /// One-dimensional array over `data`.
    pub fn new(data: ArrayData) -> Self {
        let shape = vec![data.len()];
        Self { data, shape }
    }

    pub fn with_shape(data: ArrayData, shape: Vec<usize>) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d))
            .ok_or_else(|| anyhow!("shape {:?} overflows the element count", shape))?;
        if expected != data.len() {
            return Err(anyhow!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            ));
        }
        Ok(Self { data, shape })
    }

    pub fn from_f64(values: Vec<f64>) -> Self {
        Self::new(ArrayData::Float(values))
    }

    pub fn from_i64(values: Vec<i64>) -> Self {
        Self::new(ArrayData::Int(values))
    }

    pub fn from_bool(values: Vec<bool>) -> Self {
        Self::new(ArrayData::Bool(values))
    }

    pub fn from_strings<S: Into<String>>(values: Vec<S>) -> Self {
        Self::new(ArrayData::Str(values.into_iter().map(Into::into).collect()))
    }

    pub fn from_datetimes(values: Vec<NaiveDateTime>) -> Self {
        Self::new(ArrayData::DateTime(values))
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self.data {
            ArrayData::Float(_) => DType::Float64,
            ArrayData::Int(_) => DType::Int64,
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::Str(_) => DType::Str,
            ArrayData::DateTime(_) => DType::DateTime,
        }
    }

    pub fn is_datetime(&self) -> bool {
        self.dtype() == DType::DateTime
    }

    /// Datetime arrays become string arrays of the same shape; other dtypes
    /// are returned unchanged.
    pub fn stringify_datetimes(self) -> Self {
        match self.data {
            ArrayData::DateTime(values) => Self {
                data: ArrayData::Str(values.iter().map(ToString::to_string).collect()),
                shape: self.shape,
            },
            data => Self {
                data,
                shape: self.shape,
            },
        }
    }

    /// Change test used by the diff engine: dtype, then shape, then elements.
    ///
    /// Float elements compare with IEEE semantics, so a NaN anywhere counts
    /// as a change.
    pub fn differs_from(&self, other: &Array) -> bool {
        if self.dtype() != other.dtype() {
            return true;
        }
        if self.shape != other.shape {
            return true;
        }
        match (&self.data, &other.data) {
            (ArrayData::Float(a), ArrayData::Float(b)) => a.iter().zip(b).any(|(x, y)| x != y),
            (ArrayData::Int(a), ArrayData::Int(b)) => a != b,
            (ArrayData::Bool(a), ArrayData::Bool(b)) => a != b,
            (ArrayData::Str(a), ArrayData::Str(b)) => a != b,
            (ArrayData::DateTime(a), ArrayData::DateTime(b)) => a != b,
            _ => true,
        }
    }

    /// Decode the binary ndarray encoding produced by `Serialize`.
    ///
    /// Returns `None` when `obj` is not a well-formed encoded array.
    pub fn decode(obj: &serde_json::Map<String, serde_json::Value>) -> Option<Array> {
        let encoded = obj.get("__ndarray__")?.as_str()?;
        let dtype = obj.get("dtype")?.as_str()?;
        let bytes = STANDARD.decode(encoded).ok()?;
        let data = match dtype {
            "float64" => ArrayData::Float(
                chunks::<8>(&bytes)?.map(f64::from_le_bytes).collect(),
            ),
            "float32" => ArrayData::Float(
                chunks::<4>(&bytes)?
                    .map(|b| f32::from_le_bytes(b) as f64)
                    .collect(),
            ),
            "int64" => ArrayData::Int(chunks::<8>(&bytes)?.map(i64::from_le_bytes).collect()),
            "int32" => ArrayData::Int(
                chunks::<4>(&bytes)?
                    .map(|b| i32::from_le_bytes(b) as i64)
                    .collect(),
            ),
            "bool" => ArrayData::Bool(bytes.iter().map(|b| *b != 0).collect()),
            "uint8" => ArrayData::Int(bytes.iter().map(|b| *b as i64).collect()),
            _ => return None,
        };
        let shape = match obj.get("shape").and_then(|s| s.as_array()) {
            Some(dims) => dims
                .iter()
                .map(|d| d.as_u64().map(|d| d as usize))
                .collect::<Option<Vec<_>>>()?,
            None => vec![data.len()],
        };
        Array::with_shape(data, shape).ok()
    }

    fn encoded_bytes(&self) -> Option<Vec<u8>> {
        match &self.data {
            ArrayData::Float(v) => Some(v.iter().flat_map(|x| x.to_le_bytes()).collect()),
            ArrayData::Int(v) => Some(v.iter().flat_map(|x| x.to_le_bytes()).collect()),
            ArrayData::Bool(v) => Some(v.iter().map(|b| *b as u8).collect()),
            ArrayData::Str(_) | ArrayData::DateTime(_) => None,
        }
    }
}

fn chunks<const N: usize>(bytes: &[u8]) -> Option<impl Iterator<Item = [u8; N]> + '_> {
    if bytes.len() % N != 0 {
        return None;
    }
    Some(bytes.chunks_exact(N).map(|c| {
        let mut buf = [0u8; N];
        buf.copy_from_slice(c);
        buf
    }))
}

impl Serialize for Array {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if let Some(bytes) = self.encoded_bytes() {
            let mut map = serializer.serialize_map(Some(4))?;
            map.serialize_entry("__ndarray__", &STANDARD.encode(bytes))?;
            map.serialize_entry("dtype", self.dtype().name())?;
            map.serialize_entry("shape", &self.shape)?;
            map.serialize_entry("order", "little")?;
            return map.end();
        }

        // Object dtypes travel as plain JSON lists.
        let strings: Vec<String> = match &self.data {
            ArrayData::Str(v) => v.clone(),
            ArrayData::DateTime(v) => v.iter().map(ToString::to_string).collect(),
            _ => Vec::new(),
        };
        Nested {
            items: &strings,
            shape: &self.shape,
        }
        .serialize(serializer)
    }
}

/// Row-major nesting of a flat list by `shape`.
struct Nested<'a> {
    items: &'a [String],
    shape: &'a [usize],
}

impl Serialize for Nested<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let [outer, inner @ ..] = self.shape else {
            return self.items.serialize(serializer);
        };
        if inner.is_empty() {
            return self.items.serialize(serializer);
        }
        let stride: usize = inner.iter().product();
        let mut seq = serializer.serialize_seq(Some(*outer))?;
        for row in 0..*outer {
            let start = (row * stride).min(self.items.len());
            let end = (start + stride).min(self.items.len());
            seq.serialize_element(&Nested {
                items: &self.items[start..end],
                shape: inner,
            })?;
        }
        seq.end()
    }
}
