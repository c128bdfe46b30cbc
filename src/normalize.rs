//! Coerces the accepted input shapes into one canonical [`Figure`].

use anyhow::{anyhow, Result};

use crate::figure::{Figure, Layout, Map, PlotlyFigure, Trace, Value};

/// Anything a pane can display.
#[derive(Debug)]
pub enum PaneObject {
    /// A native figure object; the only shape whose mutations are observed.
    Figure(PlotlyFigure),
    /// A mapping with `data` and `layout` keys.
    Dict(Map),
    /// A `(data, layout)` pair.
    Parts { data: Value, layout: Value },
    /// A single trace or a list of traces, with an empty layout.
    Traces(Value),
}

impl PaneObject {
    /// Classify a dynamic value, rejecting shapes no pane can render.
    pub fn from_value(value: Value) -> Result<Self> {
        if !applies(&value) {
            return Err(anyhow!(
                "Value is not a figure, a trace, or a list of traces"
            ));
        }
        match value {
            Value::Map(map) if map.contains_key("data") && map.contains_key("layout") => {
                Ok(PaneObject::Dict(map))
            }
            other => Ok(PaneObject::Traces(other)),
        }
    }

    pub fn is_figure(&self) -> bool {
        matches!(self, PaneObject::Figure(_))
    }
}

impl From<PlotlyFigure> for PaneObject {
    fn from(figure: PlotlyFigure) -> Self {
        PaneObject::Figure(figure)
    }
}

/// Whether a value can be displayed: a non-empty list of displayable values,
/// a mapping with `data` and `layout`, or a single trace (a mapping with a
/// `type`).
pub fn applies(value: &Value) -> bool {
    match value {
        Value::List(items) => !items.is_empty() && items.iter().all(applies),
        Value::Map(map) => {
            (map.contains_key("data") && map.contains_key("layout")) || map.contains_key("type")
        }
        _ => false,
    }
}

/// Produce the canonical figure for `object`. Only the shape is coerced:
/// data that is not a sequence is wrapped as a one-element sequence.
pub fn to_figure(object: &PaneObject) -> Figure {
    match object {
        PaneObject::Figure(figure) => figure.figure().clone(),
        PaneObject::Dict(map) => Figure::new(
            coerce_traces(map.get("data").unwrap_or(&Value::Null)),
            coerce_layout(map.get("layout").unwrap_or(&Value::Null)),
        ),
        PaneObject::Parts { data, layout } => {
            Figure::new(coerce_traces(data), coerce_layout(layout))
        }
        PaneObject::Traces(data) => Figure::new(coerce_traces(data), Layout::new()),
    }
}

/// Canonical figure with datetime leaves converted to strings, ready for
/// extraction and transport.
pub fn figure_json(object: &PaneObject) -> Figure {
    let mut figure = to_figure(object);
    normalize_datetimes(&mut figure);
    figure
}

/// Number of entries in the object's trace list that are not mappings and
/// are left out of the canonical figure.
pub fn dropped_trace_entries(object: &PaneObject) -> usize {
    let data = match object {
        PaneObject::Figure(_) => return 0,
        PaneObject::Dict(map) => map.get("data"),
        PaneObject::Parts { data, .. } | PaneObject::Traces(data) => Some(data),
    };
    match data {
        Some(Value::List(items)) => items.iter().filter(|v| v.as_map().is_none()).count(),
        _ => 0,
    }
}

// Entries that are not mappings cannot be traces and are dropped.
fn coerce_traces(data: &Value) -> Vec<Trace> {
    match data {
        Value::List(items) => items.iter().filter_map(|v| v.as_map().cloned()).collect(),
        Value::Map(trace) => vec![trace.clone()],
        _ => Vec::new(),
    }
}

fn coerce_layout(layout: &Value) -> Layout {
    layout.as_map().cloned().unwrap_or_default()
}

/// Replace datetime arrays and all-datetime lists with their string forms,
/// in every trace.
pub fn normalize_datetimes(figure: &mut Figure) {
    for trace in figure.data.iter_mut() {
        normalize_map(trace);
    }
}

fn normalize_map(map: &mut Map) {
    for value in map.values_mut() {
        normalize_value(value);
    }
}

fn normalize_value(value: &mut Value) {
    match value {
        Value::Array(array) if array.is_datetime() => {
            *array = array.clone().stringify_datetimes();
        }
        Value::List(items) if !items.is_empty() && items.iter().all(Value::is_temporal) => {
            let strings = items
                .iter()
                .filter_map(Value::temporal_string)
                .map(Value::String)
                .collect();
            *value = Value::List(strings);
        }
        Value::List(items) => {
            for item in items.iter_mut().filter(|v| v.as_map().is_some()) {
                normalize_value(item);
            }
        }
        Value::Map(map) => normalize_map(map),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::figure::{Array, ArrayData};
    use chrono::NaiveDate;
    use serde_json::json;

    fn value(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn test_applies() {
        assert!(applies(&value(json!({"data": [], "layout": {}}))));
        assert!(applies(&value(json!({"type": "scatter"}))));
        assert!(applies(&value(json!([{"type": "scatter"}, {"type": "bar"}]))));
        assert!(!applies(&value(json!([]))));
        assert!(!applies(&value(json!([{"type": "scatter"}, 3]))));
        assert!(!applies(&value(json!({"data": []}))));
        assert!(!applies(&value(json!("scatter"))));
    }

    #[test]
    fn test_from_value_dict_and_traces() {
        let dict = PaneObject::from_value(value(json!({"data": [], "layout": {}}))).unwrap();
        assert!(matches!(dict, PaneObject::Dict(_)));
        let traces = PaneObject::from_value(value(json!({"type": "bar"}))).unwrap();
        assert!(matches!(traces, PaneObject::Traces(_)));
        assert!(PaneObject::from_value(value(json!(1))).is_err());
    }

    #[test]
    fn test_to_figure_wraps_single_trace() {
        let object = PaneObject::Parts {
            data: value(json!({"type": "scatter", "y": [1]})),
            layout: value(json!({"title": {"text": "t"}})),
        };
        let figure = to_figure(&object);
        assert_eq!(figure.data.len(), 1);
        assert!(figure.layout.contains_key("title"));
    }

    #[test]
    fn test_to_figure_from_dict_and_trace_list() {
        let dict = PaneObject::Dict(
            value(json!({"data": [{"type": "bar"}, {"type": "scatter"}], "layout": {"autosize": true}}))
                .as_map()
                .cloned()
                .unwrap(),
        );
        let figure = to_figure(&dict);
        assert_eq!(figure.data.len(), 2);
        assert_eq!(figure.layout["autosize"], Value::Bool(true));

        let traces = PaneObject::Traces(value(json!([{"type": "bar"}])));
        let figure = to_figure(&traces);
        assert_eq!(figure.data.len(), 1);
        assert!(figure.layout.is_empty());
    }

    #[test]
    fn test_non_mapping_trace_entries_are_counted_and_dropped() {
        let object = PaneObject::Parts {
            data: value(json!([{"type": "bar"}, 3, "scatter"])),
            layout: value(json!({})),
        };
        assert_eq!(to_figure(&object).data.len(), 1);
        assert_eq!(dropped_trace_entries(&object), 2);

        let clean = PaneObject::Traces(value(json!([{"type": "bar"}])));
        assert_eq!(dropped_trace_entries(&clean), 0);
    }

    #[test]
    fn test_datetime_array_and_list_become_strings() {
        let dt = NaiveDate::from_ymd_opt(2019, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        let d = NaiveDate::from_ymd_opt(2019, 5, 2).unwrap();
        let mut trace = Map::new();
        trace.insert("x".into(), Value::Array(Array::from_datetimes(vec![dt, dt])));
        trace.insert("y".into(), Value::List(vec![Value::DateTime(dt), Value::Date(d)]));
        trace.insert("z".into(), Value::List(vec![Value::Int(1)]));
        let mut figure = Figure::new(vec![trace], Map::new());

        normalize_datetimes(&mut figure);

        match &figure.data[0]["x"] {
            Value::Array(a) => match a.data() {
                ArrayData::Str(v) => assert_eq!(v[0], "2019-05-01 08:30:00"),
                other => panic!("expected strings, got {:?}", other),
            },
            other => panic!("expected array, got {:?}", other),
        }
        assert_eq!(
            figure.data[0]["y"],
            Value::List(vec![
                Value::from("2019-05-01 08:30:00"),
                Value::from("2019-05-02")
            ])
        );
        assert_eq!(figure.data[0]["z"], Value::List(vec![Value::Int(1)]));
    }

    #[test]
    fn test_native_figure_is_cloned() {
        let fig = PlotlyFigure::new(vec![Map::new()], Map::new());
        let object = PaneObject::from(fig);
        assert!(object.is_figure());
        assert_eq!(to_figure(&object).data.len(), 1);
    }
}
