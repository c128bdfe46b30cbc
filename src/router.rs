//! Inbound side of synchronization: events reported by remote views.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

use crate::figure::Map;
use crate::pane::{Pane, ViewId};

/// What the pane is doing right now. Exactly one state is active.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RouterState {
    #[default]
    Idle,
    /// Pushing a server-side change out to views; mutations arriving now
    /// are ignored.
    ApplyingLocalUpdate,
    /// Applying an event reported by `origin`.
    ApplyingRemoteEvent { origin: ViewId },
}

/// Restyle reported by a view: properties plus the traces they apply to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestyleEvent {
    pub data: Map,
    #[serde(default)]
    pub traces: Option<Vec<usize>>,
}

/// Interaction reported by a view, tagged on the wire as
/// `{"event": "<name>", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RemoteEvent {
    Restyle(RestyleEvent),
    Relayout(Map),
    Viewport(serde_json::Value),
    Selected(serde_json::Value),
    Hover(serde_json::Value),
    Click(serde_json::Value),
    ClickAnnotation(serde_json::Value),
}

impl RemoteEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteEvent::Restyle(_) => "restyle",
            RemoteEvent::Relayout(_) => "relayout",
            RemoteEvent::Viewport(_) => "viewport",
            RemoteEvent::Selected(_) => "selected",
            RemoteEvent::Hover(_) => "hover",
            RemoteEvent::Click(_) => "click",
            RemoteEvent::ClickAnnotation(_) => "click_annotation",
        }
    }
}

/// Latest payload of each event kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventFields {
    pub restyle_data: Option<RestyleEvent>,
    pub relayout_data: Option<Map>,
    pub viewport: Option<serde_json::Value>,
    pub selected_data: Option<serde_json::Value>,
    pub hover_data: Option<serde_json::Value>,
    pub click_data: Option<serde_json::Value>,
    pub clickannotation_data: Option<serde_json::Value>,
}

impl EventFields {
    pub fn record(&mut self, event: &RemoteEvent) {
        match event {
            RemoteEvent::Restyle(restyle) => self.restyle_data = Some(restyle.clone()),
            RemoteEvent::Relayout(data) => self.relayout_data = Some(data.clone()),
            RemoteEvent::Viewport(data) => self.viewport = Some(data.clone()),
            RemoteEvent::Selected(data) => self.selected_data = Some(data.clone()),
            RemoteEvent::Hover(data) => self.hover_data = Some(data.clone()),
            RemoteEvent::Click(data) => self.click_data = Some(data.clone()),
            RemoteEvent::ClickAnnotation(data) => self.clickannotation_data = Some(data.clone()),
        }
    }
}

impl Pane {
    /// Record an event from view `view`, notify watchers, and apply
    /// restyles and relayouts to the native figure. The resulting updates
    /// reach every other view; `view` itself only absorbs the diff.
    ///
    /// Returns whether the figure changed. Without a native figure the
    /// event is recorded and nothing else happens.
    pub fn handle_remote_event(&mut self, view: &ViewId, event: RemoteEvent) -> Result<bool> {
        let shared = Rc::clone(&self.shared);
        {
            let mut state = shared.borrow_mut();
            state.events.record(&event);
            state.metrics.remote_events += 1;
            if let Some(logger) = &state.logger {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                let _ = logger.log_remote_event(view.as_str(), event.name(), &payload);
            }
            for watcher in state.watchers.iter_mut() {
                watcher(&event);
            }
        }

        let Some(figure) = self.figure_mut() else {
            return Ok(false);
        };
        shared.borrow_mut().router = RouterState::ApplyingRemoteEvent {
            origin: view.clone(),
        };
        let result = match event {
            RemoteEvent::Restyle(restyle) => {
                figure.plotly_restyle(restyle.data, restyle.traces.as_deref(), Some(view))
            }
            RemoteEvent::Relayout(data) => figure.plotly_relayout(data, Some(view)),
            _ => Ok(false),
        };
        shared.borrow_mut().router = RouterState::Idle;
        result
    }

    /// Call `watcher` with every event any view reports.
    pub fn on_event<F>(&mut self, watcher: F)
    where
        F: FnMut(&RemoteEvent) + 'static,
    {
        self.shared.borrow_mut().watchers.push(Box::new(watcher));
    }

    /// Latest payload of each event kind.
    pub fn events(&self) -> EventFields {
        self.shared.borrow().events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::figure::{MutationKind, PlotlyFigure, Value};
    use crate::pane::Outbox;
    use serde_json::json;
    use std::cell::RefCell;

    fn map(json: serde_json::Value) -> Map {
        match Value::from(json) {
            Value::Map(m) => m,
            other => panic!("not a map: {:?}", other),
        }
    }

    fn pane() -> Pane {
        let figure = PlotlyFigure::new(
            vec![map(json!({"type": "scatter", "name": "a"}))],
            Map::new(),
        );
        Pane::new(Some(figure.into()))
    }

    #[test]
    fn test_event_wire_format() {
        let event: RemoteEvent =
            serde_json::from_value(json!({"event": "relayout", "data": {"xaxis.range[0]": 1.5}}))
                .unwrap();
        assert_eq!(event.name(), "relayout");

        let restyle: RemoteEvent = serde_json::from_value(
            json!({"event": "restyle", "data": {"data": {"visible": false}, "traces": [0]}}),
        )
        .unwrap();
        match restyle {
            RemoteEvent::Restyle(r) => assert_eq!(r.traces, Some(vec![0])),
            other => panic!("unexpected {:?}", other),
        }

        let click = RemoteEvent::ClickAnnotation(json!({"index": 0}));
        assert_eq!(
            serde_json::to_value(&click).unwrap(),
            json!({"event": "click_annotation", "data": {"index": 0}})
        );
    }

    #[test]
    fn test_event_with_overflowing_array_shape_stays_a_map() {
        let event: RemoteEvent = serde_json::from_value(json!({
            "event": "relayout",
            "data": {"x": {"__ndarray__": "", "dtype": "float64", "shape": [4294967296u64, 4294967296u64]}}
        }))
        .unwrap();
        let RemoteEvent::Relayout(data) = event else {
            panic!("relayout expected");
        };
        assert!(matches!(data["x"], Value::Map(_)));
    }

    #[test]
    fn test_remote_relayout_from_only_view_is_absorbed() {
        let mut pane = pane();
        let outbox = Outbox::new();
        let (view, _) = pane.attach_view(outbox.clone());

        let changed = pane
            .handle_remote_event(&view, RemoteEvent::Relayout(map(json!({"xaxis.range[1]": 4}))))
            .unwrap();

        assert!(changed);
        assert!(outbox.is_empty());
        let Some(crate::normalize::PaneObject::Figure(figure)) = pane.object() else {
            panic!("figure expected");
        };
        assert_eq!(
            serde_json::to_value(figure.layout()).unwrap(),
            json!({"xaxis": {"range": [null, 4]}})
        );
        assert!(pane.render_state(&view).unwrap().layout.contains_key("xaxis"));
        assert_eq!(pane.router_state(), RouterState::Idle);
    }

    #[test]
    fn test_remote_restyle_reaches_other_views() {
        let mut pane = pane();
        let origin_box = Outbox::new();
        let other_box = Outbox::new();
        let (origin, _) = pane.attach_view(origin_box.clone());
        pane.attach_view(other_box.clone());

        pane.handle_remote_event(
            &origin,
            RemoteEvent::Restyle(RestyleEvent {
                data: map(json!({"visible": false})),
                traces: None,
            }),
        )
        .unwrap();

        assert!(origin_box.is_empty());
        let messages = other_box.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event, Some(MutationKind::Restyle));
        assert_eq!(messages[0].data.as_ref().unwrap()[0]["visible"], Value::Bool(false));
    }

    #[test]
    fn test_watchers_and_event_fields() {
        let mut pane = Pane::new(None);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        pane.on_event(move |event| sink.borrow_mut().push(event.name()));

        let view = ViewId::from("v");
        let changed = pane
            .handle_remote_event(&view, RemoteEvent::Click(json!({"points": [1]})))
            .unwrap();
        pane.handle_remote_event(&view, RemoteEvent::Relayout(map(json!({"width": 3}))))
            .unwrap();

        assert!(!changed);
        assert_eq!(seen.borrow().as_slice(), &["click", "relayout"]);
        let events = pane.events();
        assert_eq!(events.click_data, Some(json!({"points": [1]})));
        assert!(events.relayout_data.is_some());
        assert_eq!(pane.metrics().remote_events, 2);
    }

    #[test]
    fn test_partially_invalid_relayout_keeps_views_in_sync() {
        let mut pane = pane();
        let other_box = Outbox::new();
        let (origin, _) = pane.attach_view(Outbox::new());
        let (other, _) = pane.attach_view(other_box.clone());

        let result = pane.handle_remote_event(
            &origin,
            RemoteEvent::Relayout(map(json!({"width": 500, "width.x": 1}))),
        );

        assert!(result.is_err());
        let Some(crate::normalize::PaneObject::Figure(figure)) = pane.object() else {
            panic!("figure expected");
        };
        assert!(figure.layout().is_empty());
        assert!(other_box.is_empty());
        assert_eq!(pane.render_state(&other).unwrap().layout, *figure.layout());
    }

    #[test]
    fn test_far_list_index_from_client_is_rejected() {
        let mut pane = pane();
        let view = ViewId::from("v");
        let result = pane.handle_remote_event(
            &view,
            RemoteEvent::Relayout(map(json!({"xaxis.range[5000000]": 1}))),
        );
        assert!(result.is_err());
        let Some(crate::normalize::PaneObject::Figure(figure)) = pane.object() else {
            panic!("figure expected");
        };
        assert!(figure.layout().is_empty());
    }

    #[test]
    fn test_bad_trace_index_is_reported_and_state_reset() {
        let mut pane = pane();
        let view = ViewId::from("v");
        let result = pane.handle_remote_event(
            &view,
            RemoteEvent::Restyle(RestyleEvent {
                data: map(json!({"visible": false})),
                traces: Some(vec![7]),
            }),
        );
        assert!(result.is_err());
        assert_eq!(pane.router_state(), RouterState::Idle);
    }
}
