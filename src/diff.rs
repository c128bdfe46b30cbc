//! Diff engine: compares what a view last rendered with a new canonical
//! figure and produces the smallest update that brings the view up to date.

use serde::{Deserialize, Serialize};

use crate::extract::{extract_arrays, get_sources, ColumnarBuffer};
use crate::figure::{Array, Figure, Layout, Map, MutationKind, Trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    Fixed,
    StretchWidth,
    StretchHeight,
    StretchBoth,
    ScaleWidth,
    ScaleHeight,
    ScaleBoth,
}

/// A changed column of an existing buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcePatch {
    pub source: usize,
    pub key: String,
    pub column: Vec<Array>,
}

/// Update pushed to a remote view. Absent fields are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Trace>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    /// Buffers appended after the ones the view already holds.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data_sources: Vec<ColumnarBuffer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_patches: Vec<SourcePatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sizing_mode: Option<SizingMode>,
    /// New render count; present whenever the view must redraw.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<MutationKind>,
}

impl UpdateMessage {
    /// True when only buffer contents changed in place.
    pub fn is_buffer_only(&self) -> bool {
        self.data.is_none()
            && self.layout.is_none()
            && self.data_sources.is_empty()
            && self.sizing_mode.is_none()
            && !self.source_patches.is_empty()
    }

    /// Short human readable description for the session log.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(data) = &self.data {
            parts.push(format!("data({} traces)", data.len()));
        }
        if self.layout.is_some() {
            parts.push("layout".to_string());
        }
        if !self.data_sources.is_empty() {
            parts.push(format!("+{} sources", self.data_sources.len()));
        }
        if !self.source_patches.is_empty() {
            parts.push(format!("{} patched columns", self.source_patches.len()));
        }
        if let Some(mode) = self.sizing_mode {
            parts.push(format!("sizing_mode={:?}", mode));
        }
        if let Some(count) = self.render_count {
            parts.push(format!("render #{}", count));
        }
        parts.join(", ")
    }
}

/// What one remote view currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderState {
    /// Traces without their bulk arrays.
    pub traces: Vec<Trace>,
    pub layout: Layout,
    /// One buffer per trace position ever rendered; never shrinks.
    pub buffers: Vec<ColumnarBuffer>,
    pub sizing_mode: Option<SizingMode>,
    pub render_count: u64,
}

impl RenderState {
    /// State for a freshly created widget. An explicit `pane_sizing` wins;
    /// otherwise a truthy `autosize` stretches the widget.
    pub fn initial(figure: Option<Figure>, pane_sizing: Option<SizingMode>) -> Self {
        let Some(mut figure) = figure else {
            return Self {
                sizing_mode: pane_sizing,
                ..Self::default()
            };
        };
        let buffers = get_sources(&mut figure);
        let autosize = figure
            .layout
            .get("autosize")
            .is_some_and(|v| v.is_truthy());
        let sizing_mode = pane_sizing.or(autosize.then_some(SizingMode::StretchBoth));
        Self {
            traces: figure.data,
            layout: figure.layout,
            buffers,
            sizing_mode,
            render_count: 0,
        }
    }

    /// Diff against `figure` and apply the result to this state.
    ///
    /// Returns `None` when the view is already up to date. `figure` must
    /// already be normalized; `None` clears the view. `pane_sizing` is the
    /// caller's explicit sizing mode, if any.
    pub fn update(
        &mut self,
        figure: Option<Figure>,
        pane_sizing: Option<SizingMode>,
    ) -> Option<UpdateMessage> {
        let Some(mut figure) = figure else {
            self.traces.clear();
            self.layout.clear();
            self.render_count += 1;
            return Some(UpdateMessage {
                data: Some(Vec::new()),
                layout: Some(Map::new()),
                render_count: Some(self.render_count),
                ..UpdateMessage::default()
            });
        };

        let mut message = UpdateMessage::default();
        let mut buffers_changed = false;
        for (i, trace) in figure.data.iter_mut().enumerate() {
            let fresh = extract_arrays(trace);
            if let Some(buffer) = self.buffers.get_mut(i) {
                for key in buffer.update_from(fresh) {
                    let column = buffer.column(&key).map(<[Array]>::to_vec).unwrap_or_default();
                    message.source_patches.push(SourcePatch {
                        source: i,
                        key,
                        column,
                    });
                    buffers_changed = true;
                }
            } else {
                message.data_sources.push(fresh.clone());
                self.buffers.push(fresh);
            }
        }

        let update_layout = self.layout != figure.layout;
        let update_data = self.traces.len() != figure.data.len()
            || self
                .traces
                .iter()
                .zip(&figure.data)
                .any(|(old, new)| traces_differ(old, new));

        if pane_sizing.is_none() {
            if let Some(autosize) = figure.layout.get("autosize") {
                let target = if autosize.is_truthy() {
                    SizingMode::StretchBoth
                } else {
                    SizingMode::Fixed
                };
                if self.sizing_mode != Some(target) {
                    self.sizing_mode = Some(target);
                    message.sizing_mode = Some(target);
                }
            }
        }

        if update_data {
            message.data = Some(figure.data.clone());
            self.traces = figure.data;
        }
        if update_layout {
            message.layout = Some(figure.layout.clone());
            self.layout = figure.layout;
        }

        let structural = message.data.is_some()
            || message.layout.is_some()
            || message.sizing_mode.is_some()
            || !message.data_sources.is_empty();
        if !structural && !buffers_changed {
            return None;
        }
        self.render_count += 1;
        message.render_count = Some(self.render_count);
        Some(message)
    }
}

// `uid` is volatile and never counts as a change.
fn traces_differ(old: &Trace, new: &Trace) -> bool {
    let semantic_len = |t: &Trace| t.keys().filter(|k| k.as_str() != "uid").count();
    if semantic_len(old) != semantic_len(new) {
        return true;
    }
    new.iter()
        .filter(|(k, _)| k.as_str() != "uid")
        .any(|(k, v)| old.get(k) != Some(v))
}
