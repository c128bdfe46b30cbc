//! The pane: holds the displayed object, keeps every attached view in sync
//! with it and routes figure mutations to the right views.

use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::diff::{RenderState, SizingMode, UpdateMessage};
use crate::extract::ColumnarBuffer;
use crate::figure::{Figure, Layout, Map, Mutation, MutationKind, ObserverId, PlotlyFigure, Trace};
use crate::logger::{Logger, SyncMetrics};
use crate::normalize::{dropped_trace_entries, figure_json, normalize_datetimes, PaneObject};
use crate::router::{EventFields, RemoteEvent, RouterState};
use crate::tabs::{patch_tabs_plotly, PreprocessingHooks, TABS_PLOTLY_HOOK};

/// Identity of one remote rendering of a pane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(String);

impl ViewId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ViewId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ViewId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ViewId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// When the client reports viewport changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewportUpdatePolicy {
    #[default]
    Mouseup,
    Continuous,
    Throttle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaneParams {
    /// Explicit sizing; when set, `autosize` in the layout is ignored.
    pub sizing_mode: Option<SizingMode>,
    /// Client-side plotly configuration, passed through untouched.
    pub config: Map,
    pub viewport_update_policy: ViewportUpdatePolicy,
    /// Milliseconds between viewport reports under `Throttle`.
    pub viewport_update_throttle: u64,
}

impl Default for PaneParams {
    fn default() -> Self {
        Self {
            sizing_mode: None,
            config: Map::new(),
            viewport_update_policy: ViewportUpdatePolicy::Mouseup,
            viewport_update_throttle: 200,
        }
    }
}

/// Everything a client needs to create the widget for a new view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetModel {
    pub view: ViewId,
    pub data: Vec<Trace>,
    pub layout: Layout,
    pub data_sources: Vec<ColumnarBuffer>,
    pub config: Map,
    pub render_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sizing_mode: Option<SizingMode>,
    pub viewport_update_policy: ViewportUpdatePolicy,
    pub viewport_update_throttle: u64,
}

/// Outbound channel to one view.
pub trait ViewTransport {
    fn send(&mut self, message: &UpdateMessage) -> Result<()>;
}

/// Transport that keeps every message it is given. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct Outbox(Rc<RefCell<Vec<UpdateMessage>>>);

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<UpdateMessage> {
        self.0.borrow().clone()
    }

    pub fn take(&self) -> Vec<UpdateMessage> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

impl ViewTransport for Outbox {
    fn send(&mut self, message: &UpdateMessage) -> Result<()> {
        self.0.borrow_mut().push(message.clone());
        Ok(())
    }
}

struct View {
    render: RenderState,
    transport: Box<dyn ViewTransport>,
}

pub(crate) type EventWatcher = Box<dyn FnMut(&RemoteEvent)>;

/// State shared between a pane and the observer it installs on its figure.
pub(crate) struct PaneState {
    params: PaneParams,
    views: IndexMap<ViewId, View>,
    pub(crate) router: RouterState,
    pub(crate) events: EventFields,
    pub(crate) watchers: Vec<EventWatcher>,
    pub(crate) logger: Option<Logger>,
    pub(crate) metrics: SyncMetrics,
}

impl PaneState {
    fn new(params: PaneParams) -> Self {
        Self {
            params,
            views: IndexMap::new(),
            router: RouterState::Idle,
            events: EventFields::default(),
            watchers: Vec::new(),
            logger: None,
            metrics: SyncMetrics::new(),
        }
    }

    fn on_mutation(&mut self, mutation: &Mutation, figure: &Figure) {
        let origin = match &self.router {
            RouterState::ApplyingLocalUpdate => {
                if let Some(logger) = &self.logger {
                    let _ = logger.log(&format!("IGNORED re-entrant {:?} mutation", mutation.kind));
                }
                return;
            }
            RouterState::ApplyingRemoteEvent { origin } => Some(origin.clone()),
            RouterState::Idle => None,
        };
        let origin = mutation.source_view_id.clone().or(origin);
        let mut figure = figure.clone();
        normalize_datetimes(&mut figure);
        self.broadcast(Some(figure), Some(mutation.kind), origin.as_ref());
    }

    /// Diff `figure` against every view. The origin view absorbs its diff
    /// without being sent anything.
    fn broadcast(
        &mut self,
        figure: Option<Figure>,
        event: Option<MutationKind>,
        origin: Option<&ViewId>,
    ) {
        let previous = std::mem::replace(&mut self.router, RouterState::ApplyingLocalUpdate);
        let sizing = self.params.sizing_mode;
        for (id, view) in self.views.iter_mut() {
            let Some(mut message) = view.render.update(figure.clone(), sizing) else {
                continue;
            };
            message.event = event;
            self.metrics.renders += 1;
            if message.is_buffer_only() {
                self.metrics.buffer_patches += 1;
            }

            if origin == Some(id) {
                self.metrics.echoes_suppressed += 1;
                if let Some(logger) = &self.logger {
                    let _ = logger.log_suppressed(id.as_str(), &message.summary());
                }
                continue;
            }

            match view.transport.send(&message) {
                Ok(()) => {
                    self.metrics.messages_sent += 1;
                    if let Some(logger) = &self.logger {
                        let _ = logger.log_render(id.as_str(), &message.summary());
                    }
                }
                Err(e) => {
                    self.metrics.send_failures += 1;
                    if let Some(logger) = &self.logger {
                        let _ = logger.log_error(&format!("send to {} failed: {}", id, e));
                    }
                }
            }
        }
        self.router = previous;
    }
}

/// A displayed plotly object plus the views rendering it.
pub struct Pane {
    object: Option<PaneObject>,
    revision: u64,
    observer: Option<ObserverId>,
    pub(crate) shared: Rc<RefCell<PaneState>>,
}

impl Pane {
    pub fn new(object: Option<PaneObject>) -> Self {
        Self::with_params(object, PaneParams::default())
    }

    pub fn with_params(object: Option<PaneObject>, params: PaneParams) -> Self {
        let mut pane = Self {
            object,
            revision: 0,
            observer: None,
            shared: Rc::new(RefCell::new(PaneState::new(params))),
        };
        pane.install_observer();
        pane
    }

    pub fn with_logger(self, logger: Logger) -> Self {
        self.shared.borrow_mut().logger = Some(logger);
        self.report_dropped_traces();
        self
    }

    /// Register the layout hooks panes depend on. Safe to call once per
    /// pane; the hook is only installed the first time.
    pub fn register_preprocessing_hooks(hooks: &mut PreprocessingHooks) -> bool {
        hooks.install_once(TABS_PLOTLY_HOOK, patch_tabs_plotly)
    }

    pub fn object(&self) -> Option<&PaneObject> {
        self.object.as_ref()
    }

    /// Incremented on every object replacement.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The native figure, when the pane displays one. Mutations made
    /// through it are pushed to every view.
    pub fn figure_mut(&mut self) -> Option<&mut PlotlyFigure> {
        match self.object.as_mut() {
            Some(PaneObject::Figure(figure)) => Some(figure),
            _ => None,
        }
    }

    /// Replace the displayed object and re-render every view. Returns the
    /// previous object, detached from this pane.
    pub fn set_object(&mut self, object: Option<PaneObject>) -> Option<PaneObject> {
        self.remove_observer();
        let previous = std::mem::replace(&mut self.object, object);
        self.revision += 1;
        self.install_observer();
        self.report_dropped_traces();
        self.refresh();
        previous
    }

    fn report_dropped_traces(&self) {
        let dropped = self.object.as_ref().map_or(0, dropped_trace_entries);
        if dropped == 0 {
            return;
        }
        if let Some(logger) = &self.shared.borrow().logger {
            let _ = logger.log(&format!("WARN dropped non-mapping trace entries: {}", dropped));
        }
    }

    /// Re-render every view from the current object.
    pub fn refresh(&mut self) {
        let figure = self.object.as_ref().map(figure_json);
        self.shared.borrow_mut().broadcast(figure, None, None);
    }

    pub fn params(&self) -> PaneParams {
        self.shared.borrow().params.clone()
    }

    /// Applies from the next render on.
    pub fn set_sizing_mode(&mut self, sizing_mode: Option<SizingMode>) {
        self.shared.borrow_mut().params.sizing_mode = sizing_mode;
    }

    /// Attach a new view and return its id with the model the client
    /// should build the widget from.
    pub fn attach_view(&mut self, transport: impl ViewTransport + 'static) -> (ViewId, WidgetModel) {
        let figure = self.object.as_ref().map(figure_json);
        let mut state = self.shared.borrow_mut();
        let render = RenderState::initial(figure, state.params.sizing_mode);
        let id = ViewId::new();
        let model = WidgetModel {
            view: id.clone(),
            data: render.traces.clone(),
            layout: render.layout.clone(),
            data_sources: render.buffers.clone(),
            config: state.params.config.clone(),
            render_count: render.render_count,
            sizing_mode: render.sizing_mode,
            viewport_update_policy: state.params.viewport_update_policy,
            viewport_update_throttle: state.params.viewport_update_throttle,
        };
        state.views.insert(
            id.clone(),
            View {
                render,
                transport: Box::new(transport),
            },
        );
        if let Some(logger) = &state.logger {
            let _ = logger.log(&format!("VIEW attached: {}", id));
        }
        (id, model)
    }

    pub fn detach_view(&mut self, id: &ViewId) -> bool {
        let mut state = self.shared.borrow_mut();
        let removed = state.views.shift_remove(id).is_some();
        if removed {
            if let Some(logger) = &state.logger {
                let _ = logger.log(&format!("VIEW detached: {}", id));
            }
        }
        removed
    }

    pub fn view_ids(&self) -> Vec<ViewId> {
        self.shared.borrow().views.keys().cloned().collect()
    }

    pub fn view_count(&self) -> usize {
        self.shared.borrow().views.len()
    }

    /// Snapshot of what `id` currently displays.
    pub fn render_state(&self, id: &ViewId) -> Option<RenderState> {
        self.shared.borrow().views.get(id).map(|v| v.render.clone())
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.shared.borrow().metrics.clone()
    }

    pub fn router_state(&self) -> RouterState {
        self.shared.borrow().router.clone()
    }

    fn install_observer(&mut self) {
        let weak = Rc::downgrade(&self.shared);
        let Some(figure) = self.figure_mut() else {
            return;
        };
        let id = figure.register_mutation_observer(MutationKind::ALL, move |mutation, figure| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            // Already borrowed means the pane itself is mid-update.
            let Ok(mut state) = shared.try_borrow_mut() else {
                return;
            };
            state.on_mutation(mutation, figure);
        });
        self.observer = Some(id);
    }

    fn remove_observer(&mut self) {
        if let Some(id) = self.observer.take() {
            if let Some(figure) = self.figure_mut() {
                figure.remove_mutation_observer(id);
            }
        }
    }
}
