//! The document session. Panes and their figures are single-threaded, so
//! they live on one dedicated thread that the async side talks to through
//! a command channel.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::thread;
use tokio::sync::{mpsc, oneshot};

use crate::diff::UpdateMessage;
use crate::figure::{Figure, PlotlyFigure, Value};
use crate::logger::{Logger, SyncMetrics};
use crate::normalize::{to_figure, PaneObject};
use crate::pane::{Pane, PaneParams, ViewId, ViewTransport, WidgetModel};
use crate::router::{EventFields, RemoteEvent};
use crate::tabs::{NodeId, PreprocessingHooks, WidgetKind, WidgetSnapshot, WidgetTree};

/// Message pushed to a browser client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Init {
        client: String,
        layout: WidgetSnapshot,
        models: Vec<WidgetModel>,
    },
    Update {
        pane: usize,
        update: UpdateMessage,
    },
    Error {
        message: String,
    },
}

/// Message received from a browser client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub pane: usize,
    pub payload: RemoteEvent,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaneStats {
    pub title: String,
    pub views: usize,
    pub revision: u64,
    pub metrics: SyncMetrics,
    pub events: EventFields,
}

pub enum SessionCommand {
    Connect {
        client: String,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    },
    Event {
        client: String,
        pane: usize,
        event: RemoteEvent,
    },
    Disconnect {
        client: String,
    },
    Reload {
        figures: Vec<Figure>,
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<Vec<PaneStats>>,
    },
}

/// Cloneable handle to the session thread.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    fn send(&self, command: SessionCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("Session thread has stopped"))
    }

    pub fn connect(&self, client: &str, outbound: mpsc::UnboundedSender<ServerMessage>) -> Result<()> {
        self.send(SessionCommand::Connect {
            client: client.to_string(),
            outbound,
        })
    }

    pub fn event(&self, client: &str, pane: usize, event: RemoteEvent) -> Result<()> {
        self.send(SessionCommand::Event {
            client: client.to_string(),
            pane,
            event,
        })
    }

    pub fn disconnect(&self, client: &str) -> Result<()> {
        self.send(SessionCommand::Disconnect {
            client: client.to_string(),
        })
    }

    /// Replace the figures shown by the panes; returns how many were replaced.
    pub async fn reload(&self, figures: Vec<Figure>) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Reload { figures, reply })?;
        rx.await.context("Session thread dropped the reload request")
    }

    pub async fn stats(&self) -> Result<Vec<PaneStats>> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Stats { reply })?;
        rx.await.context("Session thread dropped the stats request")
    }
}

/// Start the session thread with one pane per figure.
pub fn spawn_session(
    figures: Vec<Figure>,
    titles: Vec<String>,
    params: PaneParams,
    logger: Option<Logger>,
) -> Result<SessionHandle> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("pane-session".to_string())
        .spawn(move || {
            let mut session = match Session::new(figures, titles, params, logger) {
                Ok(session) => session,
                Err(e) => {
                    eprintln!("Failed to start session: {:#}", e);
                    return;
                }
            };
            while let Some(command) = rx.blocking_recv() {
                session.handle(command);
            }
        })
        .context("Failed to spawn session thread")?;
    Ok(SessionHandle { tx })
}

/// Read a figure file: a figure mapping, a trace, or a list of traces.
pub fn load_figure(path: &Path, promote_numeric_lists: bool) -> Result<Figure> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read figure {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    let object = PaneObject::from_value(Value::from(json))
        .with_context(|| format!("Cannot display {}", path.display()))?;
    let mut figure = to_figure(&object);
    if promote_numeric_lists {
        for value in figure.data.iter_mut().flat_map(|trace| trace.values_mut()) {
            value.promote_numeric_lists();
        }
    }
    Ok(figure)
}

/// One tab per figure when there are several, a bare plot otherwise.
pub fn compose(titles: &[String]) -> Result<(WidgetTree, NodeId)> {
    let mut tree = WidgetTree::new();
    let root = tree.add_root(WidgetKind::container("dashboard"));
    match titles.len() {
        0 => {}
        1 => {
            tree.add_child(root, WidgetKind::plot(0))?;
        }
        _ => {
            let tabs = tree.add_child(root, WidgetKind::tabs(titles.to_vec()))?;
            for pane in 0..titles.len() {
                tree.add_child(tabs, WidgetKind::plot(pane))?;
            }
        }
    }
    Ok((tree, root))
}

struct ChannelTransport {
    pane: usize,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl ViewTransport for ChannelTransport {
    fn send(&mut self, message: &UpdateMessage) -> Result<()> {
        self.outbound
            .send(ServerMessage::Update {
                pane: self.pane,
                update: message.clone(),
            })
            .map_err(|_| anyhow!("Client connection closed"))
    }
}

struct Session {
    panes: Vec<Pane>,
    titles: Vec<String>,
    tree: WidgetTree,
    root: NodeId,
    /// Per client, the view it holds on each pane.
    clients: HashMap<String, Vec<ViewId>>,
    logger: Option<Logger>,
}

impl Session {
    fn new(
        figures: Vec<Figure>,
        titles: Vec<String>,
        params: PaneParams,
        logger: Option<Logger>,
    ) -> Result<Self> {
        let mut hooks = PreprocessingHooks::new();
        let mut panes = Vec::with_capacity(figures.len());
        for figure in figures {
            Pane::register_preprocessing_hooks(&mut hooks);
            let object = PaneObject::from(PlotlyFigure::from_figure(figure));
            let pane = Pane::with_params(Some(object), params.clone());
            panes.push(match &logger {
                Some(logger) => pane.with_logger(logger.clone()),
                None => pane,
            });
        }

        let (mut tree, root) = compose(&titles)?;
        hooks.run(&mut tree, root);

        Ok(Self {
            panes,
            titles,
            tree,
            root,
            clients: HashMap::new(),
            logger,
        })
    }

    fn log_error(&self, message: &str) {
        if let Some(logger) = &self.logger {
            let _ = logger.log_error(message);
        }
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect { client, outbound } => self.connect(client, outbound),
            SessionCommand::Event {
                client,
                pane,
                event,
            } => self.event(&client, pane, event),
            SessionCommand::Disconnect { client } => self.disconnect(&client),
            SessionCommand::Reload { figures, reply } => {
                let _ = reply.send(self.reload(figures));
            }
            SessionCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn connect(&mut self, client: String, outbound: mpsc::UnboundedSender<ServerMessage>) {
        let mut views = Vec::with_capacity(self.panes.len());
        let mut models = Vec::with_capacity(self.panes.len());
        for (pane, p) in self.panes.iter_mut().enumerate() {
            let (view, model) = p.attach_view(ChannelTransport {
                pane,
                outbound: outbound.clone(),
            });
            views.push(view);
            models.push(model);
        }
        self.clients.insert(client.clone(), views);

        let Some(layout) = self.tree.snapshot(self.root) else {
            return;
        };
        if outbound
            .send(ServerMessage::Init {
                client: client.clone(),
                layout,
                models,
            })
            .is_err()
        {
            self.disconnect(&client);
        }
    }

    fn event(&mut self, client: &str, pane: usize, event: RemoteEvent) {
        let Some(view) = self.clients.get(client).and_then(|views| views.get(pane)).cloned() else {
            self.log_error(&format!("event for unknown pane {} from client {}", pane, client));
            return;
        };
        if let Err(e) = self.panes[pane].handle_remote_event(&view, event) {
            self.log_error(&format!("event on pane {} from {} failed: {:#}", pane, view, e));
        }
    }

    fn disconnect(&mut self, client: &str) {
        if let Some(views) = self.clients.remove(client) {
            for (pane, view) in self.panes.iter_mut().zip(&views) {
                pane.detach_view(view);
            }
        }
    }

    fn reload(&mut self, figures: Vec<Figure>) -> usize {
        let mut replaced = 0;
        for (pane, figure) in self.panes.iter_mut().zip(figures) {
            pane.set_object(Some(PlotlyFigure::from_figure(figure).into()));
            replaced += 1;
        }
        replaced
    }

    fn stats(&self) -> Vec<PaneStats> {
        self.panes
            .iter()
            .zip(&self.titles)
            .map(|(pane, title)| PaneStats {
                title: title.clone(),
                views: pane.view_count(),
                revision: pane.revision(),
                metrics: pane.metrics(),
                events: pane.events(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::figure::{Array, Map};
    use serde_json::json;

    fn scatter(name: &str) -> Figure {
        let mut trace = Map::new();
        trace.insert("type".into(), Value::from("scatter"));
        trace.insert("name".into(), Value::from(name));
        trace.insert("y".into(), Value::Array(Array::from_f64(vec![1.0, 2.0])));
        Figure::new(vec![trace], Map::new())
    }

    fn session(count: usize) -> Session {
        let figures = (0..count).map(|i| scatter(&format!("fig{}", i))).collect();
        let titles = (0..count).map(|i| format!("fig{}", i)).collect();
        Session::new(figures, titles, PaneParams::default(), None).unwrap()
    }

    fn connect(session: &mut Session, client: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        session.connect(client.to_string(), tx);
        rx
    }

    #[test]
    fn test_compose_single_and_tabbed() {
        let (tree, root) = compose(&["one".to_string()]).unwrap();
        assert_eq!(tree.children(root).len(), 1);

        let (tree, root) = compose(&["a".to_string(), "b".to_string()]).unwrap();
        let tabs = tree.children(root)[0];
        assert!(tree.get(tabs).unwrap().kind.is_tabs());
        assert_eq!(tree.children(tabs).len(), 2);
    }

    #[test]
    fn test_tabbed_session_is_patched() {
        let session = session(2);
        let snapshot = serde_json::to_value(session.tree.snapshot(session.root).unwrap()).unwrap();
        let tabs = &snapshot["children"][0];
        assert_eq!(tabs["property_callbacks"]["change:active"].as_array().unwrap().len(), 2);
        assert_eq!(tabs["children"][1]["visible"], false);
    }

    #[test]
    fn test_connect_sends_init() {
        let mut session = session(2);
        let mut rx = connect(&mut session, "c1");
        match rx.try_recv().unwrap() {
            ServerMessage::Init { client, models, .. } => {
                assert_eq!(client, "c1");
                assert_eq!(models.len(), 2);
                assert!(models[0].data_sources[0].get("y").is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(session.stats()[0].views, 1);
    }

    #[test]
    fn test_relayout_from_one_client_updates_the_other() {
        let mut session = session(1);
        let mut first = connect(&mut session, "a");
        let mut second = connect(&mut session, "b");
        first.try_recv().unwrap();
        second.try_recv().unwrap();

        let event: RemoteEvent =
            serde_json::from_value(json!({"event": "relayout", "data": {"title.text": "zoomed"}}))
                .unwrap();
        session.event("a", 0, event);

        assert!(first.try_recv().is_err());
        match second.try_recv().unwrap() {
            ServerMessage::Update { pane, update } => {
                assert_eq!(pane, 0);
                assert!(update.layout.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        let stats = session.stats();
        assert_eq!(stats[0].metrics.echoes_suppressed, 1);
        assert_eq!(stats[0].metrics.remote_events, 1);
    }

    #[test]
    fn test_disconnect_detaches_views() {
        let mut session = session(2);
        let _rx = connect(&mut session, "a");
        session.disconnect("a");
        assert!(session.stats().iter().all(|s| s.views == 0));
    }

    #[test]
    fn test_reload_pushes_changes() {
        let mut session = session(1);
        let mut rx = connect(&mut session, "a");
        rx.try_recv().unwrap();

        let mut figure = scatter("fig0");
        figure.data[0].insert("y".into(), Value::Array(Array::from_f64(vec![1.0, 3.0])));
        assert_eq!(session.reload(vec![figure]), 1);

        match rx.try_recv().unwrap() {
            ServerMessage::Update { update, .. } => assert!(update.is_buffer_only()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(session.stats()[0].revision, 1);
    }

    #[test]
    fn test_client_message_format() {
        let message: ClientMessage = serde_json::from_value(json!({
            "pane": 1,
            "payload": {"event": "click", "data": {"points": []}}
        }))
        .unwrap();
        assert_eq!(message.pane, 1);
        assert_eq!(message.payload.name(), "click");
    }

    #[test]
    fn test_load_figure_promotes_trace_lists() {
        let dir = "test_figures_temp";
        let _ = fs::remove_dir_all(dir);
        fs::create_dir_all(dir).unwrap();
        let path = Path::new(dir).join("fig.json");
        fs::write(
            &path,
            r#"{"data": [{"type": "scatter", "y": [1.5, 2.5]}], "layout": {"xaxis": {"range": [0, 1]}}}"#,
        )
        .unwrap();

        let figure = load_figure(&path, true).unwrap();
        assert!(matches!(figure.data[0]["y"], Value::Array(_)));
        assert!(matches!(
            figure.layout["xaxis"].as_map().unwrap()["range"],
            Value::List(_)
        ));

        fs::write(&path, "[1, 2]").unwrap();
        assert!(load_figure(&path, true).is_err());
        let _ = fs::remove_dir_all(dir);
    }
}
