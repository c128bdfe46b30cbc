//! Layout tree of the composed document and the pass that keeps plots
//! inside tab containers redrawing when their tab becomes visible.

use anyhow::{bail, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;

/// Client-side code run when a tab container's `active` changes. `model`
/// is the plot, `i` its tab index and `cb_obj` the tab container.
pub const VISIBILITY_CODE: &str = "model.visible = cb_obj.active == i;";

pub const TABS_PLOTLY_HOOK: &str = "tabs_plotly";

const ACTIVE_CHANGE: &str = "change:active";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(u64);

/// A client-side callback attached to a widget property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsCallback {
    pub code: String,
    pub model: NodeId,
    pub i: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetKind {
    /// Tab container; child `i` is the content of tab `i`.
    Tabs {
        active: usize,
        titles: Vec<String>,
        property_callbacks: IndexMap<String, Vec<JsCallback>>,
    },
    /// Client-side rendering of pane number `pane`.
    Plot { pane: usize, visible: bool },
    /// Any other layout container.
    Container { name: String },
}

impl WidgetKind {
    pub fn tabs(titles: Vec<String>) -> Self {
        WidgetKind::Tabs {
            active: 0,
            titles,
            property_callbacks: IndexMap::new(),
        }
    }

    pub fn plot(pane: usize) -> Self {
        WidgetKind::Plot {
            pane,
            visible: true,
        }
    }

    pub fn container(name: impl Into<String>) -> Self {
        WidgetKind::Container { name: name.into() }
    }

    pub fn is_tabs(&self) -> bool {
        matches!(self, WidgetKind::Tabs { .. })
    }

    pub fn is_plot(&self) -> bool {
        matches!(self, WidgetKind::Plot { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WidgetNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub kind: WidgetKind,
}

/// Nested form of a subtree, as sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetSnapshot {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: WidgetKind,
    pub children: Vec<WidgetSnapshot>,
}

/// The composed document as a tree of widgets.
#[derive(Debug, Clone, Default)]
pub struct WidgetTree {
    nodes: HashMap<NodeId, WidgetNode>,
    roots: Vec<NodeId>,
    children: HashMap<NodeId, Vec<NodeId>>,
    next_id: u64,
}

impl WidgetTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> NodeId {
        self.next_id += 1;
        NodeId(self.next_id)
    }

    pub fn add_root(&mut self, kind: WidgetKind) -> NodeId {
        let id = self.next_id();
        self.nodes.insert(id, WidgetNode { id, parent: None, kind });
        self.roots.push(id);
        self.children.insert(id, Vec::new());
        id
    }

    pub fn add_child(&mut self, parent: NodeId, kind: WidgetKind) -> Result<NodeId> {
        if !self.nodes.contains_key(&parent) {
            bail!("Unknown parent widget {:?}", parent);
        }
        let id = self.next_id();
        self.nodes.insert(
            id,
            WidgetNode {
                id,
                parent: Some(parent),
                kind,
            },
        );
        self.children.entry(parent).or_default().push(id);
        self.children.insert(id, Vec::new());
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&WidgetNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut WidgetNode> {
        self.nodes.get_mut(&id)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `node` lies strictly below `ancestor`.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.get(node).and_then(|n| n.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get(id).and_then(|n| n.parent);
        }
        false
    }

    /// `root` and its descendants in depth-first order.
    pub fn iter_dfs(&self, root: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        DfsIterator {
            tree: self,
            stack: if self.nodes.contains_key(&root) {
                vec![root]
            } else {
                Vec::new()
            },
        }
    }

    /// Nodes under `root` (inclusive) whose kind matches.
    pub fn select(&self, root: NodeId, predicate: impl Fn(&WidgetKind) -> bool) -> Vec<NodeId> {
        self.iter_dfs(root)
            .filter(|id| self.get(*id).is_some_and(|n| predicate(&n.kind)))
            .collect()
    }

    pub fn snapshot(&self, root: NodeId) -> Option<WidgetSnapshot> {
        let node = self.get(root)?;
        Some(WidgetSnapshot {
            id: root,
            kind: node.kind.clone(),
            children: self
                .children(root)
                .iter()
                .filter_map(|&child| self.snapshot(child))
                .collect(),
        })
    }

    /// Switch tab container `tabs` to `index` and run its active-change
    /// callbacks, the way a client would.
    pub fn set_active(&mut self, tabs: NodeId, index: usize) -> Result<()> {
        let tab_count = self.children(tabs).len();
        let callbacks = match self.get_mut(tabs).map(|n| &mut n.kind) {
            Some(WidgetKind::Tabs {
                active,
                property_callbacks,
                ..
            }) => {
                if index >= tab_count {
                    bail!("Tab index {} out of range for {} tab(s)", index, tab_count);
                }
                *active = index;
                property_callbacks.get(ACTIVE_CHANGE).cloned().unwrap_or_default()
            }
            _ => bail!("Widget {:?} is not a tab container", tabs),
        };
        for callback in callbacks.iter().filter(|cb| cb.code == VISIBILITY_CODE) {
            if let Some(WidgetKind::Plot { visible, .. }) =
                self.get_mut(callback.model).map(|n| &mut n.kind)
            {
                *visible = index == callback.i;
            }
        }
        Ok(())
    }
}

struct DfsIterator<'a> {
    tree: &'a WidgetTree,
    stack: Vec<NodeId>,
}

impl Iterator for DfsIterator<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.children(id).iter().rev().copied());
        Some(id)
    }
}

/// Bind every plot under `root` that sits inside a tab container to the
/// innermost such container: the plot is only visible while its tab is
/// active. Already bound plots get their tab index refreshed.
pub fn patch_tabs_plotly(tree: &mut WidgetTree, root: NodeId) {
    let tabs = tree.select(root, WidgetKind::is_tabs);
    let plots = tree.select(root, WidgetKind::is_plot);

    for plot in plots {
        let parents: Vec<NodeId> = tabs
            .iter()
            .copied()
            .filter(|&t| tree.contains(t, plot))
            .collect();
        let innermost = parents
            .iter()
            .copied()
            .find(|&t| !parents.iter().any(|&other| other != t && tree.contains(t, other)));
        let Some(parent_tab) = innermost else {
            continue;
        };
        let Some(index) = tree
            .children(parent_tab)
            .iter()
            .position(|&tab| tab == plot || tree.contains(tab, plot))
        else {
            continue;
        };
        let active_index = match tree.get_mut(parent_tab).map(|n| &mut n.kind) {
            Some(WidgetKind::Tabs {
                active,
                property_callbacks,
                ..
            }) => {
                let callbacks = property_callbacks.entry(ACTIVE_CHANGE.to_string()).or_default();
                let mut bound = false;
                for callback in callbacks
                    .iter_mut()
                    .filter(|cb| cb.code == VISIBILITY_CODE && cb.model == plot)
                {
                    callback.i = index;
                    bound = true;
                }
                if bound {
                    continue;
                }
                callbacks.push(JsCallback {
                    code: VISIBILITY_CODE.to_string(),
                    model: plot,
                    i: index,
                });
                *active
            }
            _ => continue,
        };

        if let Some(WidgetKind::Plot { visible, .. }) = tree.get_mut(plot).map(|n| &mut n.kind) {
            *visible = active_index == index;
        }
    }
}

pub type PreprocessHook = fn(&mut WidgetTree, NodeId);

/// Passes run over a composed document before it is sent to clients.
#[derive(Debug, Clone, Default)]
pub struct PreprocessingHooks {
    hooks: Vec<(&'static str, PreprocessHook)>,
}

impl PreprocessingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` under `name` unless a hook of that name exists.
    pub fn install_once(&mut self, name: &'static str, hook: PreprocessHook) -> bool {
        if self.is_installed(name) {
            return false;
        }
        self.hooks.push((name, hook));
        true
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.hooks.iter().any(|(n, _)| *n == name)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn run(&self, tree: &mut WidgetTree, root: NodeId) {
        for (_, hook) in &self.hooks {
            hook(tree, root);
        }
    }
}
