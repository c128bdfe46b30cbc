use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{Figure, Layout, Map, Trace, Value};
use crate::pane::ViewId;
use crate::utils::{parse_path, remove_path, set_path};

/// Kinds of figure mutation an observer can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    AddTraces,
    MoveTraces,
    DeleteTraces,
    Restyle,
    Relayout,
    Update,
    Animate,
}

impl MutationKind {
    pub const ALL: [MutationKind; 7] = [
        MutationKind::AddTraces,
        MutationKind::MoveTraces,
        MutationKind::DeleteTraces,
        MutationKind::Restyle,
        MutationKind::Relayout,
        MutationKind::Update,
        MutationKind::Animate,
    ];
}

/// An applied mutation, as delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub kind: MutationKind,
    /// Remote view the mutation came from, when it was applied on behalf of
    /// an inbound event.
    pub source_view_id: Option<ViewId>,
    pub trace_indexes: Vec<usize>,
    pub restyle: Map,
    pub relayout: Map,
}

impl Mutation {
    fn new(kind: MutationKind, source_view_id: Option<&ViewId>) -> Self {
        Self {
            kind,
            source_view_id: source_view_id.cloned(),
            trace_indexes: Vec::new(),
            restyle: Map::new(),
            relayout: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type MutationCallback = Box<dyn FnMut(&Mutation, &Figure)>;

struct Observer {
    id: ObserverId,
    kinds: HashSet<MutationKind>,
    callback: MutationCallback,
}

/// A figure object that owns its traces and layout and reports every
/// applied mutation to registered observers.
pub struct PlotlyFigure {
    figure: Figure,
    observers: Vec<Observer>,
    next_observer: u64,
}

impl std::fmt::Debug for PlotlyFigure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlotlyFigure")
            .field("figure", &self.figure)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl PlotlyFigure {
    pub fn new(data: Vec<Trace>, layout: Layout) -> Self {
        Self::from_figure(Figure::new(data, layout))
    }

    pub fn from_figure(figure: Figure) -> Self {
        Self {
            figure,
            observers: Vec::new(),
            next_observer: 1,
        }
    }

    /// Serializable snapshot of the current traces and layout.
    pub fn figure(&self) -> &Figure {
        &self.figure
    }

    pub fn data(&self) -> &[Trace] {
        &self.figure.data
    }

    pub fn layout(&self) -> &Layout {
        &self.figure.layout
    }

    pub fn register_mutation_observer<I, F>(&mut self, kinds: I, callback: F) -> ObserverId
    where
        I: IntoIterator<Item = MutationKind>,
        F: FnMut(&Mutation, &Figure) + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push(Observer {
            id,
            kinds: kinds.into_iter().collect(),
            callback: Box::new(callback),
        });
        id
    }

    pub fn remove_mutation_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| o.id != id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn notify(&mut self, mutation: Mutation) {
        let figure = &self.figure;
        for observer in self
            .observers
            .iter_mut()
            .filter(|o| o.kinds.contains(&mutation.kind))
        {
            (observer.callback)(&mutation, figure);
        }
    }

    /// `None` selects every trace; out-of-range indexes are rejected.
    pub fn normalize_trace_indexes(&self, indexes: Option<&[usize]>) -> Result<Vec<usize>> {
        let len = self.figure.data.len();
        match indexes {
            None => Ok((0..len).collect()),
            Some(indexes) => {
                if let Some(bad) = indexes.iter().find(|&&i| i >= len) {
                    bail!("Trace index {} out of range for {} trace(s)", bad, len);
                }
                Ok(indexes.to_vec())
            }
        }
    }

    /// Apply a restyle. List values are distributed cyclically over the
    /// selected traces; `Null` removes the property.
    pub fn plotly_restyle(
        &mut self,
        data: Map,
        trace_indexes: Option<&[usize]>,
        source_view_id: Option<&ViewId>,
    ) -> Result<bool> {
        let indexes = self.normalize_trace_indexes(trace_indexes)?;
        let mut staged = self.figure.clone();
        let changed = restyle_traces(&mut staged, &data, &indexes)?;
        if changed {
            self.figure = staged;
            let mut mutation = Mutation::new(MutationKind::Restyle, source_view_id);
            mutation.trace_indexes = indexes;
            mutation.restyle = data;
            self.notify(mutation);
        }
        Ok(changed)
    }

    pub fn plotly_relayout(&mut self, data: Map, source_view_id: Option<&ViewId>) -> Result<bool> {
        let mut staged = self.figure.clone();
        let changed = relayout_layout(&mut staged, &data)?;
        if changed {
            self.figure = staged;
            let mut mutation = Mutation::new(MutationKind::Relayout, source_view_id);
            mutation.relayout = data;
            self.notify(mutation);
        }
        Ok(changed)
    }

    /// Restyle and relayout as one mutation.
    pub fn plotly_update(
        &mut self,
        restyle: Map,
        relayout: Map,
        trace_indexes: Option<&[usize]>,
        source_view_id: Option<&ViewId>,
    ) -> Result<bool> {
        let indexes = self.normalize_trace_indexes(trace_indexes)?;
        let mut staged = self.figure.clone();
        let restyled = restyle_traces(&mut staged, &restyle, &indexes)?;
        let relayouted = relayout_layout(&mut staged, &relayout)?;
        if restyled || relayouted {
            self.figure = staged;
            let mut mutation = Mutation::new(MutationKind::Update, source_view_id);
            mutation.trace_indexes = indexes;
            mutation.restyle = restyle;
            mutation.relayout = relayout;
            self.notify(mutation);
        }
        Ok(restyled || relayouted)
    }

    /// Append traces, giving each one without a `uid` a fresh one.
    /// Returns the indexes of the new traces.
    pub fn add_traces(&mut self, traces: Vec<Trace>) -> Vec<usize> {
        let start = self.figure.data.len();
        for mut trace in traces {
            if !trace.contains_key("uid") {
                trace.insert("uid".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
            }
            self.figure.data.push(trace);
        }
        let indexes: Vec<usize> = (start..self.figure.data.len()).collect();
        let mut mutation = Mutation::new(MutationKind::AddTraces, None);
        mutation.trace_indexes = indexes.clone();
        self.notify(mutation);
        indexes
    }

    pub fn delete_traces(&mut self, indexes: &[usize]) -> Result<()> {
        let mut indexes = self.normalize_trace_indexes(Some(indexes))?;
        indexes.sort_unstable();
        indexes.dedup();
        for &i in indexes.iter().rev() {
            self.figure.data.remove(i);
        }
        let mut mutation = Mutation::new(MutationKind::DeleteTraces, None);
        mutation.trace_indexes = indexes;
        self.notify(mutation);
        Ok(())
    }

    /// Move the traces at `current` to the positions in `new`; without `new`
    /// they move to the end, keeping their relative order.
    pub fn move_traces(&mut self, current: &[usize], new: Option<&[usize]>) -> Result<()> {
        let current = self.normalize_trace_indexes(Some(current))?;
        let mut unique = current.clone();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() != current.len() {
            bail!("move_traces received duplicate trace indexes");
        }
        let len = self.figure.data.len();
        let targets = match new {
            Some(new) => {
                if new.len() != current.len() {
                    bail!(
                        "move_traces needs as many new indexes ({}) as current ones ({})",
                        new.len(),
                        current.len()
                    );
                }
                self.normalize_trace_indexes(Some(new))?
            }
            None => (len - current.len()..len).collect(),
        };

        let moving: Vec<Trace> = current.iter().map(|&i| self.figure.data[i].clone()).collect();
        for &i in unique.iter().rev() {
            self.figure.data.remove(i);
        }
        let mut placed: Vec<(usize, Trace)> = targets.into_iter().zip(moving).collect();
        placed.sort_by_key(|(target, _)| *target);
        for (target, trace) in placed {
            let at = target.min(self.figure.data.len());
            self.figure.data.insert(at, trace);
        }

        let mut mutation = Mutation::new(MutationKind::MoveTraces, None);
        mutation.trace_indexes = current;
        self.notify(mutation);
        Ok(())
    }

    /// Apply one animation step: `styles[i]` restyles trace `trace_indexes[i]`
    /// and `relayout` updates the layout.
    pub fn animate(
        &mut self,
        styles: Vec<Map>,
        relayout: Map,
        trace_indexes: Option<&[usize]>,
    ) -> Result<()> {
        let indexes = self.normalize_trace_indexes(trace_indexes)?;
        if styles.len() > indexes.len() {
            return Err(anyhow!(
                "animate received {} trace styles for {} trace(s)",
                styles.len(),
                indexes.len()
            ));
        }
        let mut staged = self.figure.clone();
        for (style, &index) in styles.iter().zip(&indexes) {
            for (path, value) in style {
                apply_property(&mut staged.data[index], path, value.clone())?;
            }
        }
        relayout_layout(&mut staged, &relayout)?;
        self.figure = staged;

        let mut mutation = Mutation::new(MutationKind::Animate, None);
        mutation.trace_indexes = indexes;
        mutation.relayout = relayout;
        self.notify(mutation);
        Ok(())
    }

}

// Mutations are applied to a staged copy of the figure, which replaces the
// live one only when every property was set.
fn restyle_traces(figure: &mut Figure, data: &Map, indexes: &[usize]) -> Result<bool> {
    let mut changed = false;
    for (path, value) in data {
        for (i, &index) in indexes.iter().enumerate() {
            let trace_value = match value {
                Value::List(items) if !items.is_empty() => items[i % items.len()].clone(),
                other => other.clone(),
            };
            changed |= apply_property(&mut figure.data[index], path, trace_value)?;
        }
    }
    Ok(changed)
}

fn relayout_layout(figure: &mut Figure, data: &Map) -> Result<bool> {
    let mut changed = false;
    for (path, value) in data {
        changed |= apply_property(&mut figure.layout, path, value.clone())?;
    }
    Ok(changed)
}

fn apply_property(target: &mut Map, path: &str, value: Value) -> Result<bool> {
    let segments = parse_path(path)?;
    if matches!(value, Value::Null) {
        Ok(remove_path(target, &segments))
    } else {
        set_path(target, &segments, value)
    }
}
