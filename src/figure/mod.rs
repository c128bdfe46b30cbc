//! Figure data model: dynamic values, bulk arrays, and the mutable figure
//! object whose mutations the pane observes.

pub mod array;
pub mod object;
pub mod value;

use serde::{Deserialize, Serialize};

pub use array::{Array, ArrayData, DType};
pub use object::{Mutation, MutationKind, ObserverId, PlotlyFigure};
pub use value::{Map, Value};

/// One data series of a figure.
pub type Trace = Map;

/// Figure-wide display configuration.
pub type Layout = Map;

/// Canonical figure: ordered traces plus a layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    #[serde(default)]
    pub data: Vec<Trace>,
    #[serde(default)]
    pub layout: Layout,
}

impl Figure {
    pub fn new(data: Vec<Trace>, layout: Layout) -> Self {
        Self { data, layout }
    }
}
