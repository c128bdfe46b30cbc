use anyhow::{bail, Result};
use dotenvy::dotenv;
use std::path::PathBuf;

pub mod config;
pub mod dashboard;
pub mod diff;
pub mod extract;
pub mod figure;
pub mod logger;
pub mod normalize;
pub mod pane;
pub mod router;
pub mod tabs;
pub mod utils;

/// Run the application: load `.env`, load config, and serve the figures
/// named in `plotlypane.toml` plus any given on the command line.
pub async fn run() -> Result<()> {
    // Load environment variables from .env
    dotenv().ok();

    let config = config::AppConfig::load();

    let figure_paths: Vec<PathBuf> = config
        .figures
        .iter()
        .cloned()
        .chain(std::env::args().skip(1))
        .map(PathBuf::from)
        .collect();
    if figure_paths.is_empty() {
        bail!("No figures to serve. Usage: plotly-pane <figure.json>... (or set `figures` in plotlypane.toml)");
    }

    dashboard::start_dashboard(config, figure_paths).await
}

// Re-exports for library consumers: common useful types
pub use config::AppConfig;
pub use diff::{RenderState, SizingMode, UpdateMessage};
pub use extract::ColumnarBuffer;
pub use figure::{Array, Figure, Mutation, MutationKind, PlotlyFigure, Value};
pub use normalize::PaneObject;
pub use pane::{Outbox, Pane, PaneParams, ViewId, ViewTransport, WidgetModel};
pub use router::{EventFields, RemoteEvent, RouterState};
pub use tabs::{PreprocessingHooks, WidgetKind, WidgetTree};
