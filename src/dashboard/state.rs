use std::path::PathBuf;

use super::session::SessionHandle;
use crate::config::AppConfig;
use crate::logger::Logger;

/// Shared state handed to every axum handler.
pub struct DashboardState {
    pub config: AppConfig,
    /// Figure files backing the panes, in pane order.
    pub figure_paths: Vec<PathBuf>,
    pub titles: Vec<String>,
    pub session: SessionHandle,
    pub logger: Option<Logger>,
}

impl DashboardState {
    pub fn new(
        config: AppConfig,
        figure_paths: Vec<PathBuf>,
        session: SessionHandle,
        logger: Option<Logger>,
    ) -> Self {
        let titles = figure_paths.iter().map(|p| figure_title(p)).collect();
        Self {
            config,
            figure_paths,
            titles,
            session,
            logger,
        }
    }
}

/// Tab title for a figure file: its file stem.
pub fn figure_title(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
