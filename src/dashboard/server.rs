use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use super::routes;
use super::session::{load_figure, spawn_session};
use super::state::{figure_title, DashboardState};
use super::websocket;
use crate::config::AppConfig;
use crate::logger::{Logger, SyncMetrics};

/// Load the figures, start the session thread and serve the dashboard
/// until the process is stopped.
pub async fn start_dashboard(config: AppConfig, figure_paths: Vec<PathBuf>) -> Result<()> {
    let logger = match Logger::new(&config.log_dir) {
        Ok(logger) => Some(logger),
        Err(e) => {
            eprintln!("Warning: session log disabled: {}", e);
            None
        }
    };

    let mut figures = Vec::with_capacity(figure_paths.len());
    for path in &figure_paths {
        figures.push(load_figure(path, config.promote_numeric_lists)?);
    }
    let titles: Vec<String> = figure_paths.iter().map(|p| figure_title(p)).collect();

    let session = spawn_session(figures, titles, config.pane_params(), logger.clone())?;
    let port = config.port;
    let state = Arc::new(DashboardState::new(config, figure_paths, session, logger));

    let app = Router::new()
        // HTML page
        .route("/", get(routes::index))
        // JSON API endpoints
        .route("/api/figures", get(routes::get_figures))
        .route("/api/stats", get(routes::get_stats))
        .route("/api/reload", post(routes::reload))
        // WebSocket for view synchronization
        .route("/ws", get(websocket::ws_handler))
        .with_state(state.clone());

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    println!(
        "{} serving {} figure(s) on {}",
        "plotly-pane".bright_cyan().bold(),
        state.titles.len(),
        format!("http://{}", addr).green()
    );
    if let Some(logger) = &state.logger {
        println!("Session log: {}", logger.path().display());
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Ok(panes) = state.session.stats().await {
        let mut totals = SyncMetrics::new();
        for pane in &panes {
            totals.merge(&pane.metrics);
        }
        totals.display();
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
