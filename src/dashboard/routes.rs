use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use std::sync::Arc;

use super::session::{load_figure, PaneStats};
use super::state::DashboardState;
use super::templates;
use crate::logger::SyncMetrics;

// ── GET /: dashboard page ───────────────────────────────────────────

pub async fn index(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    templates::render_index(&state.config, &state.titles)
}

// ── GET /api/figures: figures served, in pane order ─────────────────

#[derive(Serialize)]
pub struct FigureEntry {
    pub pane: usize,
    pub title: String,
    pub path: String,
}

pub async fn get_figures(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    let entries: Vec<FigureEntry> = state
        .figure_paths
        .iter()
        .zip(&state.titles)
        .enumerate()
        .map(|(pane, (path, title))| FigureEntry {
            pane,
            title: title.clone(),
            path: path.display().to_string(),
        })
        .collect();
    Json(entries)
}

// ── GET /api/stats: per-pane sync metrics as JSON ───────────────────

#[derive(Serialize)]
pub struct StatsResponse {
    pub panes: Vec<PaneStats>,
    pub totals: SyncMetrics,
    pub delivery_rate: f64,
}

pub async fn get_stats(
    State(state): State<Arc<DashboardState>>,
) -> Result<Json<StatsResponse>, (StatusCode, String)> {
    let panes = state
        .session
        .stats()
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    let mut totals = SyncMetrics::new();
    for pane in &panes {
        totals.merge(&pane.metrics);
    }
    Ok(Json(StatsResponse {
        delivery_rate: totals.delivery_rate(),
        panes,
        totals,
    }))
}

// ── POST /api/reload: re-read figure files and push the diffs ───────

#[derive(Serialize)]
pub struct ReloadResponse {
    pub reloaded: usize,
}

pub async fn reload(
    State(state): State<Arc<DashboardState>>,
) -> Result<Json<ReloadResponse>, (StatusCode, String)> {
    let paths = state.figure_paths.clone();
    let promote = state.config.promote_numeric_lists;
    let figures = tokio::task::spawn_blocking(move || {
        paths
            .iter()
            .map(|path| load_figure(path, promote))
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .map_err(|e| {
        if let Some(logger) = &state.logger {
            let _ = logger.log_error(&format!("reload failed: {:#}", e));
        }
        (StatusCode::UNPROCESSABLE_ENTITY, format!("{:#}", e))
    })?;

    let reloaded = state
        .session
        .reload(figures)
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    if let Some(logger) = &state.logger {
        let _ = logger.log(&format!("RELOAD {} figure(s)", reloaded));
    }
    Ok(Json(ReloadResponse { reloaded }))
}
