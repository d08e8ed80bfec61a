//! Pipeline run endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use launchpad_core::pipeline::PipelineRun;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/latest", get(latest_run))
}

/// Latest retained run for the watched branch.
async fn latest_run(State(state): State<AppState>) -> Result<Json<PipelineRun>, ApiError> {
    let branch = &state.settings.branch;
    state
        .dispatcher
        .history()
        .latest(branch)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no runs for branch {}", branch)))
}
