//! Axum route handlers for the Team Formation API.

use axum::{extract::State, Json};

use crate::errors::AppError;
use crate::formation::engine::{
    FormationRequest, FormationResponse, QualityRequest, QualityResponse,
};
use crate::state::AppState;

/// POST /api/v1/teams/form
///
/// Forms the best team of `team_size` members from `candidate_ids`, plus ranked
/// alternatives, the quality gate outcome and the judge's selection.
pub async fn handle_form_team(
    State(state): State<AppState>,
    Json(request): Json<FormationRequest>,
) -> Result<Json<FormationResponse>, AppError> {
    let response = state.engine.form_team(request).await?;
    Ok(Json(response))
}

/// POST /api/v1/teams/quality
///
/// Runs the quality gate on a caller-supplied team. A failing team is a normal
/// response carrying `rejection`, not an error.
pub async fn handle_team_quality(
    State(state): State<AppState>,
    Json(request): Json<QualityRequest>,
) -> Result<Json<QualityResponse>, AppError> {
    if request.team.is_empty() {
        return Err(AppError::InvalidInput("team cannot be empty".to_string()));
    }

    let response = state.engine.check_quality(request).await?;
    Ok(Json(response))
}
