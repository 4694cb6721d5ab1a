//! Storage liveness endpoint

use axum::extract::State;

use crate::api::{error::ApiResult, state::ApiState};

/// GET /ping
///
/// 200 with the backend's status message, 500 when the backend is down
pub async fn ping(State(state): State<ApiState>) -> ApiResult<String> {
    let status = state.service.health().await?;
    Ok(status.message)
}
