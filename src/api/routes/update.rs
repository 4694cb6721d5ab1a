//! Metric update endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};

use crate::api::{
    error::ApiResult,
    sealed::{SealedJson, signed_json},
    state::ApiState,
};
use crate::metric::Metric;

/// POST /update/
///
/// Merge one metric and return the stored result
pub async fn update_json(
    State(state): State<ApiState>,
    SealedJson(metric): SealedJson<Metric>,
) -> ApiResult<Response> {
    let stored = state.service.set_metric(metric).await?;
    signed_json(&state.opener, &stored)
}

/// POST /updates/
///
/// Merge a batch in order; repeated keys accumulate within the batch
pub async fn update_batch(
    State(state): State<ApiState>,
    SealedJson(metrics): SealedJson<Vec<Metric>>,
) -> ApiResult<Response> {
    let stored = state.service.set_metrics(metrics).await?;
    signed_json(&state.opener, &stored)
}

/// POST /update/:kind/:id/:value
pub async fn update_text(
    State(state): State<ApiState>,
    Path((kind, id, value)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let metric = Metric::parse(&kind, &id, &value)?;
    state.service.set_metric(metric).await?;
    Ok(StatusCode::OK)
}
