//! Metric lookup endpoints

use axum::{
    extract::{Path, State},
    response::Response,
};

use crate::api::{
    error::ApiResult,
    sealed::{SealedJson, signed_json},
    state::ApiState,
};
use crate::metric::{MetricKey, MetricKind, MetricQuery};

/// POST /value/
pub async fn value_json(
    State(state): State<ApiState>,
    SealedJson(query): SealedJson<MetricQuery>,
) -> ApiResult<Response> {
    let metric = state.service.get_metric(&query.key()?).await?;
    signed_json(&state.opener, &metric)
}

/// GET /value/:kind/:id
///
/// The stored value as plain text
pub async fn value_text(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<String> {
    let key = MetricKey::new(kind.parse::<MetricKind>()?, id);
    Ok(state.service.get_metric_value(&key).await?)
}
