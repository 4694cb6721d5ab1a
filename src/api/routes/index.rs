//! HTML listing of all stored metrics

use std::fmt::Write;

use axum::{extract::State, response::Html};

use crate::api::{error::ApiResult, state::ApiState};

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// GET /
pub async fn list_metrics(State(state): State<ApiState>) -> ApiResult<Html<String>> {
    let mut metrics = state.service.list_all().await?;
    metrics.sort_by(|a, b| (a.kind().as_str(), &a.id).cmp(&(b.kind().as_str(), &b.id)));

    let mut page = String::from(
        "<!DOCTYPE html>\n<html><head><title>Metrics</title></head><body>\n<table>\n\
         <tr><th>Type</th><th>Name</th><th>Value</th></tr>\n",
    );
    for metric in &metrics {
        // writing to a String cannot fail
        let _ = writeln!(
            page,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            metric.kind(),
            escape(&metric.id),
            metric.value
        );
    }
    page.push_str("</table>\n</body></html>\n");

    Ok(Html(page))
}
