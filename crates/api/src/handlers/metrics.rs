use axum::{extract::State, http::header, response::IntoResponse};

use crate::{error::ApiError, routes::AppState};

/// Prometheus 文本格式
pub async fn render_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let handle = state.metrics_handle.as_ref().ok_or(ApiError::NotFound)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
