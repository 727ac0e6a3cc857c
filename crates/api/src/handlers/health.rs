use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::warn;

use crate::routes::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (status, database) = match state.database.health_check().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => {
            warn!("数据库健康检查失败: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    };

    let body = Json(json!({
        "status": if status == StatusCode::OK { "ok" } else { "degraded" },
        "database": database,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "taskfarm",
        "version": env!("CARGO_PKG_VERSION")
    }));
    (status, body)
}
