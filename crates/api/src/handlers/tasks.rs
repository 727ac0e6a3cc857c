use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use taskfarm_core::models::{TaskErrorFilter, TaskFilter, TaskState};
use uuid::Uuid;

use crate::{error::ApiResult, response::success, routes::AppState};

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct TaskQueryParams {
    pub job_id: Option<Uuid>,
    pub state: Option<TaskState>,
    pub host: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let filter = TaskFilter {
        job_id: params.job_id,
        states: params.state.map(|s| vec![s]),
        host: params.host,
        limit: params.limit,
        offset: params.offset,
    };
    Ok(success(state.lifecycle.list_tasks(&filter).await?))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.lifecycle.get_task(id).await?))
}

pub async fn get_task_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.lifecycle.get_task_stats(id).await?))
}

pub async fn get_task_errors(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let filter = TaskErrorFilter {
        task_id: Some(id),
        ..Default::default()
    };
    Ok(success(state.lifecycle.list_task_errors(&filter).await?))
}

/// 手动重试
pub async fn retry_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<ReasonRequest>>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = request.unwrap_or_default();
    let reason = request.reason.as_deref().unwrap_or("手动重试");
    Ok(success(state.lifecycle.retry_task(id, reason).await?))
}

pub async fn skip_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<ReasonRequest>>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = request.unwrap_or_default();
    let reason = request.reason.as_deref().unwrap_or("手动跳过");
    Ok(success(state.lifecycle.skip_task(id, reason).await?))
}
