//! Analyst调用的RPC接口
//!
//! 全部为同步调用：请求返回时状态迁移已经完成。

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use taskfarm_core::models::{AnalystSpec, AssetStats, ExpandSpec, TaskErrorSpec};
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct QueueRequest {
    pub endpoint: String,
    #[serde(default = "default_queue_count")]
    pub count: usize,
}

fn default_queue_count() -> usize {
    1
}

#[derive(Debug, Deserialize)]
pub struct StartedRequest {
    pub endpoint: String,
}

#[derive(Debug, Deserialize)]
pub struct StoppedRequest {
    pub exit_status: i64,
    #[serde(default)]
    pub manual_kill: bool,
}

#[derive(Debug, Deserialize)]
pub struct RejectedRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress: i64,
}

#[derive(Debug, Deserialize)]
pub struct ErrorsRequest {
    #[serde(default)]
    pub endpoint: Option<String>,
    pub errors: Vec<TaskErrorSpec>,
}

/// 心跳：注册或刷新Analyst
pub async fn ping(
    State(state): State<AppState>,
    Json(spec): Json<AnalystSpec>,
) -> ApiResult<impl IntoResponse> {
    if spec.endpoint.trim().is_empty() {
        return Err(ApiError::BadRequest("endpoint 不能为空".to_string()));
    }
    let analyst = state.analysts.register(&spec).await?;
    Ok(success(analyst))
}

/// 领取待执行任务
pub async fn queue_tasks(
    State(state): State<AppState>,
    Json(request): Json<QueueRequest>,
) -> ApiResult<impl IntoResponse> {
    let starts = state
        .dispatcher
        .queue_pending_tasks(&request.endpoint, request.count)
        .await?;
    debug!("{} 领取了 {} 个任务", request.endpoint, starts.len());
    Ok(success(starts))
}

pub async fn task_started(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StartedRequest>,
) -> ApiResult<impl IntoResponse> {
    let started = state.lifecycle.start_task(id, &request.endpoint).await?;
    Ok(success(started))
}

pub async fn task_stopped(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StoppedRequest>,
) -> ApiResult<impl IntoResponse> {
    let stopped = state
        .lifecycle
        .stop_task(id, request.exit_status, request.manual_kill)
        .await?;
    Ok(success(stopped))
}

pub async fn task_rejected(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectedRequest>,
) -> ApiResult<impl IntoResponse> {
    let rejected = state.lifecycle.reject_task(id, &request.reason).await?;
    Ok(success(rejected))
}

pub async fn task_progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ProgressRequest>,
) -> ApiResult<impl IntoResponse> {
    let updated = state.lifecycle.report_progress(id, request.progress).await?;
    Ok(success(updated))
}

pub async fn task_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(stats): Json<AssetStats>,
) -> ApiResult<impl IntoResponse> {
    state.lifecycle.report_stats(id, &stats).await?;
    Ok(success(true))
}

pub async fn task_errors(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ErrorsRequest>,
) -> ApiResult<impl IntoResponse> {
    let written = state
        .lifecycle
        .report_errors(id, request.endpoint.as_deref(), &request.errors)
        .await?;
    Ok(success(written))
}

pub async fn expand_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(spec): Json<ExpandSpec>,
) -> ApiResult<impl IntoResponse> {
    let child = state.lifecycle.expand(id, &spec).await?;
    Ok(created(child))
}
