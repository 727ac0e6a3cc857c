use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use taskfarm_core::models::{JobFilter, JobSpec, JobState, JobUpdateSpec, TaskErrorFilter};
use uuid::Uuid;

use crate::{
    error::ApiResult,
    response::{created, success, success_with_message},
    routes::AppState,
};

/// 作业查询参数
#[derive(Debug, Deserialize)]
pub struct JobQueryParams {
    pub project_id: Option<Uuid>,
    pub state: Option<JobState>,
    pub paused: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PauseRequest {
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WaitParams {
    pub timeout_seconds: Option<u64>,
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> ApiResult<impl IntoResponse> {
    let job = state.lifecycle.create_job(&spec).await?;
    Ok(created(job))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let filter = JobFilter {
        project_id: params.project_id,
        states: params.state.map(|s| vec![s]),
        paused: params.paused,
        limit: params.limit,
        offset: params.offset,
    };
    let jobs = state.lifecycle.list_jobs(&filter).await?;
    Ok(success(jobs))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.lifecycle.get_job(id).await?))
}

pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(spec): Json<JobUpdateSpec>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.lifecycle.update_job(id, &spec).await?))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.lifecycle.delete_job(id).await?))
}

pub async fn get_job_counts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.lifecycle.get_job_counts(id).await?))
}

pub async fn get_job_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.lifecycle.get_job_stats(id).await?))
}

pub async fn get_job_errors(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let filter = TaskErrorFilter {
        job_id: Some(id),
        ..Default::default()
    };
    Ok(success(state.lifecycle.list_task_errors(&filter).await?))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let cancelled = state.lifecycle.cancel_job(id).await?;
    let message = if cancelled { "作业已取消" } else { "作业不在进行中" };
    Ok(success_with_message(cancelled, message))
}

pub async fn restart_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let restarted = state.lifecycle.restart_job(id).await?;
    let message = if restarted { "作业已重新启动" } else { "作业未被取消" };
    Ok(success_with_message(restarted, message))
}

pub async fn retry_job_failures(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.lifecycle.retry_all_failures(id).await?))
}

pub async fn pause_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<PauseRequest>>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = request.unwrap_or_default();
    let paused = state
        .lifecycle
        .pause_job(id, request.duration_seconds)
        .await?;
    Ok(success(paused))
}

pub async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.lifecycle.resume_job(id).await?))
}

/// 同步等待作业结束；超时返回 data = null
pub async fn wait_for_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<WaitParams>,
) -> ApiResult<impl IntoResponse> {
    let timeout = params
        .timeout_seconds
        .map(Duration::from_secs)
        .map_or(state.job_wait_timeout, |t| t.min(state.job_wait_timeout));

    let result = state.lifecycle.wait_for_job(id, timeout).await?;
    let message = if result.is_some() {
        "作业已结束"
    } else {
        "等待超时"
    };
    Ok(success_with_message(result, message))
}
