use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use taskfarm_core::models::{Depend, DependSpec};
use uuid::Uuid;

use crate::{
    error::ApiResult,
    response::{created, success, success_with_message},
    routes::AppState,
};

/// 一个作业或任务的上下游依赖
#[derive(Debug, Serialize)]
pub struct DependView {
    pub depends_on: Vec<Depend>,
    pub dependents: Vec<Depend>,
}

/// 创建依赖；被依赖方已经成功时不会创建，data 为 null
pub async fn create_depend(
    State(state): State<AppState>,
    Json(spec): Json<DependSpec>,
) -> ApiResult<axum::response::Response> {
    let response = match state.depends.create(&spec).await? {
        Some(depend) => created(depend).into_response(),
        None => success_with_message(None::<Depend>, "被依赖方已完成，无需创建依赖")
            .into_response(),
    };
    Ok(response)
}

pub async fn get_depend(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.depends.get(id).await?))
}

pub async fn job_depends(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let view = DependView {
        depends_on: state.depends.what_job_depends_on(id).await?,
        dependents: state.depends.what_depends_on_job(id).await?,
    };
    Ok(success(view))
}

pub async fn task_depends(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let view = DependView {
        depends_on: state.depends.what_task_depends_on(id).await?,
        dependents: state.depends.what_depends_on_task(id).await?,
    };
    Ok(success(view))
}
