use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use taskfarm_core::models::{AnalystFilter, AnalystState, LockState};

use crate::{error::ApiResult, response::success, routes::AppState};

/// Analyst查询参数
#[derive(Debug, Deserialize)]
pub struct AnalystQueryParams {
    pub state: Option<AnalystState>,
    pub lock_state: Option<LockState>,
    pub limit: Option<i64>,
}

/// endpoint 本身是URL，不适合放在路径里
#[derive(Debug, Deserialize)]
pub struct EndpointParams {
    pub endpoint: String,
}

pub async fn list_analysts(
    State(state): State<AppState>,
    Query(params): Query<AnalystQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let filter = AnalystFilter {
        state: params.state,
        lock_state: params.lock_state,
        limit: params.limit,
    };
    Ok(success(state.analysts.list(&filter).await?))
}

pub async fn get_analyst(
    State(state): State<AppState>,
    Query(params): Query<EndpointParams>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.analysts.get(&params.endpoint).await?))
}

/// 锁定后不再向该节点分派任务，正在运行的任务不受影响
pub async fn lock_analyst(
    State(state): State<AppState>,
    Json(request): Json<EndpointParams>,
) -> ApiResult<impl IntoResponse> {
    let changed = state
        .analysts
        .set_lock_state(&request.endpoint, LockState::Locked)
        .await?;
    Ok(success(changed))
}

pub async fn unlock_analyst(
    State(state): State<AppState>,
    Json(request): Json<EndpointParams>,
) -> ApiResult<impl IntoResponse> {
    let changed = state
        .analysts
        .set_lock_state(&request.endpoint, LockState::Unlocked)
        .await?;
    Ok(success(changed))
}
