use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use taskfarm_core::models::CommandSpec;
use uuid::Uuid;

use crate::{
    error::ApiResult,
    response::{accepted, success},
    routes::AppState,
};

/// 提交管理命令，参数校验失败时返回 400 且不会持久化
pub async fn submit_command(
    State(state): State<AppState>,
    Json(spec): Json<CommandSpec>,
) -> ApiResult<impl IntoResponse> {
    let command = state.commands.submit(&spec).await?;
    Ok(accepted(command))
}

pub async fn get_command(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.commands.get(id).await?))
}
