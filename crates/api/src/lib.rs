//! # Taskfarm API
//!
//! 基于Axum的HTTP接口，分为两部分：
//!
//! - `/rpc`：Analyst调用的同步接口(心跳、领取任务、上报开始/结束/拒绝、进度、统计、错误、扩展)
//! - `/api/v1`：管理接口(作业、任务、Analyst、依赖、命令)
//!
//! 另有 `/health` 与 `/metrics`。所有JSON响应使用 [`response::ApiResponse`] 包装，
//! 错误通过 [`error::ApiError`] 映射为HTTP状态码。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use taskfarm_core::config::ApiConfig;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};

pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, config: &ApiConfig) -> Router {
    let router = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if config.cors_enabled {
        router.layer(cors_layer(config))
    } else {
        router
    }
}
