use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use taskfarm_core::SchedulerError;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Scheduler(err) => match err {
                SchedulerError::JobNotFound { .. } => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
                SchedulerError::TaskNotFound { .. } => (StatusCode::NOT_FOUND, "TASK_NOT_FOUND"),
                SchedulerError::AnalystNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "ANALYST_NOT_FOUND")
                }
                SchedulerError::DependNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "DEPEND_NOT_FOUND")
                }
                SchedulerError::CommandNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "COMMAND_NOT_FOUND")
                }
                SchedulerError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT"),
                SchedulerError::Serialization(_) => (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR"),
                SchedulerError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
                SchedulerError::AnalystUnreachable { .. } => {
                    (StatusCode::BAD_GATEWAY, "ANALYST_UNREACHABLE")
                }
                SchedulerError::Database(_)
                | SchedulerError::Configuration(_)
                | SchedulerError::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        // 内部错误不向调用方暴露细节
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("处理请求时出错: {}", self);
            "系统内部错误".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_not_found_errors_map_to_404() {
        let cases = vec![
            SchedulerError::JobNotFound { id: Uuid::nil() },
            SchedulerError::TaskNotFound { id: Uuid::nil() },
            SchedulerError::AnalystNotFound {
                endpoint: "http://a:5000".to_string(),
            },
            SchedulerError::CommandNotFound { id: Uuid::nil() },
        ];
        for err in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn test_invalid_argument_maps_to_400() {
        let error = ApiError::Scheduler(SchedulerError::InvalidArgument("x".to_string()));
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_state_maps_to_409() {
        let error = ApiError::Scheduler(SchedulerError::InvalidState("full".to_string()));
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_internal_errors_map_to_500() {
        let error = ApiError::Internal("Internal error".to_string());
        assert_eq!(error.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let error = ApiError::Scheduler(SchedulerError::Configuration("bad".to_string()));
        assert_eq!(error.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_display() {
        assert_eq!(ApiError::NotFound.to_string(), "未找到资源");
    }
}
