use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use taskfarm_dispatcher::{
    AnalystRegistry, CommandExecutor, DependService, Dispatcher, LifecycleManager,
};
use taskfarm_infrastructure::DatabaseManager;

use crate::handlers::{
    analysts::{get_analyst, list_analysts, lock_analyst, unlock_analyst},
    commands::{get_command, submit_command},
    depends::{create_depend, get_depend, job_depends, task_depends},
    health::health_check,
    jobs::{
        cancel_job, create_job, delete_job, get_job, get_job_counts, get_job_errors,
        get_job_stats, list_jobs, pause_job, restart_job, resume_job, retry_job_failures,
        update_job, wait_for_job,
    },
    metrics::render_metrics,
    rpc::{
        expand_task, ping, queue_tasks, task_errors, task_progress, task_rejected, task_started,
        task_stats, task_stopped,
    },
    tasks::{get_task, get_task_errors, get_task_stats, list_tasks, retry_task, skip_task},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseManager,
    pub dispatcher: Arc<Dispatcher>,
    pub lifecycle: Arc<LifecycleManager>,
    pub analysts: Arc<AnalystRegistry>,
    pub depends: Arc<DependService>,
    pub commands: Arc<CommandExecutor>,
    pub metrics_handle: Option<PrometheusHandle>,
    /// 同步等待作业结果的上限
    pub job_wait_timeout: Duration,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .nest("/rpc", rpc_routes())
        .nest("/api/v1", admin_routes())
        .with_state(state)
}

/// Analyst调用的接口
fn rpc_routes() -> Router<AppState> {
    Router::new()
        .route("/ping", post(ping))
        .route("/tasks/queue", post(queue_tasks))
        .route("/tasks/{id}/started", post(task_started))
        .route("/tasks/{id}/stopped", post(task_stopped))
        .route("/tasks/{id}/rejected", post(task_rejected))
        .route("/tasks/{id}/progress", post(task_progress))
        .route("/tasks/{id}/stats", post(task_stats))
        .route("/tasks/{id}/errors", post(task_errors))
        .route("/tasks/{id}/expand", post(expand_task))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        // 作业
        .route("/jobs", get(list_jobs).post(create_job))
        .route(
            "/jobs/{id}",
            get(get_job).put(update_job).delete(delete_job),
        )
        .route("/jobs/{id}/counts", get(get_job_counts))
        .route("/jobs/{id}/stats", get(get_job_stats))
        .route("/jobs/{id}/errors", get(get_job_errors))
        .route("/jobs/{id}/depends", get(job_depends))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/restart", post(restart_job))
        .route("/jobs/{id}/retry-failures", post(retry_job_failures))
        .route("/jobs/{id}/pause", post(pause_job))
        .route("/jobs/{id}/resume", post(resume_job))
        .route("/jobs/{id}/wait", get(wait_for_job))
        // 任务
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/stats", get(get_task_stats))
        .route("/tasks/{id}/errors", get(get_task_errors))
        .route("/tasks/{id}/depends", get(task_depends))
        .route("/tasks/{id}/retry", post(retry_task))
        .route("/tasks/{id}/skip", post(skip_task))
        // Analyst
        .route("/analysts", get(list_analysts))
        .route("/analysts/detail", get(get_analyst))
        .route("/analysts/lock", post(lock_analyst))
        .route("/analysts/unlock", post(unlock_analyst))
        // 依赖与命令
        .route("/depends", post(create_depend))
        .route("/depends/{id}", get(get_depend))
        .route("/commands", post(submit_command))
        .route("/commands/{id}", get(get_command))
}
