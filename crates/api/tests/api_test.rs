use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use taskfarm_api::{create_app, AppState};
use taskfarm_core::{config::ApiConfig, traits::AnalystClient, SchedulerResult};
use taskfarm_dispatcher::{
    AnalystRegistry, CommandExecutor, DependService, Dispatcher, JobRendezvous, LifecycleManager,
    Stores,
};
use taskfarm_infrastructure::{DatabaseManager, MetricsCollector};
use tower::ServiceExt;
use uuid::Uuid;

const ANALYST: &str = "http://analyst-1:5000";

struct NoopAnalystClient;

#[async_trait]
impl AnalystClient for NoopAnalystClient {
    async fn kill_task(&self, _endpoint: &str, _task_id: Uuid, _reason: &str) -> SchedulerResult<()> {
        Ok(())
    }
}

async fn setup() -> anyhow::Result<Router> {
    let database = DatabaseManager::in_memory().await?;
    let stores = Stores::from_database(&database);
    let metrics = MetricsCollector::new();
    let depends = Arc::new(DependService::new(stores.depends.clone()));
    let lifecycle = Arc::new(LifecycleManager::new(
        &stores,
        depends.clone(),
        Arc::new(NoopAnalystClient),
        Arc::new(JobRendezvous::default()),
        metrics.clone(),
        3,
    ));
    let analysts = Arc::new(AnalystRegistry::new(
        stores.analysts.clone(),
        stores.tasks.clone(),
        metrics.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(&stores, metrics, Default::default()));
    let (commands, _worker) = CommandExecutor::start(stores.commands.clone(), lifecycle.clone());

    let state = AppState {
        database,
        dispatcher,
        lifecycle,
        analysts,
        depends,
        commands: Arc::new(commands),
        metrics_handle: None,
        job_wait_timeout: Duration::from_millis(200),
    };
    Ok(create_app(state, &ApiConfig::default()))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> anyhow::Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&value)?)
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body)?).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

async fn create_job(app: &Router, tasks: usize) -> anyhow::Result<Value> {
    let tasks: Vec<Value> = (0..tasks)
        .map(|i| json!({"name": format!("task-{i}"), "script": {"frame": i}}))
        .collect();
    let (status, body) = call(
        app,
        Method::POST,
        "/api/v1/jobs",
        Some(json!({
            "project_id": Uuid::now_v7(),
            "name": "ingest",
            "env": {"SHOW": "demo"},
            "tasks": tasks,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    Ok(body["data"].clone())
}

#[tokio::test]
async fn test_health_check() -> anyhow::Result<()> {
    let app = setup().await?;
    let (status, body) = call(&app, Method::GET, "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn test_metrics_disabled_returns_404() -> anyhow::Result<()> {
    let app = setup().await?;
    let (status, _) = call(&app, Method::GET, "/metrics", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_analyst_round_trip() -> anyhow::Result<()> {
    let app = setup().await?;
    let job = create_job(&app, 1).await?;
    let job_id = job["id"].as_str().unwrap_or_default().to_string();

    let (status, body) = call(
        &app,
        Method::POST,
        "/rpc/ping",
        Some(json!({"endpoint": ANALYST, "free_ram": 1024, "version": "1.0"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "Up");

    let (status, body) = call(
        &app,
        Method::POST,
        "/rpc/tasks/queue",
        Some(json!({"endpoint": ANALYST, "count": 5})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let starts = body["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0]["job_id"], job_id.as_str());
    assert_eq!(starts[0]["env"]["SHOW"], "demo");
    let task_id = starts[0]["task_id"].as_str().unwrap_or_default().to_string();

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/rpc/tasks/{task_id}/started"),
        Some(json!({"endpoint": ANALYST})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/rpc/tasks/{task_id}/stats"),
        Some(json!({"total": 3, "errors": 1})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/rpc/tasks/{task_id}/stopped"),
        Some(json!({"exit_status": 0})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);

    let (_, body) = call(&app, Method::GET, &format!("/api/v1/jobs/{job_id}"), None).await?;
    assert_eq!(body["data"]["state"], "Success");

    let (_, body) = call(&app, Method::GET, &format!("/api/v1/jobs/{job_id}/stats"), None).await?;
    assert_eq!(body["data"]["total"], 3);

    let (_, body) = call(&app, Method::GET, &format!("/api/v1/jobs/{job_id}/wait"), None).await?;
    assert_eq!(body["data"]["state"], "Success");
    assert_eq!(body["data"]["counts"]["success"], 1);
    Ok(())
}

#[tokio::test]
async fn test_unknown_job_is_404() -> anyhow::Result<()> {
    let app = setup().await?;
    let (status, body) = call(
        &app,
        Method::GET,
        &format!("/api/v1/jobs/{}", Uuid::now_v7()),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["type"], "JOB_NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn test_pause_with_invalid_duration_is_400() -> anyhow::Result<()> {
    let app = setup().await?;
    let job = create_job(&app, 1).await?;
    let job_id = job["id"].as_str().unwrap_or_default().to_string();

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/api/v1/jobs/{job_id}/pause"),
        Some(json!({"duration_seconds": -5})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, Method::POST, &format!("/api/v1/jobs/{job_id}/pause"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);

    let (_, body) = call(&app, Method::GET, "/api/v1/jobs?paused=true", None).await?;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_cancel_and_wait() -> anyhow::Result<()> {
    let app = setup().await?;
    let job = create_job(&app, 2).await?;
    let job_id = job["id"].as_str().unwrap_or_default().to_string();

    // 进行中的作业等待超时返回 null
    let (status, body) = call(&app, Method::GET, &format!("/api/v1/jobs/{job_id}/wait"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_null());

    let (_, body) = call(&app, Method::POST, &format!("/api/v1/jobs/{job_id}/cancel"), None).await?;
    assert_eq!(body["data"], true);
    let (_, body) = call(&app, Method::POST, &format!("/api/v1/jobs/{job_id}/cancel"), None).await?;
    assert_eq!(body["data"], false);

    let (_, body) = call(&app, Method::GET, &format!("/api/v1/jobs/{job_id}/wait"), None).await?;
    assert_eq!(body["data"]["state"], "Cancelled");
    Ok(())
}

#[tokio::test]
async fn test_invalid_command_is_rejected() -> anyhow::Result<()> {
    let app = setup().await?;
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/commands",
        Some(json!({"command_type": "SetJobPriority", "args": [Uuid::now_v7()]})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "INVALID_ARGUMENT");

    let job = create_job(&app, 1).await?;
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/commands",
        Some(json!({"command_type": "SetJobPriority", "args": [job["id"], 7]})),
    )
    .await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["state"], "Waiting");
    Ok(())
}

#[tokio::test]
async fn test_lock_analyst_stops_dispatch() -> anyhow::Result<()> {
    let app = setup().await?;
    create_job(&app, 1).await?;
    call(&app, Method::POST, "/rpc/ping", Some(json!({"endpoint": ANALYST}))).await?;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/analysts/lock",
        Some(json!({"endpoint": ANALYST})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);

    let (_, body) = call(
        &app,
        Method::POST,
        "/rpc/tasks/queue",
        Some(json!({"endpoint": ANALYST, "count": 1})),
    )
    .await?;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));

    let (_, body) = call(
        &app,
        Method::GET,
        "/api/v1/analysts/detail?endpoint=http%3A%2F%2Fanalyst-1%3A5000",
        None,
    )
    .await?;
    assert_eq!(body["data"]["lock_state"], "Locked");
    Ok(())
}

#[tokio::test]
async fn test_job_dependency_view() -> anyhow::Result<()> {
    let app = setup().await?;
    let upstream = create_job(&app, 1).await?;
    let downstream = create_job(&app, 1).await?;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/depends",
        Some(json!({
            "type": "JobOnJob",
            "depender": downstream["id"],
            "dependee": upstream["id"],
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["state"], "Active");

    let upstream_id = upstream["id"].as_str().unwrap_or_default();
    let (_, body) = call(
        &app,
        Method::GET,
        &format!("/api/v1/jobs/{upstream_id}/depends"),
        None,
    )
    .await?;
    assert_eq!(body["data"]["dependents"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"]["depends_on"].as_array().map(Vec::len), Some(0));
    Ok(())
}
