#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use taskfarm_core::{
    config::{DispatcherConfig, MaintenanceConfig},
    models::{AnalystSpec, Job, JobSpec, Task, TaskFilter, TaskSpec},
    traits::AnalystClient,
    SchedulerError, SchedulerResult,
};
use taskfarm_dispatcher::{
    AnalystRegistry, ClusterLockExecutor, DependService, Dispatcher, JobRendezvous,
    LifecycleManager, MaintenanceService, Stores,
};
use taskfarm_infrastructure::{DatabaseManager, MetricsCollector};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const ANALYST: &str = "http://analyst-1:5000";

/// 记录所有kill请求的Analyst客户端
#[derive(Default)]
pub struct RecordingAnalystClient {
    pub kills: Mutex<Vec<(String, Uuid, String)>>,
    pub fail: bool,
}

impl RecordingAnalystClient {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub async fn killed(&self) -> Vec<Uuid> {
        self.kills.lock().await.iter().map(|(_, id, _)| *id).collect()
    }
}

#[async_trait]
impl AnalystClient for RecordingAnalystClient {
    async fn kill_task(&self, endpoint: &str, task_id: Uuid, reason: &str) -> SchedulerResult<()> {
        self.kills
            .lock()
            .await
            .push((endpoint.to_string(), task_id, reason.to_string()));
        if self.fail {
            return Err(SchedulerError::AnalystUnreachable {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

pub struct Harness {
    pub db: DatabaseManager,
    pub stores: Stores,
    pub client: Arc<RecordingAnalystClient>,
    pub rendezvous: Arc<JobRendezvous>,
    pub depends: Arc<DependService>,
    pub lifecycle: Arc<LifecycleManager>,
    pub registry: Arc<AnalystRegistry>,
    pub locks: Arc<ClusterLockExecutor>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_client(RecordingAnalystClient::default()).await
    }

    pub async fn with_client(client: RecordingAnalystClient) -> Self {
        Self::build(client, DispatcherConfig::default()).await
    }

    pub async fn build(client: RecordingAnalystClient, config: DispatcherConfig) -> Self {
        let db = DatabaseManager::in_memory()
            .await
            .expect("in-memory database")
            .with_default_max_running_tasks(config.default_max_running_tasks);
        let stores = Stores::from_database(&db);
        let metrics = MetricsCollector::new();
        let client = Arc::new(client);
        let rendezvous = Arc::new(JobRendezvous::default());
        let depends = Arc::new(DependService::new(stores.depends.clone()));
        let lifecycle = Arc::new(LifecycleManager::new(
            &stores,
            depends.clone(),
            client.clone(),
            rendezvous.clone(),
            metrics.clone(),
            config.auto_retry_limit,
        ));
        let registry = Arc::new(AnalystRegistry::new(
            stores.analysts.clone(),
            stores.tasks.clone(),
            metrics.clone(),
        ));
        let locks = Arc::new(ClusterLockExecutor::new(stores.cluster_locks.clone(), "replica-a"));
        let dispatcher = Dispatcher::new(&stores, metrics, config);

        Self {
            db,
            stores,
            client,
            rendezvous,
            depends,
            lifecycle,
            registry,
            locks,
            dispatcher,
        }
    }

    pub fn maintenance(&self, config: MaintenanceConfig) -> MaintenanceService {
        MaintenanceService::new(
            &self.stores,
            self.lifecycle.clone(),
            self.registry.clone(),
            self.locks.clone(),
            MetricsCollector::new(),
            config,
        )
    }

    pub async fn register_analyst(&self, endpoint: &str) {
        self.registry
            .register(&AnalystSpec::new(endpoint))
            .await
            .expect("register analyst");
    }

    pub async fn create_job(&self, project_id: Uuid, tasks: usize) -> Job {
        self.create_job_with(job_spec(project_id, tasks)).await
    }

    pub async fn create_job_with(&self, spec: JobSpec) -> Job {
        self.lifecycle.create_job(&spec).await.expect("create job")
    }

    pub async fn tasks_of(&self, job_id: Uuid) -> Vec<Task> {
        self.lifecycle
            .list_tasks(&TaskFilter::for_job(job_id))
            .await
            .expect("list tasks")
    }

    /// 分派并开始一个任务
    pub async fn run_task(&self, endpoint: &str) -> Task {
        let mut tasks = self.dispatcher.get_next(endpoint, 1).await.expect("dispatch");
        let task = tasks.pop().expect("a dispatchable task");
        assert!(self.lifecycle.start_task(task.id, endpoint).await.expect("start"));
        task
    }
}

pub fn job_spec(project_id: Uuid, tasks: usize) -> JobSpec {
    let mut spec = JobSpec::new(project_id, "ingest");
    for i in 0..tasks {
        spec = spec.with_task(TaskSpec::new(format!("task-{i}")));
    }
    spec
}
