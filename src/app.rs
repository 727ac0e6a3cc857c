use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use taskfarm_api::{create_app, AppState};
use taskfarm_core::config::AppConfig;
use taskfarm_dispatcher::{
    AnalystRegistry, ClusterLockExecutor, CommandExecutor, DependService, Dispatcher,
    JobRendezvous, LifecycleManager, MaintenanceService, Stores,
};
use taskfarm_infrastructure::{
    install_prometheus_recorder, DatabaseManager, HttpAnalystClient, MetricsCollector,
};
use tokio::{net::TcpListener, sync::broadcast, sync::Mutex, task::JoinHandle};
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行维护循环
    Dispatcher,
    /// 仅运行HTTP服务
    Api,
    All,
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dispatcher" => Ok(AppMode::Dispatcher),
            "api" => Ok(AppMode::Api),
            "all" => Ok(AppMode::All),
            other => Err(anyhow::anyhow!("不支持的运行模式: {other}")),
        }
    }
}

impl AppMode {
    /// 校验模式对应的组件在配置中是否启用
    pub fn check_enabled(self, config: &AppConfig) -> Result<Self> {
        match self {
            AppMode::Dispatcher if !config.dispatcher.enabled => {
                Err(anyhow::anyhow!("Dispatcher模式被禁用，请检查配置"))
            }
            AppMode::Api if !config.api.enabled => {
                Err(anyhow::anyhow!("API模式被禁用，请检查配置"))
            }
            mode => Ok(mode),
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    state: AppState,
    maintenance: Arc<MaintenanceService>,
    command_worker: Mutex<Option<JoinHandle<()>>>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);
        info!("连接数据库: {}", mask_database_url(&config.database.url));

        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("运行数据库迁移失败")?;
        let database =
            database.with_default_max_running_tasks(config.dispatcher.default_max_running_tasks);

        let stores = Stores::from_database(&database);
        let metrics = MetricsCollector::new();

        let metrics_handle = if config.observability.metrics_enabled {
            match install_prometheus_recorder() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("安装Prometheus指标记录器失败，指标端点不可用: {e}");
                    None
                }
            }
        } else {
            None
        };

        let analyst_client =
            Arc::new(HttpAnalystClient::new(&config.analyst_client).context("创建Analyst客户端失败")?);
        let job_wait_timeout = Duration::from_secs(config.api.job_wait_timeout_seconds);
        let rendezvous = Arc::new(JobRendezvous::new(
            config.api.job_wait_capacity,
            job_wait_timeout,
        ));

        let depends = Arc::new(DependService::new(stores.depends.clone()));
        let lifecycle = Arc::new(LifecycleManager::new(
            &stores,
            depends.clone(),
            analyst_client,
            rendezvous,
            metrics.clone(),
            config.dispatcher.auto_retry_limit,
        ));
        let analysts = Arc::new(AnalystRegistry::new(
            stores.analysts.clone(),
            stores.tasks.clone(),
            metrics.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            &stores,
            metrics.clone(),
            config.dispatcher.clone(),
        ));

        let lock_executor = Arc::new(ClusterLockExecutor::new(
            stores.cluster_locks.clone(),
            replica_name(),
        ));
        let maintenance = Arc::new(MaintenanceService::new(
            &stores,
            lifecycle.clone(),
            analysts.clone(),
            lock_executor,
            metrics,
            config.maintenance.clone(),
        ));

        let (commands, command_worker) =
            CommandExecutor::start(stores.commands.clone(), lifecycle.clone());

        let state = AppState {
            database,
            dispatcher,
            lifecycle,
            analysts,
            depends,
            commands: Arc::new(commands),
            metrics_handle,
            job_wait_timeout,
        };

        Ok(Self {
            config,
            mode,
            state,
            maintenance,
            command_worker: Mutex::new(Some(command_worker)),
        })
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match self.mode {
            AppMode::Dispatcher => self.run_dispatcher(shutdown_rx).await,
            AppMode::Api => self.run_api(shutdown_rx).await,
            AppMode::All => self.run_all_components(shutdown_rx).await,
        }
    }

    /// 维护循环；分派本身由 Analyst 的 HTTP 请求驱动
    async fn run_dispatcher(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if !self.config.maintenance.enabled {
            info!("维护循环未启用");
            return Ok(());
        }

        self.maintenance
            .start(shutdown_rx)
            .await
            .context("维护循环运行失败")
    }

    async fn run_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let bind_address = &self.config.api.bind_address;
        info!("启动API服务器: {}", bind_address);

        let app = create_app(self.state.clone(), &self.config.api);
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {bind_address}"))?;

        info!("API服务器启动在 http://{}", bind_address);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器运行失败")?;

        info!("API服务器已停止");
        Ok(())
    }

    async fn run_all_components(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动所有组件");

        let dispatcher = async {
            if self.config.dispatcher.enabled {
                self.run_dispatcher(shutdown_rx.resubscribe()).await
            } else {
                Ok(())
            }
        };
        let api = async {
            if self.config.api.enabled {
                self.run_api(shutdown_rx.resubscribe()).await
            } else {
                Ok(())
            }
        };

        let (dispatcher_result, api_result) = tokio::join!(dispatcher, api);
        if let Err(e) = &dispatcher_result {
            error!("Dispatcher运行失败: {e:#}");
        }
        if let Err(e) = &api_result {
            error!("API服务器运行失败: {e:#}");
        }

        info!("所有组件已停止");
        dispatcher_result.and(api_result)
    }

    /// 停止命令执行器并关闭连接池
    pub async fn close(&self) {
        if let Some(worker) = self.command_worker.lock().await.take() {
            worker.abort();
        }
        self.state.database.close().await;
        info!("数据库连接池已关闭");
    }
}

/// 集群锁持有者名称：主机名加进程号
fn replica_name() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}:{}", host, std::process::id())
}

/// 屏蔽数据库URL中的密码
fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if url[colon_pos + 1..].starts_with("//") {
                return url.to_string();
            }
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app_mode() {
        assert_eq!("dispatcher".parse::<AppMode>().unwrap(), AppMode::Dispatcher);
        assert_eq!("api".parse::<AppMode>().unwrap(), AppMode::Api);
        assert_eq!("all".parse::<AppMode>().unwrap(), AppMode::All);
        assert!("worker".parse::<AppMode>().is_err());
    }

    #[test]
    fn test_disabled_mode_rejected() {
        let mut config = AppConfig::default();
        config.api.enabled = false;
        assert!(AppMode::Api.check_enabled(&config).is_err());
        assert!(AppMode::All.check_enabled(&config).is_ok());
    }

    #[test]
    fn test_mask_database_url() {
        assert_eq!(
            mask_database_url("postgres://farm:secret@db:5432/taskfarm"),
            "postgres://farm:***@db:5432/taskfarm"
        );
        assert_eq!(mask_database_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[test]
    fn test_replica_name_has_pid() {
        let name = replica_name();
        assert!(name.ends_with(&format!(":{}", std::process::id())));
    }
}
