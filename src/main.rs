use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use taskfarm::{wait_for_shutdown_signal, AppMode, Application, ShutdownManager};
use taskfarm_core::{
    config::AppConfig,
    logging::{init_logging, LogFormat},
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskfarm")
        .version("1.0.0")
        .about("多租户资产处理任务调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/taskfarm.toml、taskfarm.toml、/etc/taskfarm/config.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["dispatcher", "api", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，缺省时使用配置文件中的值")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，缺省时使用配置文件中的值")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").cloned();
    let mode_str = matches
        .get_one::<String>("mode")
        .cloned()
        .unwrap_or_else(|| "all".to_string());

    // 日志初始化之前加载配置，命令行参数优先
    let config = AppConfig::load(config_path.as_deref()).with_context(|| {
        format!(
            "加载配置文件失败: {}",
            config_path.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format: LogFormat = matches
        .get_one::<String>("log-format")
        .cloned()
        .unwrap_or_else(|| config.observability.log_format.clone())
        .parse()?;
    init_logging(&log_level, log_format)?;

    info!("启动taskfarm调度系统");
    if let Some(path) = &config_path {
        info!("配置文件: {path}");
    }
    info!("运行模式: {mode_str}");

    let app_mode = mode_str.parse::<AppMode>()?.check_enabled(&config)?;
    let app = Arc::new(Application::new(config, app_mode).await?);

    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    app.close().await;
    info!("taskfarm调度系统已退出");
    Ok(())
}
