//! 配置管理
//!
//! 配置按以下顺序合并：各配置段的默认值、TOML配置文件、`TASKFARM_` 前缀的环境变量。
//! 每个配置段都提供 `validate()`，加载完成后统一校验。
//!
//! ```rust,no_run
//! use taskfarm_core::config::AppConfig;
//!
//! let config = AppConfig::load(Some("config/taskfarm.toml")).unwrap();
//! println!("数据库: {}", config.database.url);
//! ```

pub mod models;

pub use models::{
    AnalystClientConfig, ApiConfig, AppConfig, DatabaseConfig, DispatcherConfig,
    MaintenanceConfig, ObservabilityConfig,
};
