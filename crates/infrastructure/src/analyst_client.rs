use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use taskfarm_core::{
    config::AnalystClientConfig, traits::AnalystClient, SchedulerError, SchedulerResult,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// 通过HTTP向Analyst发送控制请求
pub struct HttpAnalystClient {
    http_client: reqwest::Client,
}

impl HttpAnalystClient {
    pub fn new(config: &AnalystClientConfig) -> SchedulerResult<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_millis))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { http_client })
    }

    fn kill_url(endpoint: &str, task_id: Uuid) -> String {
        format!("{}/kill/{}", endpoint.trim_end_matches('/'), task_id)
    }
}

#[async_trait]
impl AnalystClient for HttpAnalystClient {
    async fn kill_task(&self, endpoint: &str, task_id: Uuid, reason: &str) -> SchedulerResult<()> {
        let url = Self::kill_url(endpoint, task_id);
        debug!("发送kill请求: {}", url);

        let unreachable = |message: String| SchedulerError::AnalystUnreachable {
            endpoint: endpoint.to_string(),
            message,
        };

        let response = self
            .http_client
            .delete(&url)
            .json(&json!({ "reason": reason }))
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("kill任务 {} 失败: HTTP {} - {}", task_id, status, body);
            Err(unreachable(format!("HTTP {status} - {body}")))
        }
    }
}
