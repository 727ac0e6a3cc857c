use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Analyst健康状态: Up=0, Down=1
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AnalystState {
    Up,
    Down,
}

ordinal_enum!(AnalystState { Up = 0, Down = 1 });

/// 管理锁定状态，与健康状态相互独立: Unlocked=0, Locked=1
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LockState {
    Unlocked,
    Locked,
}

ordinal_enum!(LockState {
    Unlocked = 0,
    Locked = 1
});

/// 远程工作进程
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Analyst {
    pub id: Uuid,
    pub endpoint: String,
    pub task_id: Option<Uuid>,
    pub total_ram: i64,
    pub free_ram: i64,
    pub free_disk: i64,
    pub load: f64,
    pub state: AnalystState,
    pub lock_state: LockState,
    pub version: String,
    pub time_created: i64,
    pub time_ping: i64,
}

/// Analyst心跳上报的节点信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AnalystSpec {
    pub endpoint: String,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub total_ram: i64,
    #[serde(default)]
    pub free_ram: i64,
    #[serde(default)]
    pub free_disk: i64,
    #[serde(default)]
    pub load: f64,
    #[serde(default)]
    pub version: String,
}

impl AnalystSpec {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalystFilter {
    pub state: Option<AnalystState>,
    pub lock_state: Option<LockState>,
    pub limit: Option<i64>,
}
