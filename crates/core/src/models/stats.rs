use serde::{Deserialize, Serialize};

/// 资产处理计数，累加到 task_stat 与 job_stat
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetStats {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub errors: i64,
    #[serde(default)]
    pub warnings: i64,
}

impl AssetStats {
    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.errors == 0 && self.warnings == 0
    }
}
