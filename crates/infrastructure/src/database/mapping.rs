//! 行映射辅助函数
//!
//! 存储层只使用可移植的列类型：ID 与 JSON 以 TEXT 存储，时间戳、状态序号与布尔值以 BIGINT 存储。

use sqlx::any::AnyRow;
use sqlx::Row;
use taskfarm_core::{SchedulerError, SchedulerResult};
use uuid::Uuid;

pub(crate) fn uuid_col(row: &AnyRow, column: &str) -> SchedulerResult<Uuid> {
    let value: String = row.try_get(column)?;
    parse_uuid(&value)
}

pub(crate) fn opt_uuid_col(row: &AnyRow, column: &str) -> SchedulerResult<Option<Uuid>> {
    let value: Option<String> = row.try_get(column)?;
    value.as_deref().map(parse_uuid).transpose()
}

pub(crate) fn bool_col(row: &AnyRow, column: &str) -> SchedulerResult<bool> {
    let value: i64 = row.try_get(column)?;
    Ok(value != 0)
}

pub(crate) fn json_col<T: serde::de::DeserializeOwned>(
    row: &AnyRow,
    column: &str,
) -> SchedulerResult<T> {
    let value: String = row.try_get(column)?;
    serde_json::from_str(&value)
        .map_err(|e| SchedulerError::Serialization(format!("解析字段 {column} 失败: {e}")))
}

pub(crate) fn parse_uuid(value: &str) -> SchedulerResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| SchedulerError::Serialization(format!("无效的UUID {value}: {e}")))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> SchedulerResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// 将状态序号列表展开为 `IN (...)` 内容；序号来自枚举，不含用户输入
pub(crate) fn ordinal_list(ordinals: impl IntoIterator<Item = i64>) -> String {
    ordinals
        .into_iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn bool_value(value: bool) -> i64 {
    i64::from(value)
}
