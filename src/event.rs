//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效事件及其 JSON 线格式。
//!
//! ```json
//! {"action": "INVALIDATE_CACHE", "keys": ["blogs:*", "blog:42"],
//!  "emitted_at": "2026-01-01T00:00:00Z", "idempotency_id": "..."}
//! ```

use crate::error::{Result, SyncError};
use crate::keys::KeyPattern;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 失效动作
///
/// 缺省时视为 `INVALIDATE_CACHE`；无法识别的动作解码为 `Unknown`，
/// 消费者会确认并忽略它们
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InvalidationAction {
    /// 删除匹配的缓存项
    #[default]
    #[serde(rename = "INVALIDATE_CACHE")]
    InvalidateCache,
    /// 未来版本引入的动作
    #[serde(other)]
    Unknown,
}

/// 失效事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    #[serde(default)]
    pub action: InvalidationAction,
    /// 缓存键模式列表，精确键或 glob 模式
    pub keys: Vec<String>,
    /// 发布时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitted_at: Option<DateTime<Utc>>,
    /// 幂等标识，重复投递时用于去重
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_id: Option<Uuid>,
}

impl InvalidationEvent {
    /// 创建新的 `INVALIDATE_CACHE` 事件，附带发布时间和幂等标识
    pub fn invalidate<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: InvalidationAction::InvalidateCache,
            keys: keys.into_iter().map(Into::into).collect(),
            emitted_at: Some(Utc::now()),
            idempotency_id: Some(Uuid::new_v4()),
        }
    }

    /// 是否为缓存失效动作
    pub fn is_invalidation(&self) -> bool {
        self.action == InvalidationAction::InvalidateCache
    }

    /// 校验事件并解析所有模式
    ///
    /// `keys` 不能为空，且每个模式都必须落在读路径的命名空间内
    pub fn validate(&self) -> Result<Vec<KeyPattern>> {
        if self.keys.is_empty() {
            return Err(SyncError::InvalidEvent(
                "invalidation event must carry at least one key".to_string(),
            ));
        }

        self.keys
            .iter()
            .map(|raw| {
                let pattern = KeyPattern::parse(raw)?;
                if !pattern.in_namespace() {
                    return Err(SyncError::InvalidEvent(format!(
                        "pattern '{}' is outside the cache key namespace",
                        raw
                    )));
                }
                Ok(pattern)
            })
            .collect()
    }

    /// 编码为消息负载
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 从消息负载解码
    ///
    /// 解码失败统一映射为 `MalformedMessage`
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| SyncError::MalformedMessage(e.to_string()))
    }
}
