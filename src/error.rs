//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效管道的错误类型和处理机制。

use thiserror::Error;

/// 失效管道错误类型枚举
///
/// 失效管道中的任何错误都不会传递到HTTP响应，
/// 最坏情况下只会导致缓存数据在TTL到期前保持陈旧。
#[derive(Error, Debug)]
pub enum SyncError {
    /// 消息代理不可用（连接、发布或订阅建立失败）
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// 消息无法解析，直接确认丢弃，永不重新入队
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// 缓存存储操作失败，消息会被否定确认并重新入队
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// 重建查询失败，重建只是尽力而为
    #[error("Rebuild query failed: {0}")]
    RebuildQueryFailure(String),

    /// 发布前校验失败的事件
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis错误
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Sea-ORM数据库错误
    #[error("Sea-ORM error: {0}")]
    SeaOrmError(#[from] sea_orm::DbErr),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SyncError {
    /// 是否为不可恢复的错误
    ///
    /// 配置错误会让消费者进入 `Failed` 终态，其余错误都会触发重连
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::ConfigError(_))
    }
}

/// 失效管道操作结果类型别名
pub type Result<T> = std::result::Result<T, SyncError>;
