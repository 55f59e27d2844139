//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块封装了 Redis 客户端与连接管理器的创建，缓存存储和消息代理共用。

use crate::error::{Result, SyncError};
use crate::utils::redaction::redact_connection_string;
use redis::{aio::ConnectionManager, Client};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::{timeout, Duration};

/// 打开 Redis 客户端
///
/// 连接字符串无法解析属于配置错误，不会重试
pub fn open_client(connection_string: &SecretString) -> Result<Client> {
    Client::open(connection_string.expose_secret()).map_err(|e| {
        SyncError::ConfigError(format!(
            "Invalid Redis connection string '{}': {}",
            redact_connection_string(connection_string.expose_secret()),
            e
        ))
    })
}

/// 在超时时间内建立连接管理器
///
/// 连接管理器在连接断开后会自动重连；首次连接失败或超时返回 `Err`，
/// 由调用方决定映射为哪类错误
pub async fn connect_manager(
    client: &Client,
    connection_timeout_ms: u64,
) -> std::result::Result<ConnectionManager, String> {
    let target = redact_connection_string(&client.get_connection_info().addr.to_string());
    match timeout(
        Duration::from_millis(connection_timeout_ms),
        client.get_connection_manager(),
    )
    .await
    {
        Ok(Ok(manager)) => {
            tracing::debug!("Redis连接已建立: {}", target);
            Ok(manager)
        }
        Ok(Err(e)) => Err(format!("Failed to connect to {}: {}", target, e)),
        Err(_) => Err(format!(
            "Connection timed out after {}ms. Target: {}",
            connection_timeout_ms, target
        )),
    }
}
