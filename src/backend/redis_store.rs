//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于 Redis 的共享缓存存储。

use super::redis_provider::{connect_manager, open_client};
use super::CacheStore;
use crate::config::CacheConfig;
use crate::error::{Result, SyncError};
use crate::keys::KeyPattern;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::BTreeSet;
use std::future::Future;
use tokio::time::{timeout, Duration};
use tracing::{debug, instrument};

/// 单次 `DEL` 命令携带的最大键数
const DELETE_CHUNK_SIZE: usize = 500;

/// Redis 缓存存储
///
/// 连接管理器是多路复用的，可被读路径和消费者并发共享
#[derive(Clone)]
pub struct RedisCacheStore {
    manager: ConnectionManager,
    scan_count: usize,
    command_timeout_ms: u64,
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("scan_count", &self.scan_count)
            .field("command_timeout_ms", &self.command_timeout_ms)
            .finish()
    }
}

fn cache_err(e: redis::RedisError) -> SyncError {
    SyncError::CacheUnavailable(e.to_string())
}

impl RedisCacheStore {
    /// 创建新的 Redis 缓存存储
    ///
    /// # 参数
    ///
    /// * `config` - 缓存配置
    ///
    /// # 返回值
    ///
    /// 连接失败返回 `CacheUnavailable`，连接字符串无效返回 `ConfigError`
    #[instrument(skip(config), level = "info", name = "init_redis_cache_store")]
    pub async fn new(config: &CacheConfig) -> Result<Self> {
        let client = open_client(&config.connection_string)?;
        let manager = connect_manager(&client, config.connection_timeout_ms)
            .await
            .map_err(SyncError::CacheUnavailable)?;
        Ok(Self::from_manager(
            manager,
            config.scan_count,
            config.command_timeout_ms,
        ))
    }

    /// 基于已有的连接管理器创建
    pub fn from_manager(manager: ConnectionManager, scan_count: usize, command_timeout_ms: u64) -> Self {
        Self {
            manager,
            scan_count: scan_count.max(1),
            command_timeout_ms,
        }
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(Duration::from_millis(self.command_timeout_ms), fut).await {
            Ok(result) => result.map_err(cache_err),
            Err(_) => Err(SyncError::CacheUnavailable(format!(
                "{} timed out after {}ms",
                op, self.command_timeout_ms
            ))),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        self.bounded("GET", redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: u64) -> Result<()> {
        debug!("Setting key: {} with ttl: {}", key, ttl);
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if ttl > 0 {
            cmd.arg("EX").arg(ttl);
        }
        let _: () = self.bounded("SET", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if ttl > 0 {
            cmd.arg("EX").arg(ttl);
        }
        let result: Option<String> = self.bounded("SET NX", cmd.query_async(&mut conn)).await?;
        Ok(result.is_some())
    }

    /// 使用游标 `SCAN` 枚举，不会像 `KEYS` 那样阻塞 Redis
    #[instrument(skip(self), level = "debug")]
    async fn keys_matching(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let mut found = BTreeSet::new();
        let mut cursor = 0u64;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = self
                .bounded(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern.as_str())
                        .arg("COUNT")
                        .arg(self.scan_count)
                        .query_async(&mut conn),
                )
                .await?;

            // SCAN 可能重复返回同一个键
            found.extend(keys);

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        debug!("SCAN pattern={} matched {} keys", pattern, found.len());
        Ok(found.into_iter().collect())
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        let mut conn = self.manager.clone();
        let mut deleted = 0usize;
        for chunk in keys.chunks(DELETE_CHUNK_SIZE) {
            let mut cmd = redis::cmd("DEL");
            for key in chunk {
                cmd.arg(key);
            }
            let removed: u64 = self.bounded("DEL", cmd.query_async(&mut conn)).await?;
            deleted += removed as usize;
        }
        Ok(deleted)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let response: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        debug!("Redis缓存响应: {}", response);
        Ok(())
    }
}
