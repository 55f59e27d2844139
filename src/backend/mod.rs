//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存存储接口及其实现（Redis 与进程内缓存）。

pub mod memory;
pub mod redis_store;
pub mod redis_provider;

use crate::config::{CacheConfig, CacheMode};
use crate::error::Result;
use crate::keys::KeyPattern;
use async_trait::async_trait;
use std::sync::Arc;

pub use self::memory::MemoryCacheStore;
pub use self::redis_store::RedisCacheStore;

/// 缓存存储接口
///
/// 失效管道只通过键操作缓存，所有修改都是单个原子存储操作
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// 读取缓存值
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// 写入带TTL的缓存值（秒）
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: u64) -> Result<()>;

    /// 仅当键不存在时写入，返回是否写入成功
    async fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool>;

    /// 枚举匹配模式的所有键
    async fn keys_matching(&self, pattern: &KeyPattern) -> Result<Vec<String>>;

    /// 删除一组键，返回实际删除的数量；删除不存在的键不是错误
    async fn delete_many(&self, keys: &[String]) -> Result<usize>;

    /// 检查连接是否正常
    async fn ping(&self) -> Result<()>;

    /// 删除所有匹配模式的键
    ///
    /// 精确键直接删除，不做扫描
    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize> {
        if let Some(key) = pattern.exact_key() {
            return self.delete_many(&[key.to_string()]).await;
        }
        let keys = self.keys_matching(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.delete_many(&keys).await
    }
}

/// 根据配置创建缓存存储
pub async fn connect_cache_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>> {
    match config.mode {
        CacheMode::Redis => Ok(Arc::new(RedisCacheStore::new(config).await?)),
        CacheMode::Memory => Ok(Arc::new(MemoryCacheStore::new(config.memory_capacity))),
    }
}
