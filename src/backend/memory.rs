//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于 Moka 的进程内缓存存储。
//!
//! 与共享 Redis 语义一致（TTL、通配枚举、NX 写入），用于测试和单进程开发。

use super::CacheStore;
use crate::error::{Result, SyncError};
use crate::keys::KeyPattern;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// 进程内缓存存储
#[derive(Clone)]
pub struct MemoryCacheStore {
    // 值: (数据, 过期时间)
    cache: Cache<String, (Vec<u8>, Option<Instant>)>,
    available: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheStore")
            .field("entries", &self.cache.entry_count())
            .field("available", &self.available.load(Ordering::SeqCst))
            .finish()
    }
}

impl MemoryCacheStore {
    /// 创建新的进程内缓存
    ///
    /// # 参数
    ///
    /// * `capacity` - 最大条目数
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).build(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// 模拟存储故障，不可用期间所有操作返回 `CacheUnavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// 当前未过期的键
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, (_, expire_at))| !is_expired(*expire_at, now))
            .map(|(key, _)| key.to_string())
            .collect();
        keys.sort();
        keys
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::CacheUnavailable(
                "in-memory cache store is marked unavailable".to_string(),
            ))
        }
    }
}

fn is_expired(expire_at: Option<Instant>, now: Instant) -> bool {
    expire_at.is_some_and(|t| now >= t)
}

fn expire_at(ttl: u64) -> Option<Instant> {
    if ttl > 0 {
        Some(Instant::now() + Duration::from_secs(ttl))
    } else {
        None
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        match self.cache.get(key).await {
            Some((bytes, expire_at)) => {
                if is_expired(expire_at, Instant::now()) {
                    self.cache.remove(key).await;
                    debug!("memory get: key={}, expired=true, removed", key);
                    return Ok(None);
                }
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: u64) -> Result<()> {
        self.check_available()?;
        self.cache
            .insert(key.to_string(), (value, expire_at(ttl)))
            .await;
        Ok(())
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool> {
        self.check_available()?;
        let entry = self
            .cache
            .entry(key.to_string())
            .or_insert_with_if(
                async { (value.as_bytes().to_vec(), expire_at(ttl)) },
                |(_, existing_expire_at)| is_expired(*existing_expire_at, Instant::now()),
            )
            .await;
        Ok(entry.is_fresh())
    }

    #[instrument(skip(self), level = "debug")]
    async fn keys_matching(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        self.check_available()?;
        let now = Instant::now();
        let keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, (_, expire_at))| !is_expired(*expire_at, now) && pattern.matches(key))
            .map(|(key, _)| key.to_string())
            .collect();
        debug!("memory keys_matching: pattern={}, found={}", pattern, keys.len());
        Ok(keys)
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        self.check_available()?;
        let now = Instant::now();
        let mut deleted = 0;
        for key in keys {
            if let Some((_, expire_at)) = self.cache.remove(key).await {
                if !is_expired(expire_at, now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
