//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效后的热点缓存重建。

use crate::backend::CacheStore;
use crate::database::BlogStore;
use crate::error::{Result, SyncError};
use crate::keys::KeyPattern;
use std::sync::Arc;
use tracing::{debug, instrument};

/// 热点键重建器
///
/// 失效后立即用数据源的最新结果回填一个规范键，其余键由读路径在未命中时懒加载
#[derive(Clone)]
pub struct Rebuilder {
    store: Arc<dyn BlogStore>,
    key: String,
    ttl: u64,
}

impl Rebuilder {
    pub fn new(store: Arc<dyn BlogStore>, key: impl Into<String>, ttl: u64) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
        }
    }

    /// 重建的目标键
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 本次失效是否波及目标键
    pub fn is_affected_by(&self, patterns: &[KeyPattern]) -> bool {
        patterns.iter().any(|p| p.matches(&self.key))
    }

    /// 查询数据源并写入目标键，返回写入的记录数
    ///
    /// 查询失败返回 `RebuildQueryFailure`；写入缓存失败返回 `CacheUnavailable`
    #[instrument(skip(self, cache), fields(key = %self.key), level = "debug")]
    pub async fn rebuild(&self, cache: &dyn CacheStore) -> Result<usize> {
        let blogs = self
            .store
            .list_all()
            .await
            .map_err(|e| SyncError::RebuildQueryFailure(e.to_string()))?;
        let bytes = serde_json::to_vec(&blogs)?;
        cache.set_with_ttl(&self.key, bytes, self.ttl).await?;
        debug!("缓存已重建: key={}, entries={}", self.key, blogs.len());
        Ok(blogs.len())
    }
}
