//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了博客服务的读穿透缓存。

use crate::backend::CacheStore;
use crate::database::{Blog, BlogFilter, BlogStore};
use crate::error::Result;
use crate::keys::{blog_detail_key, blog_list_key};
use crate::metrics::{counter, GLOBAL_METRICS};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// 指标中读路径使用的标签
const READ_PATH_LABEL: &str = "read-path";

/// 读取来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

/// 带来源信息的读取结果
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRead<T> {
    pub value: T,
    pub status: CacheStatus,
}

/// 博客读穿透缓存
///
/// 先查缓存，未命中时查询数据源并按固定TTL回填。缓存故障只会降级为直接查询数据源
#[derive(Clone)]
pub struct BlogReadCache {
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn BlogStore>,
    ttl: u64,
}

impl BlogReadCache {
    pub fn new(cache: Arc<dyn CacheStore>, store: Arc<dyn BlogStore>, ttl: u64) -> Self {
        Self { cache, store, ttl }
    }

    /// 列表视图，键为 `blogs:<search|all>:<category|all>`
    #[instrument(skip(self), level = "debug")]
    pub async fn get_all_blogs(
        &self,
        search: Option<&str>,
        category: Option<&str>,
    ) -> Result<CachedRead<Vec<Blog>>> {
        let key = blog_list_key(search, category);
        if let Some(blogs) = self.lookup::<Vec<Blog>>(&key).await {
            return Ok(hit(blogs));
        }

        let filter = BlogFilter::new(search, category);
        let blogs = if filter.is_empty() {
            self.store.list_all().await?
        } else {
            self.store.search(&filter).await?
        };
        self.populate(&key, &blogs).await;
        Ok(miss(blogs))
    }

    /// 详情视图，键为 `blog:<id>`；不存在的记录不缓存
    #[instrument(skip(self), level = "debug")]
    pub async fn get_single_blog(&self, id: i32) -> Result<CachedRead<Option<Blog>>> {
        let key = blog_detail_key(id);
        if let Some(blog) = self.lookup::<Blog>(&key).await {
            return Ok(hit(Some(blog)));
        }

        let blog = self.store.find_by_id(id).await?;
        if let Some(blog) = &blog {
            self.populate(&key, blog).await;
        }
        Ok(miss(blog))
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    debug!("缓存命中: {}", key);
                    GLOBAL_METRICS.incr(READ_PATH_LABEL, counter::CACHE_HIT);
                    return Some(value);
                }
                Err(e) => warn!("缓存内容无法解析，回源查询: key={}, error={}", key, e),
            },
            Ok(None) => {}
            Err(e) => warn!("缓存读取失败，回源查询: key={}, error={}", key, e),
        }
        GLOBAL_METRICS.incr(READ_PATH_LABEL, counter::CACHE_MISS);
        None
    }

    async fn populate<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("缓存序列化失败: key={}, error={}", key, e);
                return;
            }
        };
        if let Err(e) = self.cache.set_with_ttl(key, bytes, self.ttl).await {
            warn!("缓存回填失败: key={}, error={}", key, e);
        }
    }
}

fn hit<T>(value: T) -> CachedRead<T> {
    CachedRead {
        value,
        status: CacheStatus::Hit,
    }
}

fn miss<T>(value: T) -> CachedRead<T> {
    CachedRead {
        value,
        status: CacheStatus::Miss,
    }
}
