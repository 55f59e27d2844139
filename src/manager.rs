//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效管道管理器，负责按配置装配缓存存储、数据源、发布者和消费者。

use crate::backend::{connect_cache_store, CacheStore};
use crate::config::Config;
use crate::database::{BlogStore, SeaOrmBlogStore};
use crate::error::{Result, SyncError};
use crate::queue::{consume, BrokerConnector, ConsumeOptions, Connector, Subscription};
use crate::service::{AuthorWriteHook, BlogReadCache};
use crate::sync::{InvalidationConsumer, InvalidationPublisher, Rebuilder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// 失效管道管理器
///
/// 每个服务进程持有一个实例；发布者长期持有一个通道，消费者按需启动
pub struct SyncManager {
    config: Config,
    cache: Arc<dyn CacheStore>,
    store: Option<Arc<dyn BlogStore>>,
    connector: Arc<dyn Connector>,
    publisher: Arc<InvalidationPublisher>,
}

impl SyncManager {
    /// 初始化管理器
    ///
    /// 根据配置连接缓存存储和（可选的）数据库；代理连接延迟到首次发布或启动消费者时建立
    ///
    /// # 参数
    ///
    /// * `config` - 管道配置
    ///
    /// # 返回值
    ///
    /// 配置无效返回 `ConfigError`，缓存存储不可达返回 `CacheUnavailable`
    #[instrument(skip(config), level = "info", fields(service = %config.global.service_name))]
    pub async fn init(config: Config) -> Result<Self> {
        config.validate().map_err(SyncError::ConfigError)?;

        let cache = connect_cache_store(&config.cache).await?;
        let store: Option<Arc<dyn BlogStore>> = match &config.database {
            Some(db) => Some(Arc::new(SeaOrmBlogStore::connect(db).await?)),
            None => None,
        };
        let consumer_name = config
            .broker
            .resolved_consumer_name(&config.global.service_name);
        let connector: Arc<dyn Connector> =
            Arc::new(BrokerConnector::new(config.broker.clone(), consumer_name));

        info!(
            "失效管道已初始化: topic={}, cache={:?}, broker={:?}",
            config.broker.topic, config.cache.mode, config.broker.mode
        );
        Ok(Self::with_components(config, cache, store, connector))
    }

    /// 使用已构造的组件创建管理器
    pub fn with_components(
        config: Config,
        cache: Arc<dyn CacheStore>,
        store: Option<Arc<dyn BlogStore>>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let publisher = Arc::new(InvalidationPublisher::new(
            connector.clone(),
            &config.broker,
        ));
        Self {
            config,
            cache,
            store,
            connector,
            publisher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 共享缓存存储
    pub fn cache(&self) -> Arc<dyn CacheStore> {
        self.cache.clone()
    }

    /// 失效事件发布者
    pub fn publisher(&self) -> Arc<InvalidationPublisher> {
        self.publisher.clone()
    }

    /// 作者服务写后钩子
    pub fn author_hook(&self) -> AuthorWriteHook {
        AuthorWriteHook::new(self.publisher.clone())
    }

    /// 博客读穿透缓存，需要配置数据库
    pub fn read_cache(&self) -> Result<BlogReadCache> {
        let store = self.store.clone().ok_or_else(|| {
            SyncError::ConfigError("read cache requires a [database] section".to_string())
        })?;
        Ok(BlogReadCache::new(
            self.cache.clone(),
            store,
            self.config.cache_ttl(),
        ))
    }

    /// 构造消费者，按配置启用重建
    pub fn consumer(&self) -> InvalidationConsumer {
        let consumer = InvalidationConsumer::new(
            self.cache.clone(),
            self.config.consumer.processed_marker_ttl,
        );
        let rebuild = &self.config.consumer.rebuild;
        match (&self.store, rebuild.enabled) {
            (Some(store), true) => consumer.with_rebuilder(Rebuilder::new(
                store.clone(),
                rebuild.key.clone(),
                self.config.cache_ttl(),
            )),
            (None, true) => {
                warn!("未配置数据库，失效后不重建缓存");
                consumer
            }
            (_, false) => consumer,
        }
    }

    /// 启动消费者，在后台订阅配置的主题
    #[instrument(skip(self), level = "info")]
    pub fn start_consumer(&self) -> Result<Subscription> {
        if !self.config.consumer.enabled {
            return Err(SyncError::ConfigError(
                "consumer is disabled in configuration".to_string(),
            ));
        }
        let options = ConsumeOptions {
            handler_timeout: Duration::from_millis(self.config.consumer.handler_timeout_ms),
            reconnect: self.config.broker.reconnect.clone(),
        };
        info!("启动失效消费者: topic={}", self.config.broker.topic);
        Ok(consume(
            self.connector.clone(),
            self.config.broker.topic.clone(),
            Arc::new(self.consumer()),
            options,
        ))
    }
}
