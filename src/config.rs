//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效管道的配置结构和解析逻辑。

use crate::error::{Result, SyncError};
use crate::keys::{self, KeyPattern};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_VERSION: u32 = 1;
pub const CONFIG_VERSION_FIELD: &str = "config_version";

/// 失效事件的规范主题名
pub const DEFAULT_TOPIC: &str = "cache-invalidation";

/// 覆盖消息代理连接字符串的环境变量
pub const ENV_BROKER_URL: &str = "OXSYNC_BROKER_URL";
/// 覆盖缓存连接字符串的环境变量
pub const ENV_CACHE_URL: &str = "OXSYNC_CACHE_URL";
/// 覆盖数据库连接字符串的环境变量
pub const ENV_DATABASE_URL: &str = "OXSYNC_DATABASE_URL";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// 真实数据源配置，缺省时不执行重建
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// 全局配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GlobalConfig {
    /// 服务名称，用于日志和默认消费者名
    pub service_name: String,
    /// 默认的缓存过期时间（秒），与读路径保持一致
    pub default_ttl: u64,
    /// 日志过滤表达式（`RUST_LOG` 语法）
    pub log_filter: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            service_name: "blog".to_string(),
            default_ttl: 3600,
            log_filter: "info".to_string(),
        }
    }
}

/// 消息代理类型
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    /// Redis Streams + 消费者组
    #[default]
    Redis,
    /// 进程内代理，仅用于测试和单进程开发
    Memory,
}

/// 消息代理配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BrokerConfig {
    pub mode: BrokerMode,
    /// 连接字符串
    pub connection_string: SecretString,
    /// 失效主题名
    pub topic: String,
    /// 消费者组名，同组内的消费者竞争消费
    pub consumer_group: String,
    /// 消费者名称，缺省时取 `HOSTNAME` 或服务名
    pub consumer_name: Option<String>,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 命令执行超时时间（毫秒）
    pub command_timeout_ms: u64,
    /// 单次拉取的阻塞等待时间（毫秒）
    pub block_ms: u64,
    /// 认领其他消费者遗留消息的空闲阈值（毫秒），0 表示禁用
    ///
    /// 必须大于 `consumer.handler_timeout_ms`，否则仍在处理中的消息会被其他消费者接管
    pub claim_idle_ms: u64,
    /// Stream 的近似最大长度（`XADD MAXLEN ~`），0 表示不裁剪
    ///
    /// 各消费者组共享同一个 Stream，确认不会删除条目，由该上限回收已消费的历史
    pub stream_max_len: u64,
    /// 重连策略
    pub reconnect: ReconnectConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: BrokerMode::Redis,
            connection_string: SecretString::from("redis://localhost:6379".to_string()),
            topic: DEFAULT_TOPIC.to_string(),
            consumer_group: "blog-service".to_string(),
            consumer_name: None,
            connection_timeout_ms: 5000,
            command_timeout_ms: 3000,
            block_ms: 1000,
            claim_idle_ms: 60_000,
            stream_max_len: 100_000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// 解析最终使用的消费者名称
    pub fn resolved_consumer_name(&self, service_name: &str) -> String {
        self.consumer_name
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| format!("{}-consumer", service_name))
    }
}

/// 重连策略配置
///
/// 指数退避 + 熔断器
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ReconnectConfig {
    /// 初始退避时间（毫秒）
    pub initial_backoff_ms: u64,
    /// 最大退避时间（毫秒）
    pub max_backoff_ms: u64,
    /// 退避倍数
    pub multiplier: f64,
    /// 连续失败多少次后熔断，0 表示禁用熔断
    pub circuit_breaker_threshold: u32,
    /// 熔断持续时间（毫秒）
    pub circuit_open_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            circuit_breaker_threshold: 5,
            circuit_open_ms: 30_000,
        }
    }
}

/// 缓存存储类型
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// 共享 Redis
    #[default]
    Redis,
    /// 进程内 moka 缓存
    Memory,
}

/// 缓存存储配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CacheConfig {
    pub mode: CacheMode,
    /// 连接字符串
    pub connection_string: SecretString,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 命令执行超时时间（毫秒）
    pub command_timeout_ms: u64,
    /// `SCAN` 每批次的 `COUNT` 提示
    pub scan_count: usize,
    /// 缓存项TTL（秒），缺省时使用全局配置
    pub ttl: Option<u64>,
    /// 进程内缓存的最大条目数
    pub memory_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Redis,
            connection_string: SecretString::from("redis://localhost:6379".to_string()),
            connection_timeout_ms: 5000,
            command_timeout_ms: 3000,
            scan_count: 500,
            ttl: None,
            memory_capacity: 10_000,
        }
    }
}

/// 消费者配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ConsumerConfig {
    /// 是否在服务内启动消费者
    pub enabled: bool,
    /// 单条消息的处理超时（毫秒），超时后否定确认并重新入队
    pub handler_timeout_ms: u64,
    /// 已处理事件标记的保留时间（秒）
    pub processed_marker_ttl: u64,
    /// 失效后重建配置
    pub rebuild: RebuildConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            handler_timeout_ms: 10_000,
            processed_marker_ttl: 86_400,
            rebuild: RebuildConfig::default(),
        }
    }
}

/// 失效后重建配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RebuildConfig {
    pub enabled: bool,
    /// 重建的规范键
    pub key: String,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key: keys::default_listing_key(),
        }
    }
}

/// 真实数据源配置
#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    /// 连接字符串（postgres://、mysql:// 或 sqlite:）
    pub url: SecretString,
    /// 连接池最大连接数
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// 连接超时时间（毫秒）
    #[serde(default = "default_db_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_db_timeout_ms() -> u64 {
    5000
}

impl Config {
    /// 从TOML文件加载配置，应用环境变量覆盖并验证
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| SyncError::ConfigError(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.apply_env_overrides();
        config.validate().map_err(SyncError::ConfigError)?;
        Ok(config)
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_BROKER_URL) {
            self.broker.connection_string = SecretString::from(url);
        }
        if let Ok(url) = std::env::var(ENV_CACHE_URL) {
            self.cache.connection_string = SecretString::from(url);
        }
        if let Ok(url) = std::env::var(ENV_DATABASE_URL) {
            match self.database.as_mut() {
                Some(db) => db.url = SecretString::from(url),
                None => {
                    self.database = Some(DatabaseConfig {
                        url: SecretString::from(url),
                        max_connections: default_max_connections(),
                        connect_timeout_ms: default_db_timeout_ms(),
                    })
                }
            }
        }
    }

    /// 缓存项实际使用的TTL
    pub fn cache_ttl(&self) -> u64 {
        self.cache.ttl.unwrap_or(self.global.default_ttl)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有必需的字段都已设置，并且值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        // 验证配置版本
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        if self.global.service_name.is_empty() {
            return Err("Global service_name cannot be empty".to_string());
        }

        let ttl = self.cache_ttl();
        if ttl == 0 {
            return Err("Cache TTL cannot be zero".to_string());
        }
        if ttl > 86400 * 30 {
            return Err("Cache TTL cannot exceed 30 days (2592000 seconds)".to_string());
        }

        // 验证消息代理配置
        let broker = &self.broker;
        if broker.topic.is_empty() {
            return Err("Broker topic cannot be empty".to_string());
        }
        if broker.consumer_group.is_empty() {
            return Err("Broker consumer_group cannot be empty".to_string());
        }
        if !(100..=30000).contains(&broker.connection_timeout_ms) {
            return Err("Broker connection_timeout_ms must be between 100 and 30000 ms".to_string());
        }
        if !(100..=60000).contains(&broker.command_timeout_ms) {
            return Err("Broker command_timeout_ms must be between 100 and 60000 ms".to_string());
        }
        if !(1..=60000).contains(&broker.block_ms) {
            return Err("Broker block_ms must be between 1 and 60000 ms".to_string());
        }

        let reconnect = &broker.reconnect;
        if reconnect.initial_backoff_ms == 0 {
            return Err("Reconnect initial_backoff_ms cannot be zero".to_string());
        }
        if reconnect.max_backoff_ms < reconnect.initial_backoff_ms {
            return Err(format!(
                "Reconnect max_backoff_ms ({}) must be >= initial_backoff_ms ({})",
                reconnect.max_backoff_ms, reconnect.initial_backoff_ms
            ));
        }
        if reconnect.multiplier < 1.0 {
            return Err("Reconnect multiplier must be >= 1.0".to_string());
        }

        // 验证缓存配置
        if !(100..=30000).contains(&self.cache.connection_timeout_ms) {
            return Err("Cache connection_timeout_ms must be between 100 and 30000 ms".to_string());
        }
        if !(100..=60000).contains(&self.cache.command_timeout_ms) {
            return Err("Cache command_timeout_ms must be between 100 and 60000 ms".to_string());
        }
        if self.cache.scan_count == 0 || self.cache.scan_count > 100_000 {
            return Err("Cache scan_count must be between 1 and 100000".to_string());
        }
        if self.cache.mode == CacheMode::Memory && self.cache.memory_capacity == 0 {
            return Err("Cache memory_capacity cannot be zero".to_string());
        }

        // 验证消费者配置
        let consumer = &self.consumer;
        if !(100..=600_000).contains(&consumer.handler_timeout_ms) {
            return Err("Consumer handler_timeout_ms must be between 100 and 600000 ms".to_string());
        }
        if broker.claim_idle_ms > 0 && broker.claim_idle_ms <= consumer.handler_timeout_ms {
            return Err(format!(
                "Broker claim_idle_ms ({}) must exceed consumer handler_timeout_ms ({})",
                broker.claim_idle_ms, consumer.handler_timeout_ms
            ));
        }
        if consumer.processed_marker_ttl == 0 {
            return Err("Consumer processed_marker_ttl cannot be zero".to_string());
        }
        if consumer.rebuild.enabled {
            let pattern = KeyPattern::parse(&consumer.rebuild.key)
                .map_err(|e| format!("Rebuild key is invalid: {}", e))?;
            if pattern.is_glob() || !pattern.in_namespace() {
                return Err(format!(
                    "Rebuild key '{}' must be an exact key in the cache namespace",
                    consumer.rebuild.key
                ));
            }
        }

        if let Some(db) = &self.database {
            if db.max_connections == 0 {
                return Err("Database max_connections cannot be zero".to_string());
            }
        }

        Ok(())
    }
}
