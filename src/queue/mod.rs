//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了持久化消息队列的抽象。
//!
//! 队列提供至少一次投递：消息在被确认前不会丢失，处理失败或消费者崩溃后会重新投递。
//! 生产实现基于 Redis Streams（主题 = Stream + 消费者组），测试使用进程内代理。

pub mod managed;
pub mod memory;
pub mod redis_stream;
pub mod subscription;

use crate::config::{BrokerConfig, BrokerMode};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use self::managed::ManagedChannel;
pub use self::memory::{MemoryBroker, MemoryChannel};
pub use self::redis_stream::{RedisStreamChannel, RedisStreamConnection};
pub use self::subscription::{
    consume, ConsumeOptions, ConsumerState, Disposition, MessageHandler, Subscription,
};

/// 一次消息投递
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// 代理分配的消息ID，用于确认
    pub id: String,
    /// 所属主题
    pub topic: String,
    /// 消息体
    pub payload: Vec<u8>,
    /// 是否为重新投递
    pub redelivered: bool,
}

/// 消息通道
///
/// 所有操作都是对代理的单次往返，通道可在任务间共享
#[async_trait]
pub trait Channel: Send + Sync {
    /// 幂等地声明持久化主题
    async fn declare_topic(&self, topic: &str) -> Result<()>;

    /// 发送持久化消息
    async fn send(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// 获取下一条投递，在阻塞窗口内没有消息时返回 `None`
    async fn next_delivery(&self, topic: &str) -> Result<Option<Delivery>>;

    /// 确认消息，消息从队列中移除
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// 否定确认；`requeue` 为 true 时消息会被重新投递
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()>;

    /// 检查代理是否可达
    async fn ping(&self) -> Result<()>;

    /// 主题中尚未移除的消息数量（含未确认）
    async fn depth(&self, topic: &str) -> Result<u64>;
}

/// 通道工厂，每次调用都建立新的连接
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>>;
}

/// 已建立的代理连接
pub enum BrokerConnection {
    Redis(RedisStreamConnection),
    Memory(MemoryBroker),
}

impl BrokerConnection {
    /// 根据配置连接代理
    ///
    /// # 参数
    ///
    /// * `config` - 代理配置
    /// * `consumer_name` - 在消费者组中使用的名称
    pub async fn connect(config: &BrokerConfig, consumer_name: &str) -> Result<Self> {
        match config.mode {
            BrokerMode::Redis => Ok(BrokerConnection::Redis(
                RedisStreamConnection::connect(config, consumer_name).await?,
            )),
            BrokerMode::Memory => Ok(BrokerConnection::Memory(
                MemoryBroker::shared().with_block(Duration::from_millis(config.block_ms)),
            )),
        }
    }

    /// 在连接上打开通道
    pub fn channel(&self) -> Arc<dyn Channel> {
        match self {
            BrokerConnection::Redis(conn) => Arc::new(conn.channel()),
            BrokerConnection::Memory(broker) => Arc::new(broker.channel()),
        }
    }
}

/// 基于配置的连接器
#[derive(Clone, Debug)]
pub struct BrokerConnector {
    config: BrokerConfig,
    consumer_name: String,
}

impl BrokerConnector {
    pub fn new(config: BrokerConfig, consumer_name: impl Into<String>) -> Self {
        Self {
            config,
            consumer_name: consumer_name.into(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for BrokerConnector {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>> {
        let connection = BrokerConnection::connect(&self.config, &self.consumer_name).await?;
        Ok(connection.channel())
    }
}
