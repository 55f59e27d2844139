//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效事件的发布者。

use crate::config::BrokerConfig;
use crate::error::{Result, SyncError};
use crate::event::InvalidationEvent;
use crate::metrics::{counter, GLOBAL_METRICS};
use crate::queue::{Connector, ManagedChannel};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// 提交后发布的结果
///
/// 发布失败不会影响已提交的写操作，最坏情况是缓存在TTL到期前保持陈旧
#[derive(Debug)]
pub enum PublishOutcome {
    /// 事件已进入队列
    Published { idempotency_id: Uuid },
    /// 代理不可用，事件未发送
    Degraded(SyncError),
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

/// 缓存失效发布者
///
/// 持有一个托管通道，在写操作提交后向主题发送失效事件，不访问缓存存储
pub struct InvalidationPublisher {
    channel: ManagedChannel,
    topic: String,
    command_timeout: Duration,
}

impl InvalidationPublisher {
    /// 创建新的失效发布者
    ///
    /// # 参数
    ///
    /// * `connector` - 通道工厂
    /// * `config` - 代理配置，提供主题名称、超时和重连策略
    pub fn new(connector: Arc<dyn Connector>, config: &BrokerConfig) -> Self {
        Self {
            channel: ManagedChannel::new(connector, &config.reconnect),
            topic: config.topic.clone(),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
        }
    }

    /// 默认主题
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 发布失效事件
    ///
    /// 只能在触发写操作提交之后调用。发送前会校验事件；
    /// 发送失败时重置通道，下次发布时重连
    ///
    /// # 参数
    ///
    /// * `topic` - 主题名称
    /// * `event` - 失效事件
    #[instrument(skip(self, event), fields(keys = ?event.keys), level = "debug")]
    pub async fn publish(&self, topic: &str, event: &InvalidationEvent) -> Result<()> {
        event.validate()?;
        let payload = event.to_payload()?;

        let channel = self.channel.channel().await?;
        let sent = timeout(self.command_timeout, async {
            self.channel.ensure_topic(&channel, topic).await?;
            channel.send(topic, &payload).await
        })
        .await
        .unwrap_or_else(|_| {
            Err(SyncError::BrokerUnavailable(format!(
                "publish timed out after {}ms",
                self.command_timeout.as_millis()
            )))
        });

        match sent {
            Ok(()) => {
                GLOBAL_METRICS.incr(topic, counter::PUBLISHED);
                debug!("失效事件已发布: topic={}", topic);
                Ok(())
            }
            Err(e) => {
                self.channel.reset().await;
                self.channel.record_failure();
                Err(match e {
                    SyncError::BrokerUnavailable(_) => e,
                    other => SyncError::BrokerUnavailable(other.to_string()),
                })
            }
        }
    }

    /// 向默认主题发布失效指定键的事件
    pub async fn invalidate<I, S>(&self, keys: I) -> Result<Uuid>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let event = InvalidationEvent::invalidate(keys);
        self.publish(&self.topic, &event).await?;
        Ok(event.idempotency_id.unwrap_or_default())
    }

    /// 写操作提交后发布，失败只记录日志
    pub async fn publish_after_commit<I, S>(&self, keys: I) -> PublishOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.invalidate(keys).await {
            Ok(idempotency_id) => PublishOutcome::Published { idempotency_id },
            Err(e) => {
                GLOBAL_METRICS.incr(&self.topic, counter::PUBLISH_FAILED);
                warn!("失效事件发布失败，缓存将在TTL到期后刷新: {}", e);
                PublishOutcome::Degraded(e)
            }
        }
    }

    /// 检查代理连接
    pub async fn ping(&self) -> Result<()> {
        let channel = self.channel.channel().await?;
        let result = channel.ping().await;
        if result.is_err() {
            self.channel.reset().await;
        }
        result
    }

    /// 主题中的消息数
    pub async fn depth(&self) -> Result<u64> {
        let channel = self.channel.channel().await?;
        channel.depth(&self.topic).await
    }
}
