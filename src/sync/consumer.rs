//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效事件的消费者。
//!
//! 单条消息的处理协议：
//! 1. 解码并校验，畸形消息直接确认丢弃
//! 2. 非失效动作确认并忽略
//! 3. 已处理过的幂等标识确认并跳过
//! 4. 逐个模式枚举并删除匹配的键
//! 5. 若某个模式覆盖了重建键，重建一次；查询失败只记录日志
//! 6. 记录幂等标识后确认
//!
//! 第 4、6 步的缓存故障会否定确认并重新入队。

use super::rebuild::Rebuilder;
use crate::backend::CacheStore;
use crate::error::SyncError;
use crate::event::InvalidationEvent;
use crate::keys::{processed_marker_key, KeyPattern};
use crate::metrics::{counter, GLOBAL_METRICS};
use crate::queue::{Delivery, Disposition, MessageHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// 单条消息的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// 已删除匹配的键
    Applied { deleted: usize, rebuilt: bool },
    /// 幂等标识已处理过
    Duplicate,
    /// 非失效动作
    Ignored,
    /// 畸形消息
    Discarded { reason: String },
    /// 缓存故障，需要重新投递
    Failed { reason: String },
}

impl MessageOutcome {
    /// 对应的确认方式
    pub fn disposition(&self) -> Disposition {
        match self {
            MessageOutcome::Failed { .. } => Disposition::NackRequeue,
            _ => Disposition::Ack,
        }
    }
}

/// 失效事件消费者
#[derive(Clone)]
pub struct InvalidationConsumer {
    cache: Arc<dyn CacheStore>,
    rebuilder: Option<Rebuilder>,
    marker_ttl: u64,
}

impl InvalidationConsumer {
    /// 创建消费者
    ///
    /// # 参数
    ///
    /// * `cache` - 共享缓存存储
    /// * `marker_ttl` - 已处理标记的保留时间（秒）
    pub fn new(cache: Arc<dyn CacheStore>, marker_ttl: u64) -> Self {
        Self {
            cache,
            rebuilder: None,
            marker_ttl,
        }
    }

    /// 启用失效后重建
    pub fn with_rebuilder(mut self, rebuilder: Rebuilder) -> Self {
        self.rebuilder = Some(rebuilder);
        self
    }

    /// 处理一次投递
    #[instrument(skip(self, delivery), fields(id = %delivery.id, redelivered = delivery.redelivered), level = "debug")]
    pub async fn process(&self, delivery: &Delivery) -> MessageOutcome {
        let outcome = self.apply(&delivery.topic, &delivery.payload).await;
        self.record(&delivery.topic, &outcome);
        outcome
    }

    fn record(&self, topic: &str, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Applied { deleted, rebuilt } => {
                GLOBAL_METRICS.incr_by(topic, counter::KEYS_DELETED, *deleted as u64);
                if *rebuilt {
                    GLOBAL_METRICS.incr(topic, counter::REBUILT);
                }
            }
            MessageOutcome::Duplicate => GLOBAL_METRICS.incr(topic, counter::DUPLICATE),
            MessageOutcome::Ignored => GLOBAL_METRICS.incr(topic, counter::IGNORED),
            MessageOutcome::Discarded { reason } => {
                warn!("丢弃畸形消息: {}", reason);
                GLOBAL_METRICS.incr(topic, counter::DISCARDED);
            }
            MessageOutcome::Failed { reason } => {
                error!("失效处理失败，重新入队: {}", reason);
            }
        }
    }

    async fn apply(&self, topic: &str, payload: &[u8]) -> MessageOutcome {
        let event = match InvalidationEvent::from_payload(payload) {
            Ok(event) => event,
            Err(e) => {
                return MessageOutcome::Discarded {
                    reason: e.to_string(),
                }
            }
        };

        if !event.is_invalidation() {
            debug!("忽略未知动作: {:?}", event.action);
            return MessageOutcome::Ignored;
        }

        let patterns = match event.validate() {
            Ok(patterns) => patterns,
            Err(e) => {
                return MessageOutcome::Discarded {
                    reason: e.to_string(),
                }
            }
        };

        let marker = event.idempotency_id.map(processed_marker_key);
        if let Some(marker) = &marker {
            match self.cache.get(marker).await {
                Ok(Some(_)) => {
                    debug!("事件已处理过: {}", marker);
                    return MessageOutcome::Duplicate;
                }
                Ok(None) => {}
                Err(e) => return failed(e),
            }
        }

        let deleted = match self.delete_all(&patterns).await {
            Ok(deleted) => deleted,
            Err(e) => return failed(e),
        };

        let rebuilt = match self.rebuild_if_affected(topic, &patterns).await {
            Ok(rebuilt) => rebuilt,
            Err(e) => return failed(e),
        };

        if let Some(marker) = &marker {
            if let Err(e) = self.cache.set_nx(marker, "1", self.marker_ttl).await {
                return failed(e);
            }
        }

        info!(
            "失效已应用: patterns={}, deleted={}, rebuilt={}",
            patterns.len(),
            deleted,
            rebuilt
        );
        MessageOutcome::Applied { deleted, rebuilt }
    }

    async fn delete_all(&self, patterns: &[KeyPattern]) -> crate::error::Result<usize> {
        let mut deleted = 0;
        for pattern in patterns {
            let n = self.cache.delete_matching(pattern).await?;
            if n > 0 {
                debug!("已删除 {} 个缓存项: pattern={}", n, pattern);
            }
            deleted += n;
        }
        Ok(deleted)
    }

    /// 重建最多一次；查询失败视为成功处理，缓存故障向上返回
    async fn rebuild_if_affected(
        &self,
        topic: &str,
        patterns: &[KeyPattern],
    ) -> crate::error::Result<bool> {
        let Some(rebuilder) = &self.rebuilder else {
            return Ok(false);
        };
        if !rebuilder.is_affected_by(patterns) {
            return Ok(false);
        }
        match rebuilder.rebuild(self.cache.as_ref()).await {
            Ok(_) => Ok(true),
            Err(e @ SyncError::CacheUnavailable(_)) => Err(e),
            Err(e) => {
                warn!("缓存重建失败，等待读路径回填: key={}, error={}", rebuilder.key(), e);
                GLOBAL_METRICS.incr(topic, counter::REBUILD_FAILED);
                Ok(false)
            }
        }
    }
}

fn failed(e: SyncError) -> MessageOutcome {
    MessageOutcome::Failed {
        reason: e.to_string(),
    }
}

#[async_trait]
impl MessageHandler for InvalidationConsumer {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        self.process(delivery).await.disposition()
    }
}
