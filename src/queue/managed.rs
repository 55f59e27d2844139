//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了带重连退避和熔断的托管通道。

use super::{Channel, Connector};
use crate::config::ReconnectConfig;
use crate::error::{Result, SyncError};
use crate::recovery::{CircuitBreaker, CircuitState, ExponentialBackoff};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 托管通道
///
/// 进程内长期持有一个通道，首次使用时建立；出错后由调用方 `reset`，下次使用时重连。
/// 重连失败后在退避窗口内快速失败，连续失败达到阈值后熔断。
pub struct ManagedChannel {
    connector: Arc<dyn Connector>,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    breaker: CircuitBreaker,
    backoff: Mutex<ExponentialBackoff>,
    retry_at: Mutex<Option<Instant>>,
    // 当前通道上已声明的主题
    declared: DashMap<String, ()>,
}

impl ManagedChannel {
    pub fn new(connector: Arc<dyn Connector>, reconnect: &ReconnectConfig) -> Self {
        Self {
            connector,
            channel: RwLock::new(None),
            breaker: CircuitBreaker::from(reconnect),
            backoff: Mutex::new(ExponentialBackoff::from(reconnect)),
            retry_at: Mutex::new(None),
            declared: DashMap::new(),
        }
    }

    /// 获取通道，必要时建立连接
    pub async fn channel(&self) -> Result<Arc<dyn Channel>> {
        if let Some(channel) = self.channel.read().await.as_ref() {
            return Ok(channel.clone());
        }

        if !self.breaker.allow() {
            return Err(SyncError::BrokerUnavailable(
                "circuit breaker is open".to_string(),
            ));
        }
        if let Some(at) = *self.retry_at.lock().unwrap_or_else(|e| e.into_inner()) {
            if Instant::now() < at {
                return Err(SyncError::BrokerUnavailable(
                    "waiting for reconnect backoff".to_string(),
                ));
            }
        }

        // 连接期间不持有锁，并发建立的多余通道直接丢弃
        match self.connector.open_channel().await {
            Ok(opened) => {
                self.breaker.record_success();
                self.backoff
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .reset();
                *self.retry_at.lock().unwrap_or_else(|e| e.into_inner()) = None;

                let mut guard = self.channel.write().await;
                if let Some(existing) = guard.as_ref() {
                    return Ok(existing.clone());
                }
                self.declared.clear();
                *guard = Some(opened.clone());
                info!("消息代理通道已建立");
                Ok(opened)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// 确保主题在当前通道上已声明，每个通道只声明一次
    pub async fn ensure_topic(&self, channel: &Arc<dyn Channel>, topic: &str) -> Result<()> {
        if self.declared.contains_key(topic) {
            return Ok(());
        }
        channel.declare_topic(topic).await?;
        self.declared.insert(topic.to_string(), ());
        debug!("主题已在托管通道上声明: {}", topic);
        Ok(())
    }

    /// 丢弃当前通道，下次使用时重连
    pub async fn reset(&self) {
        let mut guard = self.channel.write().await;
        if guard.take().is_some() {
            warn!("消息代理通道已重置");
        }
        self.declared.clear();
    }

    /// 记录一次代理操作失败
    pub fn record_failure(&self) {
        self.breaker.record_failure();
        let delay = self
            .backoff
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_delay();
        *self.retry_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now() + delay);
        debug!("下次重连最早在 {}ms 后", delay.as_millis());
    }

    /// 熔断器当前状态
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// 是否持有已建立的通道
    pub async fn is_connected(&self) -> bool {
        self.channel.read().await.is_some()
    }
}
