//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了主题订阅及其分发循环。
//!
//! 状态流转：`Disconnected → Connecting → Subscribed → Processing → Subscribed`，
//! 连接中断后经退避回到 `Connecting`；只有不可恢复的配置错误会进入终态 `Failed`。

use super::{Channel, Connector, Delivery};
use crate::config::ReconnectConfig;
use crate::error::Result;
use crate::metrics::{counter, GLOBAL_METRICS};
use crate::recovery::ExponentialBackoff;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// 消费者状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Subscribed,
    Processing { message_id: String },
    Failed { reason: String },
}

impl ConsumerState {
    /// 指标中使用的状态码
    pub fn code(&self) -> u8 {
        match self {
            ConsumerState::Disconnected => 0,
            ConsumerState::Connecting => 1,
            ConsumerState::Subscribed => 2,
            ConsumerState::Processing { .. } => 3,
            ConsumerState::Failed { .. } => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConsumerState::Failed { .. })
    }
}

/// 消息处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 确认，消息从队列移除
    Ack,
    /// 否定确认并重新入队
    NackRequeue,
}

/// 消息处理器
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

/// 订阅参数
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// 单条消息的处理时限，超时按重新入队处理
    pub handler_timeout: Duration,
    /// 重连与否定确认后的退避策略
    pub reconnect: ReconnectConfig,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// 活跃的订阅
///
/// 持有分发任务；`shutdown` 会等待正在处理的消息完成确认后退出
pub struct Subscription {
    topic: String,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<Result<()>>>,
    state: watch::Receiver<ConsumerState>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 当前状态
    pub fn state(&self) -> ConsumerState {
        self.state.borrow().clone()
    }

    /// 订阅状态变化
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    /// 等待进入满足条件的状态，超时返回 false
    pub async fn wait_for<F>(&self, within: Duration, predicate: F) -> bool
    where
        F: Fn(&ConsumerState) -> bool,
    {
        let mut rx = self.state.clone();
        tokio::time::timeout(within, rx.wait_for(|s| predicate(s)))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// 分发任务是否已经退出
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// 停止订阅并等待分发任务退出
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown.cancel();
        self.join().await
    }

    /// 等待分发任务自行结束（仅在进入 `Failed` 时发生）
    pub async fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("消费者任务异常退出: {}", e);
                    Ok(())
                }
            },
            None => Ok(()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// 订阅主题并在后台分发消息
///
/// # 参数
///
/// * `connector` - 每次（重新）连接时用于打开通道
/// * `topic` - 主题名称
/// * `handler` - 消息处理器
/// * `options` - 订阅参数
pub fn consume(
    connector: Arc<dyn Connector>,
    topic: impl Into<String>,
    handler: Arc<dyn MessageHandler>,
    options: ConsumeOptions,
) -> Subscription {
    let topic = topic.into();
    let shutdown = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(ConsumerState::Disconnected);

    let dispatcher = Dispatcher {
        connector,
        topic: topic.clone(),
        handler,
        options,
        shutdown: shutdown.clone(),
        state: state_tx,
    };
    let handle = tokio::spawn(dispatcher.run());

    Subscription {
        topic,
        shutdown,
        handle: Some(handle),
        state: state_rx,
    }
}

struct Dispatcher {
    connector: Arc<dyn Connector>,
    topic: String,
    handler: Arc<dyn MessageHandler>,
    options: ConsumeOptions,
    shutdown: CancellationToken,
    state: watch::Sender<ConsumerState>,
}

impl Dispatcher {
    fn set_state(&self, state: ConsumerState) {
        GLOBAL_METRICS.set_consumer_state(&self.topic, state.code());
        self.state.send_replace(state);
    }

    fn fail(&self, reason: String) {
        error!("消费者进入终止状态: topic={}, reason={}", self.topic, reason);
        self.set_state(ConsumerState::Failed { reason });
    }

    /// 在关闭前等待一段时间，返回 false 表示收到关闭信号
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    #[instrument(skip(self), fields(topic = %self.topic), name = "consumer_dispatch")]
    async fn run(self) -> Result<()> {
        let mut backoff = ExponentialBackoff::from(&self.options.reconnect);
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.set_state(ConsumerState::Connecting);

            let opened = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                opened = self.subscribe() => opened,
            };

            match opened {
                Ok(channel) => {
                    self.set_state(ConsumerState::Subscribed);
                    info!("消费者已订阅: topic={}", self.topic);
                    backoff.reset();
                    match self.pump(channel).await {
                        Ok(()) => break,
                        Err(e) if e.is_fatal() => {
                            self.fail(e.to_string());
                            return Err(e);
                        }
                        Err(e) => warn!("消费者连接中断: topic={}, error={}", self.topic, e),
                    }
                }
                Err(e) if e.is_fatal() => {
                    self.fail(e.to_string());
                    return Err(e);
                }
                Err(e) => warn!("消费者连接失败: topic={}, error={}", self.topic, e),
            }

            self.set_state(ConsumerState::Disconnected);
            let delay = backoff.next_delay();
            info!(
                "{}ms 后重连 (第 {} 次): topic={}",
                delay.as_millis(),
                backoff.attempts(),
                self.topic
            );
            if !self.pause(delay).await {
                break;
            }
        }

        self.set_state(ConsumerState::Disconnected);
        info!("消费者已停止: topic={}", self.topic);
        Ok(())
    }

    async fn subscribe(&self) -> Result<Arc<dyn Channel>> {
        let channel = self.connector.open_channel().await?;
        channel.declare_topic(&self.topic).await?;
        Ok(channel)
    }

    /// 逐条拉取并处理消息，收到关闭信号时返回 `Ok`，通道错误时返回 `Err`
    async fn pump(&self, channel: Arc<dyn Channel>) -> Result<()> {
        let mut nack_backoff = ExponentialBackoff::from(&self.options.reconnect);
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                next = channel.next_delivery(&self.topic) => next?,
            };
            let Some(delivery) = next else {
                continue;
            };

            GLOBAL_METRICS.incr(&self.topic, counter::DELIVERED);
            self.set_state(ConsumerState::Processing {
                message_id: delivery.id.clone(),
            });
            debug!(
                "处理消息: id={}, redelivered={}",
                delivery.id, delivery.redelivered
            );

            let started = Instant::now();
            let disposition = match tokio::time::timeout(
                self.options.handler_timeout,
                self.handler.handle(&delivery),
            )
            .await
            {
                Ok(disposition) => disposition,
                Err(_) => {
                    warn!(
                        "消息处理超时 ({}ms)，重新入队: id={}",
                        self.options.handler_timeout.as_millis(),
                        delivery.id
                    );
                    Disposition::NackRequeue
                }
            };
            GLOBAL_METRICS.record_duration(
                &self.topic,
                "handle",
                started.elapsed().as_secs_f64(),
            );

            match disposition {
                Disposition::Ack => {
                    channel.ack(&delivery).await?;
                    GLOBAL_METRICS.incr(&self.topic, counter::ACKED);
                    nack_backoff.reset();
                    self.set_state(ConsumerState::Subscribed);
                }
                Disposition::NackRequeue => {
                    channel.nack(&delivery, true).await?;
                    GLOBAL_METRICS.incr(&self.topic, counter::NACKED);
                    self.set_state(ConsumerState::Subscribed);
                    // 存储故障时避免空转重试
                    let delay = nack_backoff.next_delay();
                    debug!("重新入队后等待 {}ms", delay.as_millis());
                    if !self.pause(delay).await {
                        return Ok(());
                    }
                }
            }
        }
    }
}
