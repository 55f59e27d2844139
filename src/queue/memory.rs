//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内消息代理。
//!
//! 主题和消息在代理存活期间持久，独立于任何通道；通道关闭时未确认的消息回到队首并标记为重新投递。

use super::{Channel, Connector, Delivery};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

const DEFAULT_BLOCK: Duration = Duration::from_millis(100);

lazy_static! {
    /// 进程内共享的代理，`BrokerMode::Memory` 下发布者和消费者通过它通信
    static ref SHARED_BROKER: MemoryBroker = MemoryBroker::new();
}

#[derive(Debug, Clone)]
struct StoredMessage {
    seq: u64,
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct TopicQueue {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
}

impl TopicQueue {
    fn requeue_front(&mut self, seq: u64) {
        if let Some(mut message) = self.unacked.remove(&seq) {
            message.redelivered = true;
            self.ready.push_front(message);
        }
    }
}

#[derive(Debug, Default)]
struct BrokerInner {
    topics: Mutex<HashMap<String, TopicQueue>>,
    notify: Notify,
    unavailable: AtomicBool,
    epoch: AtomicU64,
    next_seq: AtomicU64,
}

impl BrokerInner {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, TopicQueue>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 进程内消息代理
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
    block: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner::default()),
            block: DEFAULT_BLOCK,
        }
    }

    /// 进程级共享代理
    pub fn shared() -> Self {
        SHARED_BROKER.clone()
    }

    /// 设置 `next_delivery` 的阻塞窗口
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// 打开新通道
    pub fn channel(&self) -> MemoryChannel {
        MemoryChannel {
            inner: self.inner.clone(),
            epoch: self.inner.epoch.load(Ordering::SeqCst),
            block: self.block,
            held: Mutex::new(HashSet::new()),
        }
    }

    /// 模拟代理故障
    ///
    /// 置为不可用时所有已打开的通道失效，其未确认消息回到队列；恢复后需要重新打开通道
    pub fn set_available(&self, available: bool) {
        if available {
            self.inner.unavailable.store(false, Ordering::SeqCst);
            return;
        }
        self.inner.unavailable.store(true, Ordering::SeqCst);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut topics = self.inner.topics();
            for queue in topics.values_mut() {
                let mut seqs: Vec<u64> = queue.unacked.keys().copied().collect();
                seqs.sort_unstable_by(|a, b| b.cmp(a));
                for seq in seqs {
                    queue.requeue_front(seq);
                }
            }
        }
        self.inner.notify.notify_waiters();
    }

    /// 等待投递的消息数
    pub fn ready_len(&self, topic: &str) -> usize {
        self.inner
            .topics()
            .get(topic)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// 已投递但未确认的消息数
    pub fn unacked_len(&self, topic: &str) -> usize {
        self.inner
            .topics()
            .get(topic)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    /// 主题是否已声明
    pub fn has_topic(&self, topic: &str) -> bool {
        self.inner.topics().contains_key(topic)
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::BrokerUnavailable(
                "in-memory broker is marked unavailable".to_string(),
            ));
        }
        Ok(Arc::new(self.channel()))
    }
}

/// 进程内代理上的通道
#[derive(Debug)]
pub struct MemoryChannel {
    inner: Arc<BrokerInner>,
    epoch: u64,
    block: Duration,
    // 本通道持有的未确认消息: (主题, 序号)
    held: Mutex<HashSet<(String, u64)>>,
}

impl MemoryChannel {
    fn check_open(&self) -> Result<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::BrokerUnavailable(
                "in-memory broker is marked unavailable".to_string(),
            ));
        }
        if self.inner.epoch.load(Ordering::SeqCst) != self.epoch {
            return Err(SyncError::BrokerUnavailable(
                "channel was closed by the broker".to_string(),
            ));
        }
        Ok(())
    }

    fn held(&self) -> MutexGuard<'_, HashSet<(String, u64)>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn parse_seq(delivery: &Delivery) -> Result<u64> {
        delivery.id.parse::<u64>().map_err(|_| {
            SyncError::BrokerUnavailable(format!("unknown delivery id {}", delivery.id))
        })
    }

    fn try_take(&self, topic: &str) -> Option<Delivery> {
        let mut topics = self.inner.topics();
        let queue = topics.get_mut(topic)?;
        let message = queue.ready.pop_front()?;
        let delivery = Delivery {
            id: message.seq.to_string(),
            topic: topic.to_string(),
            payload: message.payload.clone(),
            redelivered: message.redelivered,
        };
        queue.unacked.insert(message.seq, message.clone());
        self.held().insert((topic.to_string(), message.seq));
        Some(delivery)
    }

    fn settle(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        self.check_open()?;
        let seq = Self::parse_seq(delivery)?;
        if !self.held().remove(&(delivery.topic.clone(), seq)) {
            debug!("忽略未持有的投递: topic={}, id={}", delivery.topic, delivery.id);
            return Ok(());
        }
        {
            let mut topics = self.inner.topics();
            if let Some(queue) = topics.get_mut(&delivery.topic) {
                if let Some(mut message) = queue.unacked.remove(&seq) {
                    if requeue {
                        message.redelivered = true;
                        queue.ready.push_back(message);
                    }
                }
            }
        }
        if requeue {
            self.inner.notify.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_topic(&self, topic: &str) -> Result<()> {
        self.check_open()?;
        self.inner.topics().entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn send(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.check_open()?;
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        self.inner
            .topics()
            .entry(topic.to_string())
            .or_default()
            .ready
            .push_back(StoredMessage {
                seq,
                payload: payload.to_vec(),
                redelivered: false,
            });
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn next_delivery(&self, topic: &str) -> Result<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + self.block;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_open()?;
            if let Some(delivery) = self.try_take(topic) {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery, false)
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        self.settle(delivery, requeue)
    }

    async fn ping(&self) -> Result<()> {
        self.check_open()
    }

    async fn depth(&self, topic: &str) -> Result<u64> {
        self.check_open()?;
        Ok(self
            .inner
            .topics()
            .get(topic)
            .map(|q| (q.ready.len() + q.unacked.len()) as u64)
            .unwrap_or(0))
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        let held: Vec<(String, u64)> = self.held().drain().collect();
        // 故障时代理已经回收了失效通道的消息
        if held.is_empty() || self.inner.epoch.load(Ordering::SeqCst) != self.epoch {
            return;
        }
        {
            let mut topics = self.inner.topics();
            for (topic, seq) in &held {
                if let Some(queue) = topics.get_mut(topic) {
                    queue.requeue_front(*seq);
                }
            }
        }
        debug!("通道关闭，{} 条未确认消息重新入队", held.len());
        self.inner.notify.notify_waiters();
    }
}
