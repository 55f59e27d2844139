//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于 Redis Streams 的持久化队列。
//!
//! 映射关系：
//! - 主题 = Stream + 消费者组（`XGROUP CREATE ... MKSTREAM`）
//! - 发送 = `XADD`
//! - 投递 = `XREADGROUP`；重连后先重读本消费者的待确认条目，
//!   在其他消费者上闲置过久的条目通过 `XAUTOCLAIM` 接管
//! - 确认 = `XACK`；条目留在 Stream 中供其他消费者组读取，由 `MAXLEN ~` 回收
//! - 重新入队 = 条目保留在本消费者的待确认列表中，下一次拉取从 `0` 重读
//! - 积压 = 本消费者组的待确认数 + `lag`
//!
//! 消息持久性取决于 Redis 的 AOF 配置。

use super::{Channel, Delivery};
use crate::backend::redis_provider::{connect_manager, open_client};
use crate::config::BrokerConfig;
use crate::error::{Result, SyncError};
use crate::utils::redaction::redact_connection_string;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Value;
use secrecy::ExposeSecret;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, instrument, warn};

/// 消息体所在的字段名
pub const PAYLOAD_FIELD: &str = "payload";

/// Stream 消费参数
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub group: String,
    pub consumer: String,
    pub block_ms: u64,
    pub claim_idle_ms: u64,
    pub command_timeout_ms: u64,
    pub max_len: u64,
}

impl StreamSettings {
    pub fn from_config(config: &BrokerConfig, consumer_name: &str) -> Self {
        Self {
            group: config.consumer_group.clone(),
            consumer: consumer_name.to_string(),
            block_ms: config.block_ms,
            claim_idle_ms: config.claim_idle_ms,
            command_timeout_ms: config.command_timeout_ms,
            max_len: config.stream_max_len,
        }
    }
}

/// Redis Streams 代理连接
///
/// 每个连接持有独立的连接管理器；阻塞读取会占用多路复用连接，所以发布和消费不共享连接
#[derive(Clone)]
pub struct RedisStreamConnection {
    manager: ConnectionManager,
    settings: StreamSettings,
}

impl RedisStreamConnection {
    /// 连接 Redis
    #[instrument(skip(config), level = "info", name = "connect_redis_stream")]
    pub async fn connect(config: &BrokerConfig, consumer_name: &str) -> Result<Self> {
        let client = open_client(&config.connection_string)?;
        let manager = connect_manager(&client, config.connection_timeout_ms)
            .await
            .map_err(SyncError::BrokerUnavailable)?;
        info!(
            "已连接消息代理: {}, group={}, consumer={}",
            redact_connection_string(config.connection_string.expose_secret()),
            config.consumer_group,
            consumer_name
        );
        Ok(Self {
            manager,
            settings: StreamSettings::from_config(config, consumer_name),
        })
    }

    pub fn channel(&self) -> RedisStreamChannel {
        RedisStreamChannel::new(self.manager.clone(), self.settings.clone())
    }
}

/// Redis Streams 通道
pub struct RedisStreamChannel {
    manager: ConnectionManager,
    settings: StreamSettings,
    // 已读完本消费者待确认条目的主题，重新入队时移除
    backlog_drained: Mutex<HashSet<String>>,
}

/// 从回复中解析出的 Stream 条目，`payload` 为 `None` 表示条目已被删除
#[derive(Debug, Clone, PartialEq)]
struct StreamEntry {
    id: String,
    payload: Option<Vec<u8>>,
}

fn broker_err(e: redis::RedisError) -> SyncError {
    SyncError::BrokerUnavailable(e.to_string())
}

fn value_to_string(value: &Value) -> Option<String> {
    redis::from_redis_value::<String>(value).ok()
}

fn value_items(value: &Value) -> Option<Vec<&Value>> {
    match value {
        Value::Array(items) | Value::Set(items) => Some(items.iter().collect()),
        Value::Map(pairs) => Some(pairs.iter().flat_map(|(k, v)| [k, v]).collect()),
        _ => None,
    }
}

/// 在扁平的 `[name, value, ...]` 列表中查找字段
fn field_value<'a>(fields: &[&'a Value], name: &str) -> Option<&'a Value> {
    fields
        .chunks(2)
        .find(|pair| pair.len() == 2 && value_to_string(pair[0]).as_deref() == Some(name))
        .map(|pair| pair[1])
}

fn parse_entry(value: &Value) -> Option<StreamEntry> {
    let parts = value_items(value)?;
    let id = value_to_string(parts.first()?)?;
    let payload = parts.get(1).and_then(|fields| value_items(fields)).map(|fields| {
        field_value(&fields, PAYLOAD_FIELD)
            .and_then(|v| redis::from_redis_value::<Vec<u8>>(v).ok())
            // 条目存在但缺少消息体字段，交给消费者按畸形消息丢弃
            .unwrap_or_default()
    });
    Some(StreamEntry { id, payload })
}

fn parse_entries(value: &Value) -> Vec<StreamEntry> {
    value_items(value)
        .map(|items| items.into_iter().filter_map(parse_entry).collect())
        .unwrap_or_default()
}

/// 解析 `XREADGROUP` 回复: `[[stream, [entry...]]...]` 或 `nil`
fn parse_read_reply(value: &Value) -> Vec<StreamEntry> {
    match value {
        Value::Nil => Vec::new(),
        Value::Map(streams) => streams
            .iter()
            .flat_map(|(_, entries)| parse_entries(entries))
            .collect(),
        _ => value_items(value)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|stream| {
                let parts = value_items(stream)?;
                parts.get(1).map(|entries| parse_entries(entries))
            })
            .flatten()
            .collect(),
    }
}

/// 解析 `XAUTOCLAIM` 回复: `[next_cursor, [entry...], [deleted_id...]]`
fn parse_autoclaim_reply(value: &Value) -> Vec<StreamEntry> {
    value_items(value)
        .and_then(|parts| parts.get(1).map(|entries| parse_entries(entries)))
        .unwrap_or_default()
}

/// 解析 `XINFO GROUPS` 回复，返回指定消费者组的积压（待确认数 + `lag`）
///
/// 组不存在或 `lag` 不可用（Redis 7 之前的版本）时返回 `None`
fn parse_group_backlog(value: &Value, group: &str) -> Option<u64> {
    value_items(value)?.into_iter().find_map(|info| {
        let fields = value_items(info)?;
        if field_value(&fields, "name").and_then(value_to_string).as_deref() != Some(group) {
            return None;
        }
        let pending: u64 = redis::from_redis_value(field_value(&fields, "pending")?).ok()?;
        let lag: u64 = redis::from_redis_value(field_value(&fields, "lag")?).ok()?;
        Some(pending + lag)
    })
}

fn is_missing_stream(e: &redis::RedisError) -> bool {
    e.to_string().to_lowercase().contains("no such key")
}

fn is_busy_group(e: &redis::RedisError) -> bool {
    e.code() == Some("BUSYGROUP") || e.to_string().contains("BUSYGROUP")
}

impl RedisStreamChannel {
    pub fn new(manager: ConnectionManager, settings: StreamSettings) -> Self {
        Self {
            manager,
            settings,
            backlog_drained: Mutex::new(HashSet::new()),
        }
    }

    fn is_backlog_drained(&self, topic: &str) -> bool {
        self.backlog_drained
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(topic)
    }

    fn mark_backlog_drained(&self, topic: &str) {
        self.backlog_drained
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.to_string());
    }

    fn reread_backlog(&self, topic: &str) {
        self.backlog_drained
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(topic);
    }

    async fn bounded<T, F>(&self, op: &str, limit_ms: u64, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(Duration::from_millis(limit_ms), fut).await {
            Ok(result) => result.map_err(broker_err),
            Err(_) => Err(SyncError::BrokerUnavailable(format!(
                "{} timed out after {}ms",
                op, limit_ms
            ))),
        }
    }

    fn to_delivery(topic: &str, entry: StreamEntry, redelivered: bool) -> Delivery {
        Delivery {
            id: entry.id,
            topic: topic.to_string(),
            payload: entry.payload.unwrap_or_default(),
            redelivered,
        }
    }

    async fn read_group(&self, topic: &str, start: &str, block: bool) -> Result<Vec<StreamEntry>> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.settings.group)
            .arg(&self.settings.consumer)
            .arg("COUNT")
            .arg(1);
        let mut limit = self.settings.command_timeout_ms;
        if block {
            cmd.arg("BLOCK").arg(self.settings.block_ms);
            limit += self.settings.block_ms;
        }
        cmd.arg("STREAMS").arg(topic).arg(start);
        let reply: Value = self.bounded("XREADGROUP", limit, cmd.query_async(&mut conn)).await?;
        Ok(parse_read_reply(&reply))
    }

    async fn auto_claim(&self, topic: &str) -> Result<Vec<StreamEntry>> {
        let mut conn = self.manager.clone();
        let reply: Value = self
            .bounded(
                "XAUTOCLAIM",
                self.settings.command_timeout_ms,
                redis::cmd("XAUTOCLAIM")
                    .arg(topic)
                    .arg(&self.settings.group)
                    .arg(&self.settings.consumer)
                    .arg(self.settings.claim_idle_ms)
                    .arg("0-0")
                    .arg("COUNT")
                    .arg(1)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(parse_autoclaim_reply(&reply))
    }

    async fn xack(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: u64 = self
            .bounded(
                "XACK",
                self.settings.command_timeout_ms,
                redis::cmd("XACK")
                    .arg(&delivery.topic)
                    .arg(&self.settings.group)
                    .arg(&delivery.id)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Channel for RedisStreamChannel {
    #[instrument(skip(self), level = "debug")]
    async fn declare_topic(&self, topic: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let result: Result<()> = self
            .bounded(
                "XGROUP CREATE",
                self.settings.command_timeout_ms,
                async {
                    let created: redis::RedisResult<()> = redis::cmd("XGROUP")
                        .arg("CREATE")
                        .arg(topic)
                        .arg(&self.settings.group)
                        .arg("0")
                        .arg("MKSTREAM")
                        .query_async(&mut conn)
                        .await;
                    // 消费者组已存在
                    created.or_else(|e| if is_busy_group(&e) { Ok(()) } else { Err(e) })
                },
            )
            .await;
        if result.is_ok() {
            debug!("主题已声明: topic={}, group={}", topic, self.settings.group);
        }
        result
    }

    #[instrument(skip(self, payload), level = "debug", fields(payload_len = payload.len()))]
    async fn send(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic);
        if self.settings.max_len > 0 {
            cmd.arg("MAXLEN").arg("~").arg(self.settings.max_len);
        }
        cmd.arg("*").arg(PAYLOAD_FIELD).arg(payload);
        let id: String = self
            .bounded("XADD", self.settings.command_timeout_ms, cmd.query_async(&mut conn))
            .await?;
        debug!("消息已发送: topic={}, id={}", topic, id);
        Ok(())
    }

    async fn next_delivery(&self, topic: &str) -> Result<Option<Delivery>> {
        if !self.is_backlog_drained(topic) {
            match self.read_group(topic, "0", false).await?.into_iter().next() {
                Some(entry) => {
                    debug!("重读待确认条目: topic={}, id={}", topic, entry.id);
                    return Ok(Some(Self::to_delivery(topic, entry, true)));
                }
                None => self.mark_backlog_drained(topic),
            }
        }

        if self.settings.claim_idle_ms > 0 {
            if let Some(entry) = self.auto_claim(topic).await?.into_iter().next() {
                info!("接管闲置条目: topic={}, id={}", topic, entry.id);
                return Ok(Some(Self::to_delivery(topic, entry, true)));
            }
        }

        Ok(self
            .read_group(topic, ">", true)
            .await?
            .into_iter()
            .next()
            .map(|entry| Self::to_delivery(topic, entry, false)))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.xack(delivery).await
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        if requeue {
            // 条目仍在本组的待确认列表中，其他消费者组不受影响
            debug!("消息重新入队: topic={}, id={}", delivery.topic, delivery.id);
            self.reread_backlog(&delivery.topic);
            Ok(())
        } else {
            warn!("丢弃消息: topic={}, id={}", delivery.topic, delivery.id);
            self.xack(delivery).await
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: String = self
            .bounded(
                "PING",
                self.settings.command_timeout_ms,
                redis::cmd("PING").query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn depth(&self, topic: &str) -> Result<u64> {
        let mut conn = self.manager.clone();
        let info: Option<Value> = self
            .bounded("XINFO GROUPS", self.settings.command_timeout_ms, async {
                let reply: redis::RedisResult<Value> = redis::cmd("XINFO")
                    .arg("GROUPS")
                    .arg(topic)
                    .query_async(&mut conn)
                    .await;
                match reply {
                    Ok(info) => Ok(Some(info)),
                    Err(e) if is_missing_stream(&e) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;
        let Some(info) = info else {
            return Ok(0);
        };
        if let Some(backlog) = parse_group_backlog(&info, &self.settings.group) {
            return Ok(backlog);
        }
        // 无法计算本组积压时退化为 Stream 长度
        self.bounded(
            "XLEN",
            self.settings.command_timeout_ms,
            redis::cmd("XLEN").arg(topic).query_async(&mut conn),
        )
        .await
    }
}
