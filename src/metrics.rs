//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效管道的指标收集功能。

use lazy_static::lazy_static;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{span, Level};

/// 计数器名称
pub mod counter {
    pub const PUBLISHED: &str = "published";
    pub const PUBLISH_FAILED: &str = "publish_failed";
    pub const DELIVERED: &str = "delivered";
    pub const ACKED: &str = "acked";
    pub const NACKED: &str = "nacked";
    pub const DISCARDED: &str = "discarded";
    pub const IGNORED: &str = "ignored";
    pub const DUPLICATE: &str = "duplicate";
    pub const KEYS_DELETED: &str = "keys_deleted";
    pub const REBUILT: &str = "rebuilt";
    pub const REBUILD_FAILED: &str = "rebuild_failed";
    pub const CACHE_HIT: &str = "cache_hit";
    pub const CACHE_MISS: &str = "cache_miss";
}

/// 指标收集器
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 事件计数
    /// key: "topic:counter"
    pub events_total: Arc<Mutex<HashMap<String, u64>>>,
    /// 消费者状态（0: 断开, 1: 连接中, 2: 已订阅, 3: 处理中, 4: 失败）
    pub consumer_state: Arc<Mutex<HashMap<String, u8>>>,
    /// 操作耗时
    /// key: "topic:op" -> (total_duration_secs, count)
    pub operation_duration: Arc<Mutex<HashMap<String, (f64, u64)>>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Metrics {
    /// 计数加一
    pub fn incr(&self, topic: &str, counter: &str) {
        self.incr_by(topic, counter, 1);
    }

    /// 计数增加 `n`
    ///
    /// # 参数
    ///
    /// * `topic` - 主题或读路径名称
    /// * `counter` - 计数器名称，见 [`counter`]
    /// * `n` - 增量
    pub fn incr_by(&self, topic: &str, counter: &str, n: u64) {
        let span = span!(Level::TRACE, "pipeline_event", topic, counter);
        let _enter = span.enter();
        let key = format!("{}:{}", topic, counter);
        *lock(&self.events_total).entry(key).or_insert(0) += n;
    }

    /// 读取计数
    pub fn get(&self, topic: &str, counter: &str) -> u64 {
        lock(&self.events_total)
            .get(&format!("{}:{}", topic, counter))
            .copied()
            .unwrap_or(0)
    }

    /// 记录操作耗时
    pub fn record_duration(&self, topic: &str, op: &str, duration_secs: f64) {
        let key = format!("{}:{}", topic, op);
        let mut map = lock(&self.operation_duration);
        let entry = map.entry(key).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 设置消费者状态
    pub fn set_consumer_state(&self, topic: &str, code: u8) {
        lock(&self.consumer_state).insert(topic.to_string(), code);
    }

    /// 读取消费者状态码
    pub fn consumer_state(&self, topic: &str) -> Option<u8> {
        lock(&self.consumer_state).get(topic).copied()
    }
}

fn split_label(key: &str) -> (&str, &str) {
    key.rsplit_once(':').unwrap_or((key, ""))
}

/// 获取指标字符串
///
/// 将所有指标格式化为文本返回，按名称排序，用于监控系统采集
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let events: BTreeMap<String, u64> = lock(&metrics.events_total)
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    let states: BTreeMap<String, u8> = lock(&metrics.consumer_state)
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    let durations: BTreeMap<String, (f64, u64)> = lock(&metrics.operation_duration)
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();

    let mut output = String::new();
    for (k, v) in &events {
        let (topic, name) = split_label(k);
        output.push_str(&format!(
            "oxsync_events_total{{topic=\"{}\", event=\"{}\"}} {}\n",
            topic, name, v
        ));
    }
    for (k, v) in &states {
        output.push_str(&format!(
            "oxsync_consumer_state{{topic=\"{}\"}} {}\n",
            k, v
        ));
    }
    for (k, (total, count)) in &durations {
        let (topic, op) = split_label(k);
        output.push_str(&format!(
            "oxsync_operation_duration_seconds_sum{{topic=\"{}\", operation=\"{}\"}} {}\n",
            topic, op, total
        ));
        output.push_str(&format!(
            "oxsync_operation_duration_seconds_count{{topic=\"{}\", operation=\"{}\"}} {}\n",
            topic, op, count
        ));
    }
    output
}
