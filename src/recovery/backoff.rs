//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了重连使用的指数退避策略。

use crate::config::ReconnectConfig;
use std::time::Duration;

/// 指数退避
///
/// 每次调用 `next_delay` 返回当前延迟并按倍数增长，直到达到上限
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
            current: initial,
            attempts: 0,
        }
    }

    /// 获取下一次重试前的等待时间
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        delay
    }

    /// 成功后重置
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// 自上次重置以来的重试次数
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl From<&ReconnectConfig> for ExponentialBackoff {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.multiplier,
        )
    }
}
