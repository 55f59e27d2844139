//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了消息代理连接的熔断器。

use crate::config::ReconnectConfig;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    /// 正常放行，记录连续失败次数
    Closed { failures: u32 },
    /// 熔断中，快速失败
    Open { since: Instant },
    /// 熔断时间已过，放行探测请求
    HalfOpen,
}

/// 熔断器
///
/// 连续失败达到阈值后进入 `Open`，在 `open_for` 之后转入 `HalfOpen` 放行探测；
/// 探测成功回到 `Closed`，失败则重新熔断
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    open_for: Duration,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    /// 创建熔断器，`threshold` 为 0 时永不熔断
    pub fn new(threshold: u32, open_for: Duration) -> Self {
        Self {
            threshold,
            open_for,
            state: Mutex::new(CircuitState::Closed { failures: 0 }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 当前状态
    pub fn state(&self) -> CircuitState {
        *self.lock()
    }

    /// 是否允许发起连接
    pub fn allow(&self) -> bool {
        let mut state = self.lock();
        match *state {
            CircuitState::Closed { .. } | CircuitState::HalfOpen => true,
            CircuitState::Open { since } => {
                if since.elapsed() >= self.open_for {
                    tracing::info!("熔断时间已过，放行探测连接");
                    *state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// 记录一次成功
    pub fn record_success(&self) {
        let mut state = self.lock();
        if !matches!(*state, CircuitState::Closed { failures: 0 }) {
            tracing::debug!("熔断器状态变更: {:?} -> Closed", *state);
        }
        *state = CircuitState::Closed { failures: 0 };
    }

    /// 记录一次失败
    pub fn record_failure(&self) {
        if self.threshold == 0 {
            return;
        }
        let mut state = self.lock();
        let next = match *state {
            CircuitState::Closed { failures } if failures + 1 >= self.threshold => {
                tracing::warn!(
                    "消息代理连续失败 {} 次，熔断 {}ms",
                    failures + 1,
                    self.open_for.as_millis()
                );
                CircuitState::Open {
                    since: Instant::now(),
                }
            }
            CircuitState::Closed { failures } => CircuitState::Closed {
                failures: failures + 1,
            },
            CircuitState::HalfOpen | CircuitState::Open { .. } => {
                tracing::warn!("探测连接失败，重新熔断");
                CircuitState::Open {
                    since: Instant::now(),
                }
            }
        };
        *state = next;
    }
}

impl From<&ReconnectConfig> for CircuitBreaker {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(
            config.circuit_breaker_threshold,
            Duration::from_millis(config.circuit_open_ms),
        )
    }
}
