//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了连接恢复机制，包括指数退避和熔断器。

pub mod backoff;
pub mod circuit;

pub use backoff::ExponentialBackoff;
pub use circuit::{CircuitBreaker, CircuitState};
