//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了跨服务的缓存失效机制，包括发布、消费和失效后重建。

pub mod consumer;
pub mod publisher;
pub mod rebuild;

pub use consumer::{InvalidationConsumer, MessageOutcome};
pub use publisher::{InvalidationPublisher, PublishOutcome};
pub use rebuild::Rebuilder;
