//! oxsync - 跨服务缓存失效管道
//!
//! 写操作提交后通过持久化队列发布失效事件，读服务消费事件、按模式删除共享缓存中的陈旧项，
//! 并可选地重建热点键。队列提供至少一次投递，消费者对重复投递幂等。

#![doc(html_root_url = "https://docs.rs/oxsync/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod event;
pub mod keys;
pub mod manager;
pub mod metrics;
pub mod queue;
pub mod recovery;
pub mod service;
pub mod sync;
pub mod telemetry;
pub mod utils;

// Re-export commonly used items
pub use config::Config;
pub use error::{Result, SyncError};
pub use event::{InvalidationAction, InvalidationEvent};
pub use manager::SyncManager;
pub use sync::{InvalidationConsumer, InvalidationPublisher, PublishOutcome};

/// oxsync 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
