//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了发布命令的实现。

use crate::cli::PublishArgs;
use crate::config::Config;
use crate::event::InvalidationEvent;
use crate::manager::SyncManager;
use anyhow::{Context, Result};

pub async fn execute(config: Config, args: &PublishArgs) -> Result<()> {
    let manager = SyncManager::init(config)
        .await
        .context("Failed to initialize pipeline")?;
    let publisher = manager.publisher();
    let topic = args
        .topic
        .clone()
        .unwrap_or_else(|| publisher.topic().to_string());

    let event = InvalidationEvent::invalidate(args.keys.iter().cloned());
    publisher
        .publish(&topic, &event)
        .await
        .with_context(|| format!("Failed to publish to '{}'", topic))?;

    println!("Published to {}", topic);
    println!("Keys:           {}", event.keys.join(", "));
    if let Some(id) = event.idempotency_id {
        println!("Idempotency ID: {}", id);
    }
    Ok(())
}
