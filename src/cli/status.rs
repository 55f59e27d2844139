//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了状态查询命令的实现。

use crate::cli::StatusArgs;
use crate::config::Config;
use crate::error::Result as SyncResult;
use crate::manager::SyncManager;
use crate::utils::redaction::redact_connection_string;
use anyhow::{Context, Result};
use secrecy::ExposeSecret;

pub async fn execute(config: Config, args: &StatusArgs) -> Result<()> {
    let broker_target = redact_connection_string(config.broker.connection_string.expose_secret());
    let cache_target = redact_connection_string(config.cache.connection_string.expose_secret());

    let manager = SyncManager::init(config)
        .await
        .context("Failed to initialize pipeline")?;
    let publisher = manager.publisher();
    let cache_store = manager.cache();

    let (broker, cache) = futures::future::join(publisher.ping(), cache_store.ping()).await;

    println!("=== oxsync Status ===\n");
    print_line("Broker", &broker_target, &broker);
    print_line("Cache", &cache_target, &cache);

    if broker.is_ok() {
        match publisher.depth().await {
            Ok(depth) => println!("Topic:  {} ({} messages)", publisher.topic(), depth),
            Err(e) => println!("Topic:  {} (depth unavailable: {})", publisher.topic(), e),
        }
    }

    if args.verbose {
        let config = manager.config();
        println!("\nService:        {}", config.global.service_name);
        println!("Consumer group: {}", config.broker.consumer_group);
        println!(
            "Consumer name:  {}",
            config
                .broker
                .resolved_consumer_name(&config.global.service_name)
        );
        println!("Cache TTL:      {}s", config.cache_ttl());
        println!(
            "Rebuild:        {}",
            if config.consumer.rebuild.enabled {
                config.consumer.rebuild.key.as_str()
            } else {
                "disabled"
            }
        );
    }

    if broker.is_err() || cache.is_err() {
        anyhow::bail!("one or more components are unavailable");
    }
    Ok(())
}

fn print_line(name: &str, target: &str, result: &SyncResult<()>) {
    match result {
        Ok(()) => println!("{:<7} ✅ {}", format!("{}:", name), target),
        Err(e) => println!("{:<7} ❌ {} ({})", format!("{}:", name), target, e),
    }
}
