//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 统一工具模块
//!
//! 提供测试和命令行共用的工具函数，包括：
//! - Redis连接检查工具
//! - 日志设置工具
//! - 主题名称生成工具

pub mod redaction;

use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// 初始化测试日志，重复调用无副作用
pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// 默认本地 Redis 地址，可通过 `REDIS_URL` 覆盖
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// 检查指定地址的Redis是否可用
pub async fn is_redis_available_url(url: &str) -> bool {
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(_) => return false,
    };
    match tokio::time::timeout(
        Duration::from_millis(500),
        client.get_multiplexed_async_connection(),
    )
    .await
    {
        Ok(Ok(mut conn)) => redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok(),
        _ => false,
    }
}

/// 等待Redis可用，最多重试数次
pub async fn wait_for_redis(url: &str) -> bool {
    for _ in 0..5 {
        if is_redis_available_url(url).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    false
}

/// 生成唯一的主题名称，避免测试之间互相干扰
pub fn generate_unique_topic(base: &str) -> String {
    format!("{}-{}", base, uuid::Uuid::new_v4().simple())
}
