//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了消费者命令的实现。

use crate::cli::ConsumeArgs;
use crate::config::Config;
use crate::manager::SyncManager;
use crate::metrics::get_metrics_string;
use crate::queue::ConsumerState;
use anyhow::{Context, Result};
use tracing::{info, warn};

pub async fn execute(config: Config, args: &ConsumeArgs) -> Result<()> {
    let manager = SyncManager::init(config)
        .await
        .context("Failed to initialize pipeline")?;
    let mut subscription = manager.start_consumer()?;
    let mut state = subscription.watch_state();

    info!("消费者运行中，按 Ctrl-C 退出: topic={}", subscription.topic());
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("无法监听退出信号: {}", e);
                }
                info!("收到退出信号，等待当前消息处理完成");
                subscription.shutdown().await?;
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    // 分发任务已退出
                    subscription.join().await?;
                    break;
                }
                if let ConsumerState::Failed { reason } = &*state.borrow() {
                    warn!("消费者失败: {}", reason);
                }
            }
        }
    }

    if args.metrics {
        print!("{}", get_metrics_string());
    }
    Ok(())
}
