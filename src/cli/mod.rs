//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use crate::config::Config;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "oxsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(
        short,
        long,
        global = true,
        default_value = "oxsync.toml",
        help = "Path to the TOML configuration file"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "consume", about = "Run the invalidation consumer until Ctrl-C")]
    Consume(ConsumeArgs),

    #[command(name = "publish", about = "Publish an invalidation event")]
    Publish(PublishArgs),

    #[command(name = "status", about = "Check broker and cache connectivity")]
    Status(StatusArgs),
}

#[derive(Parser, Debug)]
pub struct ConsumeArgs {
    #[arg(long, help = "Print metrics on shutdown")]
    pub metrics: bool,
}

#[derive(Parser, Debug)]
pub struct PublishArgs {
    #[arg(
        short,
        long = "key",
        required = true,
        help = "Cache key or glob pattern to invalidate (repeatable)"
    )]
    pub keys: Vec<String>,

    #[arg(short, long, help = "Topic to publish to (defaults to broker.topic)")]
    pub topic: Option<String>,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[arg(short, long, help = "Show detailed information")]
    pub verbose: bool,
}

mod consume;
mod publish;
mod status;

fn load_config(path: &PathBuf) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    crate::telemetry::init_tracing(&config.global.service_name, &config.global.log_filter);

    let result = match &cli.command {
        Commands::Consume(args) => consume::execute(config, args).await,
        Commands::Publish(args) => publish::execute(config, args).await,
        Commands::Status(args) => status::execute(config, args).await,
    };
    crate::telemetry::shutdown_tracing();
    result
}
