//! # Telemetry Broker CLI
//!
//! `telemetry-broker` 二进制入口。
//!
//! 子命令：
//! - `run`: 模拟机器人、同步、连接协商，可选录制
//! - `record`: 录制冒烟测试，每个机器人必须保存一段非空录制
//! - `registry`: 打印配置对应的发现快照
//! - `validate`: 校验配置文件

mod cli;
mod collaborators;
mod commands;
mod error;
mod logging;
mod pipeline;

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use cli::Cli;
use error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = logging::init(&cli) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = cli.command.name(),
        "telemetry-broker starting"
    );

    match commands::dispatch(&cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{e:#}"), "Command failed");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Code of the first [`CliError`] in the chain; other failures exit with 1
fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .chain()
        .find_map(|e| e.downcast_ref::<CliError>())
        .map_or(1, CliError::exit_code)
}
