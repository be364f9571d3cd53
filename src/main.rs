//! report-bot: answers "generate report" emails from authorized senders.
//!
//! ```bash
//! export REPORT_BOT_SPREADSHEETS="Puka Doner=1AbC...,Puka Restoran=1XyZ..."
//! export RUST_LOG=report_bot=debug
//! report-bot
//! ```
//!
//! Configuration is read from `REPORT_BOT_*` variables (a `.env` file is
//! honoured). The inbox is checked once at start-up and then every poll
//! interval until Ctrl-C.

use report_bot::{BotConfig, ReportBot, Scheduler};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("report_bot=info")),
        )
        .with_target(true)
        .init();

    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    if config.report.spreadsheets.is_empty() {
        tracing::warn!("No spreadsheets configured, reports will be empty");
    }

    let interval = config.polling.interval;
    let bot = match ReportBot::google(config) {
        Ok(bot) => Arc::new(bot),
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize");
            return ExitCode::FAILURE;
        }
    };

    let handle = Scheduler::new(bot, interval).spawn();

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }

    tracing::info!("Shutting down after the current cycle");
    handle.shutdown().await;

    ExitCode::SUCCESS
}
