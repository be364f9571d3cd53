//! # report-bot
//!
//! Mailbox-triggered survey reports over Google APIs.
//!
//! This crate provides an async bot that:
//! - Polls a Gmail label for messages whose subject contains a trigger phrase
//! - Answers only senders on an allow-list
//! - Summarizes survey spreadsheets and emails the report back
//! - Keeps its OAuth credential fresh, re-authorizing interactively when needed
//!
//! ## Quick Start
//!
//! ```no_run
//! use report_bot::{BotConfig, ReportBot};
//!
//! # async fn example() -> report_bot::Result<()> {
//! let config = BotConfig::builder()
//!     .allow_list_path("authorized_clients.json")
//!     .spreadsheet("Puka Doner", "1AbCdEf")
//!     .build()?;
//!
//! let bot = ReportBot::google(config)?;
//! let report = bot.check_inbox().await?;
//! println!("{} report(s) sent", report.processed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Polling
//!
//! ```no_run
//! use report_bot::{BotConfig, ReportBot, Scheduler};
//! use std::sync::Arc;
//!
//! # async fn example() -> report_bot::Result<()> {
//! let config = BotConfig::from_env()?;
//! let interval = config.polling.interval;
//! let handle = Scheduler::new(Arc::new(ReportBot::google(config)?), interval).spawn();
//!
//! // ... later
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Triggers
//!
//! ```
//! use report_bot::matcher::{ClosureMatcher, RegexMatcher};
//! use report_bot::trigger::TriggerEvaluator;
//!
//! let weekly = TriggerEvaluator::new(RegexMatcher::new(r"(?i)weekly (report|summary)").unwrap());
//!
//! let exact = TriggerEvaluator::new(ClosureMatcher::new(
//!     |subject| subject.trim().eq_ignore_ascii_case("report"),
//!     "subject is exactly 'report'",
//! ));
//! ```
//!
//! ## Testing Without Google
//!
//! Every remote collaborator is a trait: [`credential::TokenStore`],
//! [`credential::Authorizer`], [`gateway::MailboxGateway`],
//! [`gateway::SheetsGateway`], [`report::Summarizer`] and
//! [`report::ReportPipeline`]. Wire fakes through [`ReportBot::new`].
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error`. Use [`Error::category`] for
//! logging and [`Error::is_retryable`] to tell transient failures apart:
//!
//! ```
//! use report_bot::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient {} error, next cycle will retry: {}", error.category(), error);
//!     } else {
//!         println!("Permanent error: {}", error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation.
//!
//! ### Span Naming Convention
//!
//! - `ReportBot::check_inbox` - One poll cycle
//! - `Scheduler::cycle` - Scheduler wrapper around a cycle
//! - `CredentialStore::obtain_credential` - Credential load/refresh
//! - `CredentialStore::reauthorize` - Interactive re-authorization
//! - `GoogleOAuth::refresh` / `GoogleOAuth::authorize` - Token endpoint grants
//! - `GmailGateway::list_recent` / `GmailGateway::get` / `GmailGateway::send`
//! - `GoogleSheetsGateway::get_values`
//! - `SurveyReportPipeline::section` - One spreadsheet's report section
//!
//! ### Standard Fields
//!
//! - `message_id` - Gmail message id
//! - `sender` - Normalized requester address
//! - `label` - Mailbox label being polled
//! - `sheet` - Spreadsheet display name
//! - `cycle` - Poll cycle counter

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod allow_list;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod gmail;
pub mod matcher;
pub mod oauth;
pub mod parser;
pub mod report;
pub mod sheets;
pub mod trigger;

// Internal modules
mod bot;
mod http;
mod scheduler;

// Re-exports for ergonomic API
pub use allow_list::{load_allowed_senders, AllowList};
pub use bot::{CycleReport, ReportBot};
pub use config::{
    BotConfig, BotConfigBuilder, PollingConfig, ReportConfig, Spreadsheet, TimeoutConfig,
};
pub use credential::{Credential, CredentialStore, FileTokenStore, MemoryTokenStore};
pub use error::{Error, ErrorCategory, Result};
pub use scheduler::{PollState, PollTask, Scheduler, SchedulerHandle, MIN_INTERVAL};
pub use trigger::{evaluate, Action, IgnoreReason, TriggerEvaluator};
