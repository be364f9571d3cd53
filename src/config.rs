//! Configuration for the report bot.
//!
//! Use [`BotConfigBuilder`] to create a configuration with sensible defaults:
//!
//! ```
//! use report_bot::BotConfig;
//!
//! let config = BotConfig::builder()
//!     .allow_list_path("authorized_clients.json")
//!     .spreadsheet("Puka Doner", "1AbCdEf")
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.trigger_phrase, "generate report");
//! assert_eq!(config.polling.max_results, 10);
//! ```
//!
//! Or read it from the environment with [`BotConfig::from_env`].

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default trigger phrase matched against message subjects.
pub const DEFAULT_TRIGGER_PHRASE: &str = "generate report";

/// OAuth scopes needed to read/send mail and read spreadsheets.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/spreadsheets",
];

/// Default A1 range read from each survey spreadsheet.
pub const DEFAULT_SHEET_RANGE: &str = "Form Responses 1!A1:P1000";

/// Default free-text comments column of the survey form.
pub const DEFAULT_COMMENTS_COLUMN: &str = "Ek Yorumlar";

/// Default subject of the reply email.
pub const DEFAULT_REPORT_SUBJECT: &str = "Your Requested Report";

/// Form columns holding timestamps or respondent contact details, left out of
/// reports.
pub const DEFAULT_EXCLUDED_COLUMNS: &[&str] = &[
    "Zaman damgası",
    "Timestamp",
    "İsim",
    "WhatsApp Telefon Numarasi",
    "Email",
];

const MAX_RESULTS_LIMIT: u32 = 500;

/// Configuration for the report bot.
///
/// Create using [`BotConfig::builder()`] or [`BotConfig::from_env()`].
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Persisted OAuth token file (overwritten on every refresh/grant).
    pub token_path: PathBuf,
    /// OAuth client-secret file used for interactive re-authorization.
    pub client_secret_path: PathBuf,
    /// Allow-list file (`{"AUTHORIZED_CLIENTS": [...]}`).
    pub allow_list_path: PathBuf,
    /// Phrase that must appear in a subject (case-insensitive).
    pub trigger_phrase: String,
    /// OAuth scopes requested on re-authorization.
    pub scopes: Vec<String>,
    /// Polling configuration.
    pub polling: PollingConfig,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
    /// Report pipeline configuration.
    pub report: ReportConfig,
}

/// Polling configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between check cycles.
    pub interval: Duration,
    /// How many of the most recent messages each cycle inspects.
    pub max_results: u32,
    /// Mailbox label to list.
    pub label: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_results: 10,
            label: "INBOX".to_string(),
        }
    }
}

/// Timeout configuration for blocking operations.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for each HTTP request to Google APIs.
    pub http: Duration,
    /// Timeout for the interactive re-authorization flow.
    pub authorization: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http: Duration::from_secs(30),
            authorization: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// A named survey spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spreadsheet {
    /// Display name used as the report section heading.
    pub name: String,
    /// Google Sheets spreadsheet id.
    pub id: String,
}

/// Report pipeline configuration.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Spreadsheets summarized into each report, in order.
    pub spreadsheets: Vec<Spreadsheet>,
    /// A1 range read from every spreadsheet.
    pub range: String,
    /// Column collected as free-text comments rather than tabulated.
    pub comments_column: String,
    /// Columns never summarized (compared case-insensitively).
    pub excluded_columns: Vec<String>,
    /// Reply `From` address; the account's own address when unset.
    pub sender: Option<String>,
    /// Subject of the reply email.
    pub subject: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            spreadsheets: Vec::new(),
            range: DEFAULT_SHEET_RANGE.to_string(),
            comments_column: DEFAULT_COMMENTS_COLUMN.to_string(),
            excluded_columns: DEFAULT_EXCLUDED_COLUMNS
                .iter()
                .map(ToString::to_string)
                .collect(),
            sender: None,
            subject: DEFAULT_REPORT_SUBJECT.to_string(),
        }
    }
}

impl BotConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> BotConfigBuilder {
        BotConfigBuilder::default()
    }

    /// Builds a configuration from `REPORT_BOT_*` environment variables.
    ///
    /// Unset variables fall back to the builder defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable cannot be parsed or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(path) = lookup("REPORT_BOT_TOKEN_PATH") {
            builder = builder.token_path(path);
        }
        if let Some(path) = lookup("REPORT_BOT_CLIENT_SECRET_PATH") {
            builder = builder.client_secret_path(path);
        }
        if let Some(path) = lookup("REPORT_BOT_ALLOW_LIST_PATH") {
            builder = builder.allow_list_path(path);
        }
        if let Some(phrase) = lookup("REPORT_BOT_TRIGGER") {
            builder = builder.trigger_phrase(phrase);
        }
        if let Some(secs) = lookup("REPORT_BOT_POLL_INTERVAL_SECS") {
            builder = builder.poll_interval(Duration::from_secs(parse_number(
                "REPORT_BOT_POLL_INTERVAL_SECS",
                &secs,
            )?));
        }
        if let Some(max) = lookup("REPORT_BOT_MAX_RESULTS") {
            builder = builder.max_results(parse_number("REPORT_BOT_MAX_RESULTS", &max)?);
        }
        if let Some(label) = lookup("REPORT_BOT_LABEL") {
            builder = builder.label(label);
        }
        if let Some(list) = lookup("REPORT_BOT_SPREADSHEETS") {
            for sheet in parse_spreadsheets(&list)? {
                builder = builder.spreadsheet(sheet.name, sheet.id);
            }
        }
        if let Some(range) = lookup("REPORT_BOT_SHEET_RANGE") {
            builder = builder.sheet_range(range);
        }
        if let Some(columns) = lookup("REPORT_BOT_EXCLUDED_COLUMNS") {
            builder = builder.excluded_columns(
                columns
                    .split(',')
                    .map(str::trim)
                    .filter(|column| !column.is_empty()),
            );
        }
        if let Some(sender) = lookup("REPORT_BOT_SENDER") {
            builder = builder.report_sender(sender);
        }

        builder.build()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidConfig {
        message: format!("{key} must be a number, got '{value}'"),
    })
}

/// Parses `name=id,name=id` into spreadsheets.
fn parse_spreadsheets(list: &str) -> Result<Vec<Spreadsheet>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, id) = entry.split_once('=').ok_or_else(|| Error::InvalidConfig {
                message: format!("spreadsheet entry '{entry}' must be name=id"),
            })?;
            let (name, id) = (name.trim(), id.trim());
            if name.is_empty() || id.is_empty() {
                return Err(Error::InvalidConfig {
                    message: format!("spreadsheet entry '{entry}' has an empty name or id"),
                });
            }
            Ok(Spreadsheet {
                name: name.to_string(),
                id: id.to_string(),
            })
        })
        .collect()
}

/// Builder for [`BotConfig`].
#[derive(Debug, Default)]
pub struct BotConfigBuilder {
    token_path: Option<PathBuf>,
    client_secret_path: Option<PathBuf>,
    allow_list_path: Option<PathBuf>,
    trigger_phrase: Option<String>,
    scopes: Option<Vec<String>>,
    polling: Option<PollingConfig>,
    timeouts: Option<TimeoutConfig>,
    report: Option<ReportConfig>,
}

impl BotConfigBuilder {
    /// Sets the persisted token file. Default: `token.json`.
    #[must_use]
    pub fn token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = Some(path.into());
        self
    }

    /// Sets the OAuth client-secret file. Default: `credentials.json`.
    #[must_use]
    pub fn client_secret_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_secret_path = Some(path.into());
        self
    }

    /// Sets the allow-list file. Default: `authorized_clients.json`.
    #[must_use]
    pub fn allow_list_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.allow_list_path = Some(path.into());
        self
    }

    /// Sets the trigger phrase. Default: `generate report`.
    #[must_use]
    pub fn trigger_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.trigger_phrase = Some(phrase.into());
        self
    }

    /// Replaces the OAuth scopes requested on re-authorization.
    #[must_use]
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    /// Sets polling configuration.
    #[must_use]
    pub fn polling(mut self, polling: PollingConfig) -> Self {
        self.polling = Some(polling);
        self
    }

    /// Sets the interval between check cycles.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .interval = interval;
        self
    }

    /// Sets how many recent messages each cycle inspects.
    #[must_use]
    pub fn max_results(mut self, max_results: u32) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .max_results = max_results;
        self
    }

    /// Sets the mailbox label to list.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.polling.get_or_insert_with(PollingConfig::default).label = label.into();
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the per-request HTTP timeout.
    #[must_use]
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.get_or_insert_with(TimeoutConfig::default).http = timeout;
        self
    }

    /// Sets the interactive re-authorization timeout.
    #[must_use]
    pub fn authorization_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .authorization = timeout;
        self
    }

    /// Adds a spreadsheet to summarize.
    #[must_use]
    pub fn spreadsheet(mut self, name: impl Into<String>, id: impl Into<String>) -> Self {
        self.report
            .get_or_insert_with(ReportConfig::default)
            .spreadsheets
            .push(Spreadsheet {
                name: name.into(),
                id: id.into(),
            });
        self
    }

    /// Sets the A1 range read from each spreadsheet.
    #[must_use]
    pub fn sheet_range(mut self, range: impl Into<String>) -> Self {
        self.report.get_or_insert_with(ReportConfig::default).range = range.into();
        self
    }

    /// Sets the free-text comments column.
    #[must_use]
    pub fn comments_column(mut self, column: impl Into<String>) -> Self {
        self.report
            .get_or_insert_with(ReportConfig::default)
            .comments_column = column.into();
        self
    }

    /// Replaces the columns left out of reports.
    #[must_use]
    pub fn excluded_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.report
            .get_or_insert_with(ReportConfig::default)
            .excluded_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the reply `From` address.
    #[must_use]
    pub fn report_sender(mut self, sender: impl Into<String>) -> Self {
        self.report.get_or_insert_with(ReportConfig::default).sender = Some(sender.into());
        self
    }

    /// Sets the reply subject.
    #[must_use]
    pub fn report_subject(mut self, subject: impl Into<String>) -> Self {
        self.report.get_or_insert_with(ReportConfig::default).subject = subject.into();
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the trigger phrase is blank, the
    /// poll interval is zero or `max_results` is outside `1..=500`.
    pub fn build(self) -> Result<BotConfig> {
        let trigger_phrase = self
            .trigger_phrase
            .unwrap_or_else(|| DEFAULT_TRIGGER_PHRASE.to_string());
        if trigger_phrase.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "trigger phrase must not be empty".into(),
            });
        }

        let polling = self.polling.unwrap_or_default();
        if polling.interval.is_zero() {
            return Err(Error::InvalidConfig {
                message: "poll interval must be greater than zero".into(),
            });
        }
        if polling.max_results == 0 || polling.max_results > MAX_RESULTS_LIMIT {
            return Err(Error::InvalidConfig {
                message: format!(
                    "max_results must be between 1 and {MAX_RESULTS_LIMIT}, got {}",
                    polling.max_results
                ),
            });
        }
        if polling.label.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "mailbox label must not be empty".into(),
            });
        }

        Ok(BotConfig {
            token_path: self.token_path.unwrap_or_else(|| "token.json".into()),
            client_secret_path: self
                .client_secret_path
                .unwrap_or_else(|| "credentials.json".into()),
            allow_list_path: self
                .allow_list_path
                .unwrap_or_else(|| "authorized_clients.json".into()),
            trigger_phrase,
            scopes: self
                .scopes
                .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(ToString::to_string).collect()),
            polling,
            timeouts: self.timeouts.unwrap_or_default(),
            report: self.report.unwrap_or_default(),
        })
    }
}
