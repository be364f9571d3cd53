//! The report bot and its inbox check cycle.
//!
//! [`ReportBot`] is the main entry point for this crate. One call to
//! [`check_inbox`](ReportBot::check_inbox) is one poll cycle:
//!
//! 1. obtain a credential (refreshing or re-authorizing as needed),
//! 2. load the allow-list,
//! 3. list the most recent messages and fetch each one's headers,
//! 4. evaluate each message and run the report pipeline for authorized
//!    trigger messages.
//!
//! Messages are independent: a failed fetch or a failed report is logged and
//! counted, and the cycle moves on to the next message.
//!
//! Answered message ids are remembered only while the list call keeps
//! returning them.
//!
//! # Example
//!
//! ```no_run
//! use report_bot::{BotConfig, ReportBot};
//!
//! # async fn example() -> report_bot::Result<()> {
//! let config = BotConfig::builder()
//!     .spreadsheet("Puka Doner", "1AbCdEf")
//!     .build()?;
//!
//! let bot = ReportBot::google(config)?;
//! let report = bot.check_inbox().await?;
//! println!("processed {} request(s)", report.processed);
//! # Ok(())
//! # }
//! ```

use crate::allow_list::load_allowed_senders;
use crate::config::BotConfig;
use crate::credential::CredentialStore;
use crate::error::Result;
use crate::gateway::{MailboxGateway, MessageRef};
use crate::gmail::GmailGateway;
use crate::oauth::GoogleOAuth;
use crate::parser;
use crate::report::{ReportPipeline, SurveyReportPipeline};
use crate::scheduler::PollTask;
use crate::sheets::GoogleSheetsGateway;
use crate::trigger::{Action, TriggerEvaluator};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, instrument, warn};

/// Counters describing one check cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages returned by the list call.
    pub fetched: usize,
    /// Trigger messages whose report was delivered.
    pub processed: usize,
    /// Messages that did not qualify.
    pub ignored: usize,
    /// Messages whose headers could not be fetched.
    pub skipped: usize,
    /// Trigger messages whose report pipeline failed.
    pub failed: usize,
    /// Messages already processed in an earlier cycle.
    pub already_handled: usize,
}

/// Polls a mailbox for report requests and answers them.
pub struct ReportBot {
    config: BotConfig,
    credentials: CredentialStore,
    mailbox: Arc<dyn MailboxGateway>,
    pipeline: Arc<dyn ReportPipeline>,
    evaluator: TriggerEvaluator,
    handled: Mutex<HashSet<String>>,
}

impl ReportBot {
    /// Creates a bot from its collaborators.
    ///
    /// The trigger is `config.trigger_phrase`; use
    /// [`with_evaluator`](Self::with_evaluator) for a custom matcher.
    #[must_use]
    pub fn new(
        config: BotConfig,
        credentials: CredentialStore,
        mailbox: Arc<dyn MailboxGateway>,
        pipeline: Arc<dyn ReportPipeline>,
    ) -> Self {
        let evaluator = TriggerEvaluator::phrase(config.trigger_phrase.clone());
        Self {
            config,
            credentials,
            mailbox,
            pipeline,
            evaluator,
            handled: Mutex::new(HashSet::new()),
        }
    }

    /// Creates a bot wired to Gmail, Google Sheets and Google OAuth.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be constructed.
    pub fn google(config: BotConfig) -> Result<Self> {
        let authorizer = Arc::new(GoogleOAuth::new(&config.timeouts)?);
        let credentials = CredentialStore::from_config(&config, authorizer);
        let mailbox: Arc<dyn MailboxGateway> = Arc::new(GmailGateway::new(&config.timeouts)?);
        let sheets = Arc::new(GoogleSheetsGateway::new(&config.timeouts)?);
        let pipeline = Arc::new(SurveyReportPipeline::new(
            sheets,
            Arc::clone(&mailbox),
            config.report.clone(),
        ));

        Ok(Self::new(config, credentials, mailbox, pipeline))
    }

    /// Replaces the trigger evaluator.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: TriggerEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Returns the bot configuration.
    #[must_use]
    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Runs one check cycle.
    ///
    /// # Errors
    ///
    /// Returns an error, and processes nothing, if no credential can be
    /// obtained, the allow-list cannot be loaded or the message list call
    /// fails. Per-message failures are counted in the returned
    /// [`CycleReport`] instead.
    #[instrument(
        name = "ReportBot::check_inbox",
        skip(self),
        fields(
            label = %self.config.polling.label,
            max_results = self.config.polling.max_results
        )
    )]
    pub async fn check_inbox(&self) -> Result<CycleReport> {
        let credential = self.credentials.obtain_credential().await?;
        let allowed = load_allowed_senders(&self.config.allow_list_path)?;
        debug!(authorized = allowed.len(), "Allow-list loaded");

        let refs = self
            .mailbox
            .list_recent(
                &credential,
                &self.config.polling.label,
                self.config.polling.max_results,
            )
            .await?;

        self.forget_unlisted(&refs);

        let mut report = CycleReport {
            fetched: refs.len(),
            ..CycleReport::default()
        };

        if refs.is_empty() {
            info!("No new messages");
            return Ok(report);
        }

        for message_ref in &refs {
            let message_id = message_ref.id.as_str();

            if self.is_handled(message_id) {
                debug!(message_id, "Already handled, skipping");
                report.already_handled += 1;
                continue;
            }

            let headers = match self.mailbox.get(&credential, message_id).await {
                Ok(headers) => headers,
                Err(e) => {
                    warn!(
                        message_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Failed to fetch message, skipping"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            let message = parser::message_from_headers(headers);

            match self.evaluator.evaluate(&message, &allowed) {
                Action::Process { sender } => {
                    info!(message_id, sender = %sender, "Processing report request");
                    match self.pipeline.run(&credential, &sender).await {
                        Ok(()) => {
                            self.mark_handled(message_id);
                            report.processed += 1;
                        }
                        Err(e) => {
                            error!(
                                message_id,
                                sender = %sender,
                                error = %e,
                                category = %e.category(),
                                "Report pipeline failed"
                            );
                            report.failed += 1;
                        }
                    }
                }
                Action::Ignore(reason) => {
                    debug!(
                        message_id,
                        %reason,
                        subject = ?message.subject,
                        sender = ?message.sender,
                        "Ignoring message"
                    );
                    report.ignored += 1;
                }
            }
        }

        info!(
            fetched = report.fetched,
            processed = report.processed,
            ignored = report.ignored,
            skipped = report.skipped,
            failed = report.failed,
            already_handled = report.already_handled,
            "Inbox check complete"
        );
        Ok(report)
    }

    fn is_handled(&self, message_id: &str) -> bool {
        self.handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(message_id)
    }

    /// Drops handled ids that fell out of the listed window.
    fn forget_unlisted(&self, refs: &[MessageRef]) {
        let listed: HashSet<&str> = refs.iter().map(|r| r.id.as_str()).collect();
        let mut handled = self.handled.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handled.len();
        handled.retain(|id| listed.contains(id.as_str()));
        if handled.len() < before {
            debug!(forgotten = before - handled.len(), "Pruned handled message ids");
        }
    }

    fn mark_handled(&self, message_id: &str) {
        self.handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message_id.to_string());
    }
}

impl PollTask for ReportBot {
    fn run_cycle(&self) -> BoxFuture<'_, Result<CycleReport>> {
        Box::pin(self.check_inbox())
    }
}

impl std::fmt::Debug for ReportBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportBot")
            .field("config", &self.config)
            .field("evaluator", &self.evaluator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{Authorizer, Credential, MemoryTokenStore};
    use crate::error::Error;
    use crate::gateway::{Header, MessageHeaders, OutgoingMessage};
    use crate::oauth::ClientSecrets;
    use std::collections::HashMap;
    use std::io::Write;

    struct NoAuthorizer;

    impl Authorizer for NoAuthorizer {
        fn refresh<'a>(&'a self, _credential: &'a Credential) -> BoxFuture<'a, Result<Credential>> {
            Box::pin(async { Err(Error::NoRefreshToken) })
        }

        fn authorize<'a>(
            &'a self,
            _secrets: &'a ClientSecrets,
            _scopes: &'a [String],
        ) -> BoxFuture<'a, Result<Credential>> {
            Box::pin(async {
                Err(Error::Authorization {
                    message: "not in tests".into(),
                })
            })
        }
    }

    struct FakeMailbox {
        messages: Vec<(String, Option<MessageHeaders>)>,
        archived: Mutex<HashSet<String>>,
    }

    impl FakeMailbox {
        fn new() -> Self {
            Self {
                messages: Vec::new(),
                archived: Mutex::new(HashSet::new()),
            }
        }

        /// Hides a message from later list calls.
        fn archive(&self, id: &str) {
            self.archived.lock().unwrap().insert(id.to_string());
        }

        fn message(mut self, id: &str, subject: &str, from: &str) -> Self {
            self.messages.push((
                id.to_string(),
                Some(MessageHeaders {
                    id: id.to_string(),
                    headers: vec![Header::new("Subject", subject), Header::new("From", from)],
                }),
            ));
            self
        }

        fn broken(mut self, id: &str) -> Self {
            self.messages.push((id.to_string(), None));
            self
        }
    }

    impl MailboxGateway for FakeMailbox {
        fn list_recent<'a>(
            &'a self,
            _credential: &'a Credential,
            _label: &'a str,
            max_results: u32,
        ) -> BoxFuture<'a, Result<Vec<MessageRef>>> {
            Box::pin(async move {
                let archived = self.archived.lock().unwrap();
                Ok(self
                    .messages
                    .iter()
                    .filter(|(id, _)| !archived.contains(id))
                    .take(max_results as usize)
                    .map(|(id, _)| MessageRef::new(id.clone()))
                    .collect())
            })
        }

        fn get<'a>(
            &'a self,
            _credential: &'a Credential,
            message_id: &'a str,
        ) -> BoxFuture<'a, Result<MessageHeaders>> {
            Box::pin(async move {
                self.messages
                    .iter()
                    .find(|(id, _)| id == message_id)
                    .and_then(|(_, headers)| headers.clone())
                    .ok_or_else(|| Error::Api {
                        operation: "gmail.get".into(),
                        status: 500,
                        message: "backend error".into(),
                    })
            })
        }

        fn sender_address<'a>(
            &'a self,
            _credential: &'a Credential,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async { Ok("bot@example.com".to_string()) })
        }

        fn send<'a>(
            &'a self,
            _credential: &'a Credential,
            _message: &'a OutgoingMessage,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async { Ok("sent".to_string()) })
        }
    }

    #[derive(Default)]
    struct RecordingPipeline {
        requests: Mutex<Vec<String>>,
        failures: Mutex<HashMap<String, usize>>,
    }

    impl RecordingPipeline {
        fn failing_once_for(sender: &str) -> Self {
            let pipeline = Self::default();
            pipeline
                .failures
                .lock()
                .unwrap()
                .insert(sender.to_string(), 1);
            pipeline
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ReportPipeline for RecordingPipeline {
        fn run<'a>(
            &'a self,
            _credential: &'a Credential,
            requester: &'a str,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(requester.to_string());
                let mut failures = self.failures.lock().unwrap();
                if let Some(remaining) = failures.get_mut(requester) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(Error::Api {
                            operation: "gmail.send".into(),
                            status: 503,
                            message: "unavailable".into(),
                        });
                    }
                }
                Ok(())
            })
        }
    }

    fn allow_list_file(addresses: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::json!({ "AUTHORIZED_CLIENTS": addresses });
        file.write_all(json.to_string().as_bytes()).unwrap();
        file
    }

    fn bot(
        allow_list: &tempfile::NamedTempFile,
        mailbox: FakeMailbox,
        pipeline: Arc<RecordingPipeline>,
    ) -> ReportBot {
        let config = BotConfig::builder()
            .allow_list_path(allow_list.path())
            .build()
            .unwrap();
        let credentials = CredentialStore::new(
            Arc::new(MemoryTokenStore::with_credential(Credential::new("valid"))),
            Arc::new(NoAuthorizer),
            "unused.json",
        );
        ReportBot::new(config, credentials, Arc::new(mailbox), pipeline)
    }

    #[tokio::test]
    async fn test_cycle_processes_only_authorized_triggers() {
        let allow_list = allow_list_file(&["boss@example.com"]);
        let mailbox = FakeMailbox::new()
            .message("1", "Generate report please", "Boss <Boss@Example.com>")
            .message("2", "Generate report please", "stranger@example.com")
            .message("3", "Lunch?", "boss@example.com");
        let pipeline = Arc::new(RecordingPipeline::default());
        let bot = bot(&allow_list, mailbox, pipeline.clone());

        let report = bot.check_inbox().await.unwrap();

        assert_eq!(
            report,
            CycleReport {
                fetched: 3,
                processed: 1,
                ignored: 2,
                ..CycleReport::default()
            }
        );
        assert_eq!(pipeline.requests(), vec!["boss@example.com"]);
    }

    #[tokio::test]
    async fn test_failed_get_does_not_stop_cycle() {
        let allow_list = allow_list_file(&["boss@example.com"]);
        let mailbox = FakeMailbox::new()
            .broken("1")
            .message("2", "generate report", "boss@example.com");
        let pipeline = Arc::new(RecordingPipeline::default());
        let bot = bot(&allow_list, mailbox, pipeline.clone());

        let report = bot.check_inbox().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(pipeline.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_handled_message_not_processed_twice() {
        let allow_list = allow_list_file(&["boss@example.com"]);
        let mailbox = FakeMailbox::new().message("1", "generate report", "boss@example.com");
        let pipeline = Arc::new(RecordingPipeline::default());
        let bot = bot(&allow_list, mailbox, pipeline.clone());

        bot.check_inbox().await.unwrap();
        let second = bot.check_inbox().await.unwrap();

        assert_eq!(second.already_handled, 1);
        assert_eq!(second.processed, 0);
        assert_eq!(pipeline.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_handled_ids_pruned_to_listed_window() {
        let allow_list = allow_list_file(&["boss@example.com"]);
        let mailbox = Arc::new(
            FakeMailbox::new()
                .message("1", "generate report", "boss@example.com")
                .message("2", "generate report", "boss@example.com"),
        );
        let pipeline = Arc::new(RecordingPipeline::default());
        let config = BotConfig::builder()
            .allow_list_path(allow_list.path())
            .build()
            .unwrap();
        let credentials = CredentialStore::new(
            Arc::new(MemoryTokenStore::with_credential(Credential::new("valid"))),
            Arc::new(NoAuthorizer),
            "unused.json",
        );
        let bot = ReportBot::new(config, credentials, mailbox.clone(), pipeline.clone());

        bot.check_inbox().await.unwrap();
        assert_eq!(bot.handled.lock().unwrap().len(), 2);

        mailbox.archive("1");
        let second = bot.check_inbox().await.unwrap();

        assert_eq!(second.already_handled, 1);
        assert_eq!(pipeline.requests().len(), 2);
        let handled = bot.handled.lock().unwrap();
        assert!(handled.contains("2"));
        assert!(!handled.contains("1"));
    }

    #[tokio::test]
    async fn test_failed_report_is_retried_next_cycle() {
        let allow_list = allow_list_file(&["boss@example.com"]);
        let mailbox = FakeMailbox::new().message("1", "generate report", "boss@example.com");
        let pipeline = Arc::new(RecordingPipeline::failing_once_for("boss@example.com"));
        let bot = bot(&allow_list, mailbox, pipeline.clone());

        let first = bot.check_inbox().await.unwrap();
        let second = bot.check_inbox().await.unwrap();

        assert_eq!(first.failed, 1);
        assert_eq!(second.processed, 1);
        assert_eq!(pipeline.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_allow_list_aborts_cycle() {
        let config = BotConfig::builder()
            .allow_list_path("/nonexistent/authorized_clients.json")
            .build()
            .unwrap();
        let credentials = CredentialStore::new(
            Arc::new(MemoryTokenStore::with_credential(Credential::new("valid"))),
            Arc::new(NoAuthorizer),
            "unused.json",
        );
        let pipeline = Arc::new(RecordingPipeline::default());
        let bot = ReportBot::new(
            config,
            credentials,
            Arc::new(FakeMailbox::new().message("1", "generate report", "a@b.com")),
            pipeline.clone(),
        );

        let err = bot.check_inbox().await.unwrap_err();

        assert!(matches!(err, Error::ConfigFileMissing { .. }));
        assert!(pipeline.requests().is_empty());
    }

    #[tokio::test]
    async fn test_empty_mailbox() {
        let allow_list = allow_list_file(&["boss@example.com"]);
        let pipeline = Arc::new(RecordingPipeline::default());
        let bot = bot(&allow_list, FakeMailbox::new(), pipeline);

        assert_eq!(bot.check_inbox().await.unwrap(), CycleReport::default());
    }
}
