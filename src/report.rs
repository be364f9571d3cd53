//! Survey report generation.
//!
//! For every configured spreadsheet the pipeline reads the response range,
//! tabulates it into a [`SheetSummary`] (most frequent answer per question,
//! free-text comments collected separately), asks a [`Summarizer`] for prose
//! and mails the concatenated sections back to the requester.
//!
//! Summarizer failures never abort a report: the affected section carries
//! [`REPORT_ERROR_PLACEHOLDER`] instead.

use crate::config::{ReportConfig, Spreadsheet};
use crate::credential::Credential;
use crate::error::Result;
use crate::gateway::{MailboxGateway, OutgoingMessage, SheetsGateway};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

/// Section text used when a summary could not be produced.
pub const REPORT_ERROR_PLACEHOLDER: &str =
    "There was an error in generating the report. Please try again later.";

/// Body sent when no spreadsheet had any responses.
pub const NO_DATA_MESSAGE: &str = "No survey responses were found.";

/// Tabulated responses of one spreadsheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetSummary {
    /// `(question, most frequent answer)` in column order.
    pub columns: Vec<(String, String)>,
    /// Non-empty free-text comments in row order.
    pub comments: Vec<String>,
    /// Number of response rows.
    pub responses: usize,
}

/// Tabulates a value range whose first row is the header.
///
/// Returns `None` if there is no header or no response rows. For each column
/// the most frequent non-empty value is kept; ties go to the value seen first.
/// Columns with no answers, and those named in `excluded_columns`, are left
/// out. The `comments_column` is collected verbatim instead of tabulated.
#[must_use]
pub fn tabulate(
    rows: &[Vec<String>],
    comments_column: &str,
    excluded_columns: &[String],
) -> Option<SheetSummary> {
    let (header, records) = rows.split_first()?;
    if records.is_empty() {
        return None;
    }

    let mut summary = SheetSummary {
        responses: records.len(),
        ..SheetSummary::default()
    };

    for (index, name) in header.iter().enumerate() {
        let name = name.trim();
        if name.is_empty() || is_excluded(name, excluded_columns) {
            continue;
        }

        let answers = records
            .iter()
            .filter_map(|row| row.get(index))
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty());

        if name == comments_column {
            summary.comments.extend(answers.map(ToString::to_string));
        } else if let Some(value) = mode(answers) {
            summary.columns.push((name.to_string(), value.to_string()));
        }
    }

    Some(summary)
}

fn is_excluded(name: &str, excluded_columns: &[String]) -> bool {
    let name = name.to_lowercase();
    excluded_columns
        .iter()
        .any(|excluded| excluded.trim().to_lowercase() == name)
}

fn mode<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    // value -> (count, first position)
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, value) in values.enumerate() {
        counts.entry(value).or_insert((0, position)).0 += 1;
    }

    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(value, _)| value)
}

/// Turns a tabulated sheet into report text.
pub trait Summarizer: Send + Sync {
    /// Produces the report section for `sheet_name`. The free-text comments
    /// travel inside `summary`.
    fn summarize<'a>(
        &'a self,
        sheet_name: &'a str,
        summary: &'a SheetSummary,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Deterministic summarizer listing each question's most common answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextSummarizer;

impl PlainTextSummarizer {
    /// Renders the summary as text.
    #[must_use]
    pub fn render(summary: &SheetSummary) -> String {
        let mut text = format!("Responses: {}\n", summary.responses);
        for (question, answer) in &summary.columns {
            let _ = writeln!(text, "- {question}: {answer}");
        }
        if !summary.comments.is_empty() {
            text.push_str("- Additional Comments:\n");
            for comment in &summary.comments {
                let _ = writeln!(text, "  * {comment}");
            }
        }
        text
    }
}

impl Summarizer for PlainTextSummarizer {
    fn summarize<'a>(
        &'a self,
        _sheet_name: &'a str,
        summary: &'a SheetSummary,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(Self::render(summary)) })
    }
}

/// Produces and delivers a report for an authorized requester.
pub trait ReportPipeline: Send + Sync {
    /// Builds the report and sends it to `requester`.
    fn run<'a>(&'a self, credential: &'a Credential, requester: &'a str)
        -> BoxFuture<'a, Result<()>>;
}

/// The spreadsheet-backed [`ReportPipeline`].
pub struct SurveyReportPipeline {
    sheets: Arc<dyn SheetsGateway>,
    mailbox: Arc<dyn MailboxGateway>,
    summarizer: Arc<dyn Summarizer>,
    config: ReportConfig,
    sender: OnceCell<String>,
}

impl SurveyReportPipeline {
    /// Creates a pipeline using the [`PlainTextSummarizer`].
    #[must_use]
    pub fn new(
        sheets: Arc<dyn SheetsGateway>,
        mailbox: Arc<dyn MailboxGateway>,
        config: ReportConfig,
    ) -> Self {
        Self {
            sheets,
            mailbox,
            summarizer: Arc::new(PlainTextSummarizer),
            config,
            sender: OnceCell::new(),
        }
    }

    /// Replaces the summarizer.
    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Builds the report body without sending it.
    pub async fn compose(&self, credential: &Credential) -> String {
        let mut body = String::new();
        for sheet in &self.config.spreadsheets {
            if let Some(text) = self.section(credential, sheet).await {
                let _ = write!(body, "\nReport for {}:\n{text}", sheet.name);
            }
        }

        if body.is_empty() {
            NO_DATA_MESSAGE.to_string()
        } else {
            body
        }
    }

    #[instrument(name = "SurveyReportPipeline::section", skip_all, fields(sheet = %sheet.name))]
    async fn section(&self, credential: &Credential, sheet: &Spreadsheet) -> Option<String> {
        let rows = match self
            .sheets
            .get_values(credential, &sheet.id, &self.config.range)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, category = %e.category(), "Failed to read spreadsheet");
                return Some(REPORT_ERROR_PLACEHOLDER.to_string());
            }
        };

        let Some(summary) = tabulate(
            &rows,
            &self.config.comments_column,
            &self.config.excluded_columns,
        ) else {
            info!("No data found, skipping sheet");
            return None;
        };
        debug!(
            responses = summary.responses,
            columns = summary.columns.len(),
            comments = summary.comments.len(),
            "Tabulated sheet"
        );

        match self.summarizer.summarize(&sheet.name, &summary).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "Summarizer failed, using placeholder");
                Some(REPORT_ERROR_PLACEHOLDER.to_string())
            }
        }
    }

    /// The configured sender, or the account address looked up once.
    async fn sender(&self, credential: &Credential) -> Result<&str> {
        let sender = self
            .sender
            .get_or_try_init(|| async {
                match &self.config.sender {
                    Some(sender) => Ok(sender.clone()),
                    None => self.mailbox.sender_address(credential).await,
                }
            })
            .await?;
        Ok(sender.as_str())
    }
}

impl ReportPipeline for SurveyReportPipeline {
    fn run<'a>(
        &'a self,
        credential: &'a Credential,
        requester: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let from = self.sender(credential).await?;
            let body = self.compose(credential).await;
            let message = OutgoingMessage::new(from, requester, &self.config.subject, body);
            let id = self.mailbox.send(credential, &message).await?;
            info!(to = %requester, message_id = %id, "Report sent");
            Ok(())
        })
    }
}

impl std::fmt::Debug for SurveyReportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurveyReportPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::gateway::{MessageHeaders, MessageRef};
    use std::sync::Mutex;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect()
    }

    struct FakeSheets {
        values: HashMap<String, Vec<Vec<String>>>,
    }

    impl SheetsGateway for FakeSheets {
        fn get_values<'a>(
            &'a self,
            _credential: &'a Credential,
            spreadsheet_id: &'a str,
            _range: &'a str,
        ) -> BoxFuture<'a, Result<Vec<Vec<String>>>> {
            Box::pin(async move {
                self.values.get(spreadsheet_id).cloned().ok_or_else(|| Error::Api {
                    operation: "sheets.values.get".into(),
                    status: 404,
                    message: "Requested entity was not found.".into(),
                })
            })
        }
    }

    #[derive(Default)]
    struct RecordingMailbox {
        sent: Mutex<Vec<OutgoingMessage>>,
        profile_lookups: Mutex<usize>,
    }

    impl MailboxGateway for RecordingMailbox {
        fn list_recent<'a>(
            &'a self,
            _credential: &'a Credential,
            _label: &'a str,
            _max_results: u32,
        ) -> BoxFuture<'a, Result<Vec<MessageRef>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn get<'a>(
            &'a self,
            _credential: &'a Credential,
            message_id: &'a str,
        ) -> BoxFuture<'a, Result<MessageHeaders>> {
            Box::pin(async move {
                Ok(MessageHeaders {
                    id: message_id.to_string(),
                    headers: Vec::new(),
                })
            })
        }

        fn sender_address<'a>(
            &'a self,
            _credential: &'a Credential,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                *self.profile_lookups.lock().unwrap() += 1;
                Ok("reports@example.com".to_string())
            })
        }

        fn send<'a>(
            &'a self,
            _credential: &'a Credential,
            message: &'a OutgoingMessage,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                self.sent.lock().unwrap().push(message.clone());
                Ok("sent-1".to_string())
            })
        }
    }

    struct FailingSummarizer;

    impl Summarizer for FailingSummarizer {
        fn summarize<'a>(
            &'a self,
            _sheet_name: &'a str,
            _summary: &'a SheetSummary,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async {
                Err(Error::Report {
                    message: "model unavailable".into(),
                })
            })
        }
    }

    fn survey() -> Vec<Vec<String>> {
        rows(&[
            &["Zaman damgası", "Genel Memnuniyet", "Temizlik", "Ek Yorumlar"],
            &["1", "Memnun", "Temiz", "Great doner"],
            &["2", "Çok Memnun", "Temiz", ""],
            &["3", "Memnun", "Ortalama", "Slow service"],
        ])
    }

    fn config(sheets: &[(&str, &str)]) -> ReportConfig {
        ReportConfig {
            spreadsheets: sheets
                .iter()
                .map(|(name, id)| Spreadsheet {
                    name: (*name).to_string(),
                    id: (*id).to_string(),
                })
                .collect(),
            ..ReportConfig::default()
        }
    }

    fn excluded() -> Vec<String> {
        ReportConfig::default().excluded_columns
    }

    #[test]
    fn test_tabulate_mode_and_comments() {
        let summary = tabulate(&survey(), "Ek Yorumlar", &excluded()).unwrap();

        assert_eq!(summary.responses, 3);
        assert_eq!(
            summary.columns,
            vec![
                ("Genel Memnuniyet".to_string(), "Memnun".to_string()),
                ("Temizlik".to_string(), "Temiz".to_string()),
            ]
        );
        assert_eq!(summary.comments, vec!["Great doner", "Slow service"]);
    }

    #[test]
    fn test_tabulate_tie_goes_to_first_seen() {
        let data = rows(&[&["Q"], &["b"], &["a"], &["a"], &["b"]]);
        let summary = tabulate(&data, "Ek Yorumlar", &[]).unwrap();
        assert_eq!(summary.columns, vec![("Q".to_string(), "b".to_string())]);
    }

    #[test]
    fn test_tabulate_ragged_rows_and_blank_columns() {
        let data = rows(&[&["Q1", "", "Q3"], &["x"], &["x", "ignored", "  "]]);
        let summary = tabulate(&data, "Ek Yorumlar", &[]).unwrap();
        assert_eq!(summary.columns, vec![("Q1".to_string(), "x".to_string())]);
    }

    #[test]
    fn test_tabulate_leaves_out_contact_columns() {
        let data = rows(&[
            &["Genel Memnuniyet", "İsim", "WhatsApp Telefon Numarasi", "EMAIL"],
            &["Memnun", "Ayşe", "+90 555 000 00 00", "ayse@example.com"],
            &["Memnun", "Mehmet", "+90 555 111 11 11", "mehmet@example.com"],
        ]);
        let summary = tabulate(&data, "Ek Yorumlar", &excluded()).unwrap();

        assert_eq!(
            summary.columns,
            vec![("Genel Memnuniyet".to_string(), "Memnun".to_string())]
        );
        let text = PlainTextSummarizer::render(&summary);
        assert!(!text.contains("ayse@example.com"));
        assert!(!text.contains("Ayşe"));
    }

    #[test]
    fn test_tabulate_no_data() {
        assert!(tabulate(&[], "Ek Yorumlar", &[]).is_none());
        assert!(tabulate(&rows(&[&["Q1", "Q2"]]), "Ek Yorumlar", &[]).is_none());
    }

    #[test]
    fn test_plain_text_rendering() {
        let summary = SheetSummary {
            columns: vec![("Temizlik".into(), "Temiz".into())],
            comments: vec!["Great doner".into()],
            responses: 2,
        };
        assert_eq!(
            PlainTextSummarizer::render(&summary),
            "Responses: 2\n- Temizlik: Temiz\n- Additional Comments:\n  * Great doner\n"
        );
    }

    #[tokio::test]
    async fn test_summarizer_gets_comments_through_summary() {
        let summary = tabulate(&survey(), "Ek Yorumlar", &excluded()).unwrap();
        let summarizer: Arc<dyn Summarizer> = Arc::new(PlainTextSummarizer);

        let text = summarizer.summarize("Puka Doner", &summary).await.unwrap();

        assert!(text.contains("- Genel Memnuniyet: Memnun"));
        assert!(text.contains("  * Great doner"));
        assert!(text.contains("  * Slow service"));
    }

    #[tokio::test]
    async fn test_report_sent_to_requester() {
        let sheets = Arc::new(FakeSheets {
            values: [("id-1".to_string(), survey())].into_iter().collect(),
        });
        let mailbox = Arc::new(RecordingMailbox::default());
        let pipeline =
            SurveyReportPipeline::new(sheets, mailbox.clone(), config(&[("Puka Doner", "id-1")]));

        pipeline
            .run(&Credential::new("token"), "a@b.com")
            .await
            .unwrap();

        let sent = mailbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "reports@example.com");
        assert_eq!(sent[0].to, "a@b.com");
        assert_eq!(sent[0].subject, "Your Requested Report");
        assert!(sent[0].body.starts_with("\nReport for Puka Doner:\nResponses: 3\n"));
        assert!(sent[0].body.contains("- Genel Memnuniyet: Memnun\n"));
        assert!(!sent[0].body.contains("Zaman damgası"));
    }

    #[tokio::test]
    async fn test_sender_resolved_once_or_taken_from_config() {
        let sheets = Arc::new(FakeSheets {
            values: HashMap::new(),
        });
        let mailbox = Arc::new(RecordingMailbox::default());
        let pipeline = SurveyReportPipeline::new(sheets.clone(), mailbox.clone(), config(&[]));
        let credential = Credential::new("token");

        pipeline.run(&credential, "a@b.com").await.unwrap();
        pipeline.run(&credential, "c@d.com").await.unwrap();
        assert_eq!(*mailbox.profile_lookups.lock().unwrap(), 1);

        let configured = ReportConfig {
            sender: Some("survey-bot@example.com".into()),
            ..config(&[])
        };
        let mailbox = Arc::new(RecordingMailbox::default());
        SurveyReportPipeline::new(sheets, mailbox.clone(), configured)
            .run(&credential, "a@b.com")
            .await
            .unwrap();

        assert_eq!(*mailbox.profile_lookups.lock().unwrap(), 0);
        assert_eq!(mailbox.sent.lock().unwrap()[0].from, "survey-bot@example.com");
    }

    #[tokio::test]
    async fn test_summarizer_failure_yields_placeholder() {
        let sheets = Arc::new(FakeSheets {
            values: [("id-1".to_string(), survey())].into_iter().collect(),
        });
        let mailbox = Arc::new(RecordingMailbox::default());
        let pipeline = SurveyReportPipeline::new(sheets, mailbox, config(&[("Puka Doner", "id-1")]))
            .with_summarizer(Arc::new(FailingSummarizer));

        let body = pipeline.compose(&Credential::new("token")).await;
        assert_eq!(
            body,
            format!("\nReport for Puka Doner:\n{REPORT_ERROR_PLACEHOLDER}")
        );
    }

    #[tokio::test]
    async fn test_sections_skip_empty_and_degrade_failed_sheets() {
        let sheets = Arc::new(FakeSheets {
            values: [
                ("empty".to_string(), Vec::new()),
                ("full".to_string(), survey()),
            ]
            .into_iter()
            .collect(),
        });
        let mailbox = Arc::new(RecordingMailbox::default());
        let pipeline = SurveyReportPipeline::new(
            sheets,
            mailbox,
            config(&[("Empty", "empty"), ("Missing", "missing"), ("Full", "full")]),
        );

        let body = pipeline.compose(&Credential::new("token")).await;

        assert!(!body.contains("Report for Empty"));
        assert!(body.starts_with(&format!("\nReport for Missing:\n{REPORT_ERROR_PLACEHOLDER}")));
        assert!(body.contains("\nReport for Full:\nResponses: 3"));
    }

    #[tokio::test]
    async fn test_no_data_message() {
        let sheets = Arc::new(FakeSheets {
            values: HashMap::new(),
        });
        let mailbox = Arc::new(RecordingMailbox::default());
        let pipeline = SurveyReportPipeline::new(sheets, mailbox, config(&[]));

        assert_eq!(pipeline.compose(&Credential::new("t")).await, NO_DATA_MESSAGE);
    }
}
