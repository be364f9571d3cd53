//! Remote mailbox and spreadsheet seams.
//!
//! The bot only ever talks to Google through [`MailboxGateway`] and
//! [`SheetsGateway`]. [`GmailGateway`](crate::gmail::GmailGateway) and
//! [`GoogleSheetsGateway`](crate::sheets::GoogleSheetsGateway) are the REST
//! implementations; tests substitute in-memory fakes.

use crate::credential::Credential;
use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use futures::future::BoxFuture;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::Message;

/// A message reference as returned by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    /// Message id.
    pub id: String,
    /// Thread the message belongs to.
    pub thread_id: Option<String>,
}

impl MessageRef {
    /// Creates a reference to the given message id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
        }
    }
}

/// A single raw header as delivered by the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name, e.g. `Subject`.
    pub name: String,
    /// Undecoded header value.
    pub value: String,
}

impl Header {
    /// Creates a header.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The headers of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    /// Message id.
    pub id: String,
    /// Headers in delivery order.
    pub headers: Vec<Header>,
}

/// The parts of a message the trigger evaluator looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    /// Message id.
    pub id: String,
    /// Decoded `Subject` header, if present.
    pub subject: Option<String>,
    /// Decoded `From` header, if present. Free-form, e.g. `Jane <jane@x.com>`.
    pub sender: Option<String>,
}

impl InboundMessage {
    /// Creates a message with the given id and no headers.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the raw `From` value.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

/// A plain-text email to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Sender address, normally the authenticated account.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

impl OutgoingMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Renders the message as RFC 5322 bytes.
    ///
    /// The transfer encoding is chosen from the body, so long or non-ASCII
    /// lines are quoted-printable or base64 encoded. Non-ASCII subjects are
    /// RFC 2047 encoded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if either address cannot be parsed.
    pub fn to_rfc5322(&self) -> Result<Vec<u8>> {
        let from: Mailbox = parse_mailbox("from", &self.from)?;
        let to: Mailbox = parse_mailbox("to", &self.to)?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(self.body.clone())
            .map_err(|e| Error::InvalidMessage {
                message: e.to_string(),
            })?;

        Ok(message.formatted())
    }

    /// Base64url encoding of [`to_rfc5322`](Self::to_rfc5322), as Gmail's `raw`
    /// field expects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the message cannot be built.
    pub fn to_raw(&self) -> Result<String> {
        Ok(URL_SAFE.encode(self.to_rfc5322()?))
    }
}

fn parse_mailbox(field: &str, address: &str) -> Result<Mailbox> {
    address.trim().parse().map_err(|e| Error::InvalidMessage {
        message: format!("invalid {field} address '{address}': {e}"),
    })
}

/// Remote mailbox operations.
pub trait MailboxGateway: Send + Sync {
    /// Lists the `max_results` most recent messages under `label`.
    fn list_recent<'a>(
        &'a self,
        credential: &'a Credential,
        label: &'a str,
        max_results: u32,
    ) -> BoxFuture<'a, Result<Vec<MessageRef>>>;

    /// Fetches the headers of one message.
    fn get<'a>(
        &'a self,
        credential: &'a Credential,
        message_id: &'a str,
    ) -> BoxFuture<'a, Result<MessageHeaders>>;

    /// Returns the address of the authenticated account.
    fn sender_address<'a>(&'a self, credential: &'a Credential) -> BoxFuture<'a, Result<String>>;

    /// Sends a message and returns the id assigned to it.
    fn send<'a>(
        &'a self,
        credential: &'a Credential,
        message: &'a OutgoingMessage,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Remote spreadsheet operations.
pub trait SheetsGateway: Send + Sync {
    /// Reads a range of cell values as rows of strings.
    ///
    /// Trailing empty cells and rows are omitted by the service, so rows may be
    /// ragged.
    fn get_values<'a>(
        &'a self,
        credential: &'a Credential,
        spreadsheet_id: &'a str,
        range: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Vec<String>>>>;
}
