//! Gmail REST v1 implementation of [`MailboxGateway`].

use crate::config::TimeoutConfig;
use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::gateway::{Header, MailboxGateway, MessageHeaders, MessageRef, OutgoingMessage};
use crate::http;
use futures::future::BoxFuture;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Default API root for the authenticated user.
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<ListedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedMessage {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Deserialize)]
struct MessageResponse {
    id: String,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<RawHeader>,
}

#[derive(Deserialize)]
struct RawHeader {
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    email_address: String,
}

/// Mailbox gateway backed by the Gmail REST API.
#[derive(Debug, Clone)]
pub struct GmailGateway {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl GmailGateway {
    /// Creates a gateway for the authenticated user's mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be constructed.
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self> {
        Ok(Self {
            http: http::build_client(timeouts)?,
            base_url: parse_base(GMAIL_API_BASE)?,
            timeout: timeouts.http,
        })
    }

    /// Points the gateway at a different API root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `base_url` is not an absolute URL.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = parse_base(base_url)?;
        Ok(self)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidConfig {
                message: format!("Gmail base URL '{}' cannot take a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    #[instrument(name = "GmailGateway::list_recent", skip(self, credential))]
    async fn list_messages(
        &self,
        credential: &Credential,
        label: &str,
        max_results: u32,
    ) -> Result<Vec<MessageRef>> {
        let max_results = max_results.to_string();
        let request = self
            .http
            .get(self.endpoint(&["messages"])?)
            .bearer_auth(credential.access_token())
            .query(&[("labelIds", label), ("maxResults", max_results.as_str())]);

        let response: ListResponse = http::send_json("gmail.list", request, self.timeout).await?;
        debug!(count = response.messages.len(), "Listed messages");

        Ok(response
            .messages
            .into_iter()
            .map(|m| MessageRef {
                id: m.id,
                thread_id: m.thread_id,
            })
            .collect())
    }

    #[instrument(name = "GmailGateway::get", skip(self, credential))]
    async fn get_message(&self, credential: &Credential, message_id: &str) -> Result<MessageHeaders> {
        let request = self
            .http
            .get(self.endpoint(&["messages", message_id])?)
            .bearer_auth(credential.access_token())
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "Subject"),
                ("metadataHeaders", "From"),
            ]);

        let response: MessageResponse = http::send_json("gmail.get", request, self.timeout).await?;

        Ok(MessageHeaders {
            id: response.id,
            headers: response
                .payload
                .map(|p| p.headers)
                .unwrap_or_default()
                .into_iter()
                .map(|h| Header::new(h.name, h.value))
                .collect(),
        })
    }

    #[instrument(name = "GmailGateway::profile", skip_all)]
    async fn profile_address(&self, credential: &Credential) -> Result<String> {
        let request = self
            .http
            .get(self.endpoint(&["profile"])?)
            .bearer_auth(credential.access_token());

        let response: ProfileResponse =
            http::send_json("gmail.profile", request, self.timeout).await?;
        debug!(address = %response.email_address, "Resolved account address");
        Ok(response.email_address)
    }

    #[instrument(name = "GmailGateway::send", skip(self, credential, message), fields(to = %message.to))]
    async fn send_message(&self, credential: &Credential, message: &OutgoingMessage) -> Result<String> {
        let raw = message.to_raw()?;
        let request = self
            .http
            .post(self.endpoint(&["messages", "send"])?)
            .bearer_auth(credential.access_token())
            .json(&serde_json::json!({ "raw": raw }));

        let response: SendResponse = http::send_json("gmail.send", request, self.timeout).await?;
        info!(message_id = %response.id, "Message sent");
        Ok(response.id)
    }
}

fn parse_base(base_url: &str) -> Result<Url> {
    Url::parse(base_url).map_err(|e| Error::InvalidConfig {
        message: format!("invalid API base URL '{base_url}': {e}"),
    })
}

impl MailboxGateway for GmailGateway {
    fn list_recent<'a>(
        &'a self,
        credential: &'a Credential,
        label: &'a str,
        max_results: u32,
    ) -> BoxFuture<'a, Result<Vec<MessageRef>>> {
        Box::pin(self.list_messages(credential, label, max_results))
    }

    fn get<'a>(
        &'a self,
        credential: &'a Credential,
        message_id: &'a str,
    ) -> BoxFuture<'a, Result<MessageHeaders>> {
        Box::pin(self.get_message(credential, message_id))
    }

    fn sender_address<'a>(&'a self, credential: &'a Credential) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.profile_address(credential))
    }

    fn send<'a>(
        &'a self,
        credential: &'a Credential,
        message: &'a OutgoingMessage,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.send_message(credential, message))
    }
}
