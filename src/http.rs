//! Internal HTTP plumbing shared by the Google API clients.
//!
//! Maps transport failures onto [`Error::Http`] / [`Error::RequestTimeout`],
//! non-2xx responses onto [`Error::Api`] and undecodable bodies onto
//! [`Error::MalformedResponse`].

use crate::config::TimeoutConfig;
use crate::error::{Error, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an unparseable error body carried into [`Error::Api`].
const MAX_ERROR_BODY: usize = 256;

/// Creates the HTTP client used for every Google API call.
pub(crate) fn build_client(timeouts: &TimeoutConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeouts.http)
        .connect_timeout(timeouts.http)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|source| Error::Http {
            operation: "http.client".into(),
            source,
        })
}

/// Sends a request and returns the raw status and body.
#[instrument(name = "http::send", skip(request, timeout), fields(status = tracing::field::Empty))]
pub(crate) async fn send(
    operation: &str,
    request: RequestBuilder,
    timeout: Duration,
) -> Result<(StatusCode, Vec<u8>)> {
    let response = request
        .send()
        .await
        .map_err(|source| transport_error(operation, timeout, source))?;

    let status = response.status();
    tracing::Span::current().record("status", status.as_u16());

    let body = response
        .bytes()
        .await
        .map_err(|source| transport_error(operation, timeout, source))?;

    debug!(bytes = body.len(), "Received response");
    Ok((status, body.to_vec()))
}

/// Sends a request and decodes a successful JSON response.
pub(crate) async fn send_json<T: DeserializeOwned>(
    operation: &str,
    request: RequestBuilder,
    timeout: Duration,
) -> Result<T> {
    let (status, body) = send(operation, request, timeout).await?;

    if !status.is_success() {
        return Err(Error::Api {
            operation: operation.to_string(),
            status: status.as_u16(),
            message: api_error_message(&body),
        });
    }

    decode(operation, &body)
}

/// Decodes a JSON body.
pub(crate) fn decode<T: DeserializeOwned>(operation: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|source| Error::MalformedResponse {
        operation: operation.to_string(),
        source,
    })
}

fn transport_error(operation: &str, timeout: Duration, source: reqwest::Error) -> Error {
    if source.is_timeout() {
        Error::RequestTimeout {
            operation: operation.to_string(),
            timeout,
        }
    } else {
        Error::Http {
            operation: operation.to_string(),
            source,
        }
    }
}

/// Extracts a readable message from a Google error body.
///
/// Handles both the JSON API shape (`{"error": {"message": ...}}`) and the
/// OAuth shape (`{"error": "...", "error_description": "..."}`).
pub(crate) fn api_error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        match value.get("error") {
            Some(serde_json::Value::Object(error)) => {
                if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
                    return message.to_string();
                }
            }
            Some(serde_json::Value::String(code)) => {
                return match value.get("error_description").and_then(|d| d.as_str()) {
                    Some(description) => format!("{code}: {description}"),
                    None => code.clone(),
                };
            }
            _ => {}
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "empty response body".to_string();
    }
    text.chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_api_error_message() {
        let body = br#"{"error": {"code": 404, "message": "Requested entity was not found.", "status": "NOT_FOUND"}}"#;
        assert_eq!(api_error_message(body), "Requested entity was not found.");
    }

    #[test]
    fn test_oauth_error_message() {
        let body = br#"{"error": "invalid_grant", "error_description": "Bad Request"}"#;
        assert_eq!(api_error_message(body), "invalid_grant: Bad Request");
    }

    #[test]
    fn test_plain_text_error_message_is_truncated() {
        let body = "x".repeat(1000);
        assert_eq!(api_error_message(body.as_bytes()).len(), MAX_ERROR_BODY);
        assert_eq!(api_error_message(b"  "), "empty response body");
    }

    #[test]
    fn test_decode_reports_operation() {
        let err = decode::<serde_json::Value>("gmail.list", b"<html>").unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { ref operation, .. } if operation == "gmail.list"));
    }

    #[test]
    fn test_build_client() {
        assert!(build_client(&TimeoutConfig::default()).is_ok());
    }
}
