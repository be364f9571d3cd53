//! Google Sheets REST v4 implementation of [`SheetsGateway`].

use crate::config::TimeoutConfig;
use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::gateway::SheetsGateway;
use crate::http;
use futures::future::BoxFuture;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default Sheets API root.
pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Spreadsheet gateway backed by the Sheets REST API.
#[derive(Debug, Clone)]
pub struct GoogleSheetsGateway {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl GoogleSheetsGateway {
    /// Creates a gateway.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be constructed.
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self> {
        Ok(Self {
            http: http::build_client(timeouts)?,
            base_url: Url::parse(SHEETS_API_BASE).map_err(|e| Error::InvalidConfig {
                message: format!("invalid Sheets base URL: {e}"),
            })?,
            timeout: timeouts.http,
        })
    }

    /// Points the gateway at a different API root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `base_url` is not an absolute URL.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = Url::parse(base_url).map_err(|e| Error::InvalidConfig {
            message: format!("invalid API base URL '{base_url}': {e}"),
        })?;
        Ok(self)
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidConfig {
                message: format!("Sheets base URL '{}' cannot take a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(["spreadsheets", spreadsheet_id, "values", range]);
        Ok(url)
    }

    #[instrument(name = "GoogleSheetsGateway::get_values", skip(self, credential))]
    async fn read_values(
        &self,
        credential: &Credential,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>> {
        let request = self
            .http
            .get(self.values_url(spreadsheet_id, range)?)
            .bearer_auth(credential.access_token());

        let response: ValueRange = http::send_json("sheets.values.get", request, self.timeout).await?;
        debug!(rows = response.values.len(), "Read spreadsheet values");

        Ok(response
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }
}

/// Formatted values arrive as strings; anything else is rendered as JSON text.
fn cell_text(cell: serde_json::Value) -> String {
    match cell {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl SheetsGateway for GoogleSheetsGateway {
    fn get_values<'a>(
        &'a self,
        credential: &'a Credential,
        spreadsheet_id: &'a str,
        range: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Vec<String>>>> {
        Box::pin(self.read_values(credential, spreadsheet_id, range))
    }
}
