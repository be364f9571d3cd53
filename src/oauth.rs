//! Google OAuth 2.0 token endpoint client.
//!
//! [`GoogleOAuth`] implements [`Authorizer`] with two grants:
//!
//! - **Refresh** (`grant_type=refresh_token`) for an expired access token.
//!   If the server does not rotate the refresh token, the old one is kept.
//! - **Installed-app authorization code** with a loopback redirect: a local
//!   listener is bound on `127.0.0.1`, the consent URL is logged and opened in
//!   a browser, and the code delivered to the redirect is exchanged for tokens.
//!   Each flow carries a random `state` and a PKCE (RFC 7636, S256) verifier.
//!
//! The OAuth client itself comes from Google's client-secret JSON, see
//! [`ClientSecrets::from_file`].

use crate::config::TimeoutConfig;
use crate::credential::{Authorizer, Credential};
use crate::error::{Error, Result};
use crate::http;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use rand::RngCore;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};

/// Google's consent page.
pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// Google's token endpoint.
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const MAX_REQUEST_HEAD: usize = 8 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Client secrets
// ─────────────────────────────────────────────────────────────────────────────

/// An OAuth client registration, read from Google's client-secret JSON.
#[derive(Clone)]
pub struct ClientSecrets {
    /// OAuth client id.
    pub client_id: String,
    client_secret: SecretString,
    /// Consent page URL.
    pub auth_uri: String,
    /// Token endpoint URL.
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: String,
    #[serde(default)]
    client_secret: String,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

impl ClientSecrets {
    /// Creates client secrets pointing at Google's endpoints.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            auth_uri: GOOGLE_AUTH_URI.to_string(),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
        }
    }

    /// Reads a client-secret file with an `installed` or `web` section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientSecretsMissing`] if the file does not exist and
    /// [`Error::ClientSecretsMalformed`] if it cannot be read or interpreted.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ClientSecretsMissing {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => {
                return Err(Error::ClientSecretsMalformed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };

        Self::parse(&content).map_err(|message| Error::ClientSecretsMalformed {
            path: path.to_path_buf(),
            message,
        })
    }

    fn parse(json: &str) -> std::result::Result<Self, String> {
        let file: ClientSecretsFile = serde_json::from_str(json).map_err(|e| e.to_string())?;
        let section = file
            .installed
            .or(file.web)
            .ok_or_else(|| "expected an \"installed\" or \"web\" section".to_string())?;

        if section.client_id.trim().is_empty() {
            return Err("client_id is empty".into());
        }

        Ok(Self {
            client_id: section.client_id,
            client_secret: SecretString::from(section.client_secret),
            auth_uri: section.auth_uri.unwrap_or_else(|| GOOGLE_AUTH_URI.into()),
            token_uri: section.token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URI.into()),
        })
    }

    /// Returns the client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }

    /// Builds the consent URL for an offline (refreshable) grant.
    ///
    /// `code_challenge` is the S256 PKCE challenge whose verifier is later
    /// sent with the code exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if `auth_uri` is not a valid URL.
    pub fn authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> Result<Url> {
        let scope = scopes.join(" ");
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| Error::Authorization {
            message: format!("invalid auth_uri '{}': {e}", self.auth_uri),
        })
    }
}

impl std::fmt::Debug for ClientSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecrets")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token endpoint
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// The production [`Authorizer`], talking to Google's OAuth endpoints.
#[derive(Debug, Clone)]
pub struct GoogleOAuth {
    http: reqwest::Client,
    timeout: Duration,
}

impl GoogleOAuth {
    /// Creates a client with the given request timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be constructed.
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self> {
        Ok(Self {
            http: http::build_client(timeouts)?,
            timeout: timeouts.http,
        })
    }

    async fn token_request(&self, token_uri: &str, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let request = self.http.post(token_uri).form(params);
        let (status, body) = http::send("oauth.token", request, self.timeout).await?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_slice::<TokenErrorResponse>(&body) {
                return Err(Error::TokenGrant {
                    error: err.error,
                    description: err.error_description,
                });
            }
            return Err(Error::Api {
                operation: "oauth.token".into(),
                status: status.as_u16(),
                message: http::api_error_message(&body),
            });
        }

        http::decode("oauth.token", &body)
    }

    #[instrument(name = "GoogleOAuth::refresh", skip_all)]
    async fn refresh_grant(&self, credential: &Credential) -> Result<Credential> {
        let refresh_token = credential.refresh_token().ok_or(Error::NoRefreshToken)?;
        let client_id = credential.client_id().ok_or_else(|| Error::Authorization {
            message: "credential carries no client_id to refresh with".into(),
        })?;
        let token_uri = credential.token_uri().unwrap_or(GOOGLE_TOKEN_URI);

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];
        if let Some(secret) = credential.client_secret() {
            params.push(("client_secret", secret));
        }

        let response = self.token_request(token_uri, &params).await?;
        debug!(
            rotated = response.refresh_token.is_some(),
            expires_in = ?response.expires_in,
            "Token refreshed"
        );

        Ok(credential.renewed(
            response.access_token,
            expiry_from(response.expires_in),
            response.refresh_token,
        ))
    }

    #[instrument(name = "GoogleOAuth::authorize", skip_all, fields(client_id = %secrets.client_id))]
    async fn authorization_code_grant(
        &self,
        secrets: &ClientSecrets,
        scopes: &[String],
    ) -> Result<Credential> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|source| Error::RedirectListener { source })?;
        let port = listener
            .local_addr()
            .map_err(|source| Error::RedirectListener { source })?
            .port();

        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let state = csrf_state();
        let pkce = Pkce::generate();
        let url = secrets.authorization_url(scopes, &redirect_uri, &state, &pkce.challenge)?;

        info!(url = %url, "Open this URL in a browser to authorize the bot");
        if let Err(e) = opener::open(url.as_str()) {
            warn!(error = %e, "Could not open a browser, visit the URL manually");
        }

        let code = await_redirect(&listener, &state).await?;
        debug!("Authorization code received, exchanging");

        let response = self
            .token_request(
                &secrets.token_uri,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("client_id", secrets.client_id.as_str()),
                    ("client_secret", secrets.client_secret()),
                    ("redirect_uri", redirect_uri.as_str()),
                    ("code_verifier", pkce.verifier.as_str()),
                ],
            )
            .await?;

        let granted_scopes: Vec<String> = match &response.scope {
            Some(scope) => scope.split_whitespace().map(ToString::to_string).collect(),
            None => scopes.to_vec(),
        };

        let mut credential = Credential::new(response.access_token)
            .with_client(secrets.client_id.clone(), secrets.client_secret())
            .with_token_uri(secrets.token_uri.clone())
            .with_scopes(granted_scopes);
        if let Some(refresh_token) = response.refresh_token {
            credential = credential.with_refresh_token(refresh_token);
        } else {
            warn!("Grant did not include a refresh token");
        }
        if let Some(expiry) = expiry_from(response.expires_in) {
            credential = credential.with_expiry(expiry);
        }

        Ok(credential)
    }
}

impl Authorizer for GoogleOAuth {
    fn refresh<'a>(&'a self, credential: &'a Credential) -> BoxFuture<'a, Result<Credential>> {
        Box::pin(self.refresh_grant(credential))
    }

    fn authorize<'a>(
        &'a self,
        secrets: &'a ClientSecrets,
        scopes: &'a [String],
    ) -> BoxFuture<'a, Result<Credential>> {
        Box::pin(self.authorization_code_grant(secrets, scopes))
    }
}

fn expiry_from(expires_in: Option<i64>) -> Option<chrono::DateTime<Utc>> {
    expires_in.map(|secs| Utc::now() + ChronoDuration::seconds(secs))
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Unguessable per-flow value echoed back by the consent page.
fn csrf_state() -> String {
    random_token()
}

/// PKCE verifier and its S256 challenge.
struct Pkce {
    verifier: String,
    challenge: String,
}

impl Pkce {
    fn generate() -> Self {
        Self::from_verifier(random_token())
    }

    fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loopback redirect
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code { code: String, state: Option<String> },
    Denied(String),
}

/// Parses the request line of a redirect, e.g. `GET /?code=..&state=.. HTTP/1.1`.
///
/// Returns `None` for requests that are not an OAuth callback (favicon etc).
fn parse_callback(request_line: &str) -> Option<Callback> {
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    let url = Url::parse(&format!("http://127.0.0.1{target}")).ok()?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (_, Some(error)) => Some(Callback::Denied(error)),
        (Some(code), None) => Some(Callback::Code { code, state }),
        (None, None) => None,
    }
}

async fn await_redirect(listener: &TcpListener, expected_state: &str) -> Result<String> {
    loop {
        let (mut stream, peer) = listener
            .accept()
            .await
            .map_err(|source| Error::RedirectListener { source })?;
        debug!(%peer, "Redirect connection");

        let request_line = match read_request_line(&mut stream).await {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "Dropping unreadable redirect request");
                continue;
            }
        };

        match parse_callback(&request_line) {
            Some(Callback::Code { code, state }) => {
                if state.as_deref() != Some(expected_state) {
                    respond(&mut stream, "400 Bad Request", "Authorization state mismatch.").await;
                    return Err(Error::Authorization {
                        message: "redirect state did not match the request".into(),
                    });
                }
                respond(
                    &mut stream,
                    "200 OK",
                    "Authorization complete. You may close this window.",
                )
                .await;
                return Ok(code);
            }
            Some(Callback::Denied(error)) => {
                respond(&mut stream, "200 OK", "Authorization was denied.").await;
                return Err(Error::Authorization {
                    message: format!("consent denied: {error}"),
                });
            }
            None => respond(&mut stream, "404 Not Found", "Not found.").await,
        }
    }
}

async fn read_request_line(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(2).any(|w| w == b"\r\n") || buf.len() >= MAX_REQUEST_HEAD {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buf);
    Ok(head.lines().next().unwrap_or_default().to_string())
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "Failed to answer redirect request");
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_installed_client_secrets() {
        let json = r#"{"installed": {
            "client_id": "123.apps.googleusercontent.com",
            "project_id": "report-bot",
            "client_secret": "GOCSPX-secret",
            "redirect_uris": ["http://localhost"]
        }}"#;

        let secrets = ClientSecrets::parse(json).unwrap();
        assert_eq!(secrets.client_id, "123.apps.googleusercontent.com");
        assert_eq!(secrets.client_secret(), "GOCSPX-secret");
        assert_eq!(secrets.auth_uri, GOOGLE_AUTH_URI);
        assert_eq!(secrets.token_uri, GOOGLE_TOKEN_URI);
    }

    #[test]
    fn test_parse_web_client_secrets() {
        let json = r#"{"web": {"client_id": "web-client", "client_secret": "s",
            "token_uri": "https://example.test/token"}}"#;
        let secrets = ClientSecrets::parse(json).unwrap();
        assert_eq!(secrets.client_id, "web-client");
        assert_eq!(secrets.token_uri, "https://example.test/token");
    }

    #[test]
    fn test_parse_rejects_unknown_shape() {
        assert!(ClientSecrets::parse(r#"{"service_account": {}}"#).is_err());
        assert!(ClientSecrets::parse("not json").is_err());
    }

    #[test]
    fn test_from_file_missing() {
        let err = ClientSecrets::from_file(Path::new("/nonexistent/credentials.json")).unwrap_err();
        assert!(matches!(err, Error::ClientSecretsMissing { .. }));
    }

    #[test]
    fn test_authorization_url() {
        let secrets = ClientSecrets::new("test_client", "secret");
        let scopes = vec![
            "https://www.googleapis.com/auth/gmail.modify".to_string(),
            "https://www.googleapis.com/auth/spreadsheets".to_string(),
        ];

        let url = secrets
            .authorization_url(&scopes, "http://127.0.0.1:8080/", "xyz", "chal")
            .unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert!(url.as_str().starts_with(GOOGLE_AUTH_URI));
        assert_eq!(query["client_id"], "test_client");
        assert_eq!(query["redirect_uri"], "http://127.0.0.1:8080/");
        assert_eq!(query["state"], "xyz");
        assert_eq!(query["access_type"], "offline");
        assert_eq!(query["prompt"], "consent");
        assert_eq!(query["scope"], scopes.join(" "));
        assert_eq!(query["code_challenge"], "chal");
        assert_eq!(query["code_challenge_method"], "S256");
    }

    #[test]
    fn test_parse_callback() {
        assert_eq!(
            parse_callback("GET /?state=abc&code=4%2F0Ad&scope=x HTTP/1.1"),
            Some(Callback::Code {
                code: "4/0Ad".into(),
                state: Some("abc".into())
            })
        );
        assert_eq!(
            parse_callback("GET /?error=access_denied&state=abc HTTP/1.1"),
            Some(Callback::Denied("access_denied".into()))
        );
        assert_eq!(parse_callback("GET /favicon.ico HTTP/1.1"), None);
        assert_eq!(parse_callback("POST /?code=x HTTP/1.1"), None);
        assert_eq!(parse_callback(""), None);
    }

    #[test]
    fn test_secrets_not_in_debug() {
        let secrets = ClientSecrets::new("client", "very-secret");
        let debug_str = format!("{secrets:?}");
        assert!(!debug_str.contains("very-secret"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_csrf_state_is_random() {
        let first = csrf_state();
        let second = csrf_state();

        // 32 bytes, unpadded base64url
        assert_eq!(first.len(), 43);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(first, second);
    }

    #[test]
    fn test_pkce_challenge_matches_rfc7636() {
        let pkce = Pkce::from_verifier("dBjftJeZ4CVP-mJ92K27uhbUJU1p1r_wW1gFWFOEjXk".into());
        assert_eq!(pkce.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_pkce_verifiers_unique() {
        let first = Pkce::generate();
        let second = Pkce::generate();
        assert_eq!(first.verifier.len(), 43);
        assert_ne!(first.verifier, second.verifier);
        assert_ne!(first.challenge, second.challenge);
    }

    #[tokio::test]
    async fn test_redirect_delivers_code() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let browser = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /?code=the-code&state=s1 HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut reply = String::new();
            stream.read_to_string(&mut reply).await.unwrap();
            reply
        });

        let code = await_redirect(&listener, "s1").await.unwrap();
        assert_eq!(code, "the-code");
        assert!(browser.await.unwrap().starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn test_redirect_rejects_state_mismatch() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /?code=c&state=forged HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let err = await_redirect(&listener, "expected").await.unwrap_err();
        assert!(matches!(err, Error::Authorization { .. }));
    }
}
