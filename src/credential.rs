//! OAuth credential lifecycle.
//!
//! [`CredentialStore::obtain_credential`] is the single entry point: it loads
//! the persisted token, refreshes it when expired and falls back to an
//! interactive re-authorization when refresh is impossible or rejected.
//! Every refreshed or newly granted credential is persisted before it is
//! returned.
//!
//! Persistence and the token endpoint are behind the [`TokenStore`] and
//! [`Authorizer`] traits so the control flow can be exercised without
//! touching disk or network:
//!
//! ```
//! use report_bot::credential::{Credential, MemoryTokenStore, TokenStore};
//!
//! let store = MemoryTokenStore::new();
//! store.save(&Credential::new("ya29.token")).unwrap();
//! assert_eq!(store.load().unwrap().unwrap().access_token(), "ya29.token");
//! ```

use crate::config::{BotConfig, DEFAULT_SCOPES};
use crate::error::{Error, Result};
use crate::oauth::ClientSecrets;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Access tokens this close to expiry are treated as already expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// An OAuth token bundle used to call Google APIs.
///
/// Secrets are held as [`SecretString`] and redacted from `Debug` output.
#[derive(Clone)]
pub struct Credential {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    expiry: Option<DateTime<Utc>>,
    token_uri: Option<String>,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    scopes: Vec<String>,
    /// Fields of the persisted document this crate does not interpret.
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Credential {
    /// Creates a credential holding only an access token (no expiry).
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            expiry: None,
            token_uri: None,
            client_id: None,
            client_secret: None,
            scopes: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Sets the access token expiry.
    #[must_use]
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(refresh_token.into()));
        self
    }

    /// Sets the OAuth client used to refresh this credential.
    #[must_use]
    pub fn with_client(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(SecretString::from(client_secret.into()));
        self
    }

    /// Sets the token endpoint used to refresh this credential.
    #[must_use]
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = Some(token_uri.into());
        self
    }

    /// Sets the granted scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Returns a copy carrying a new access token and expiry.
    ///
    /// The refresh token is replaced only when the server rotated it.
    #[must_use]
    pub fn renewed(
        &self,
        access_token: impl Into<String>,
        expiry: Option<DateTime<Utc>>,
        rotated_refresh_token: Option<String>,
    ) -> Self {
        let mut renewed = self.clone();
        renewed.access_token = SecretString::from(access_token.into());
        renewed.expiry = expiry;
        if let Some(refresh_token) = rotated_refresh_token {
            renewed.refresh_token = Some(SecretString::from(refresh_token));
        }
        renewed
    }

    /// Returns the bearer token for API calls.
    #[must_use]
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    /// Returns the refresh token, if any.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(ExposeSecret::expose_secret)
    }

    /// Returns the access token expiry, if known.
    #[must_use]
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// Returns the token endpoint recorded with this credential.
    #[must_use]
    pub fn token_uri(&self) -> Option<&str> {
        self.token_uri.as_deref()
    }

    /// Returns the OAuth client id recorded with this credential.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Returns the OAuth client secret recorded with this credential.
    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_ref().map(ExposeSecret::expose_secret)
    }

    /// Returns the granted scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Returns `true` if the access token must be renewed before use.
    ///
    /// An empty access token counts as expired. A missing expiry does not.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        if self.access_token().is_empty() {
            return true;
        }
        self.expiry
            .is_some_and(|exp| Utc::now() + ChronoDuration::seconds(EXPIRY_SKEW_SECS) >= exp)
    }

    /// Parses a persisted credential document.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the document is not a token object.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<TokenDocument>(json).map(Self::from)
    }

    /// Serializes the credential to the persisted document format.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&TokenDocument::from(self))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiry", &self.expiry)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// On-disk shape of a credential (Google's authorized-user JSON).
#[derive(Serialize, Deserialize)]
struct TokenDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl From<TokenDocument> for Credential {
    fn from(doc: TokenDocument) -> Self {
        Self {
            access_token: SecretString::from(doc.token.unwrap_or_default()),
            refresh_token: doc.refresh_token.map(SecretString::from),
            expiry: doc.expiry,
            token_uri: doc.token_uri,
            client_id: doc.client_id,
            client_secret: doc.client_secret.map(SecretString::from),
            scopes: doc.scopes,
            extra: doc.extra,
        }
    }
}

impl From<&Credential> for TokenDocument {
    fn from(credential: &Credential) -> Self {
        Self {
            token: Some(credential.access_token().to_string()),
            refresh_token: credential.refresh_token().map(ToString::to_string),
            token_uri: credential.token_uri.clone(),
            client_id: credential.client_id.clone(),
            client_secret: credential.client_secret().map(ToString::to_string),
            scopes: credential.scopes.clone(),
            expiry: credential.expiry,
            extra: credential.extra.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Storage for the persisted credential.
pub trait TokenStore: Send + Sync {
    /// Loads the persisted credential, `None` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored credential exists but cannot be read.
    fn load(&self) -> Result<Option<Credential>>;

    /// Replaces the persisted credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential cannot be written.
    fn save(&self, credential: &Credential) -> Result<()>;
}

/// Credential persisted as a JSON file, overwritten wholesale on save.
///
/// On Unix the file is restricted to `0600`.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Creates a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Credential>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(Error::TokenStore {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let credential = Credential::from_json(&content).map_err(|source| Error::TokenParse {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), expiry = ?credential.expiry(), "Loaded credential");
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let content = credential.to_json().map_err(|source| Error::TokenParse {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| Error::TokenStore {
                path: self.path.clone(),
                source,
            })?;
        }

        std::fs::write(&self.path, content).map_err(|source| Error::TokenStore {
            path: self.path.clone(),
            source,
        })?;
        restrict_permissions(&self.path)?;

        debug!(path = %self.path.display(), "Saved credential");
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|source| {
        Error::TokenStore {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// In-memory credential storage.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    credential: Mutex<Option<Credential>>,
    saves: Mutex<usize>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `credential`.
    #[must_use]
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
            saves: Mutex::new(0),
        }
    }

    /// Number of times [`TokenStore::save`] has been called.
    #[must_use]
    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(self
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        *self
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token endpoint seam
// ─────────────────────────────────────────────────────────────────────────────

/// The OAuth token endpoint as seen by the credential store.
///
/// [`GoogleOAuth`](crate::oauth::GoogleOAuth) is the production implementation.
pub trait Authorizer: Send + Sync {
    /// Exchanges the credential's refresh token for a new access token.
    fn refresh<'a>(&'a self, credential: &'a Credential) -> BoxFuture<'a, Result<Credential>>;

    /// Runs an interactive authorization and returns a fresh grant.
    fn authorize<'a>(
        &'a self,
        secrets: &'a ClientSecrets,
        scopes: &'a [String],
    ) -> BoxFuture<'a, Result<Credential>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Credential store
// ─────────────────────────────────────────────────────────────────────────────

/// Loads, refreshes and re-issues the OAuth credential.
pub struct CredentialStore {
    store: Arc<dyn TokenStore>,
    authorizer: Arc<dyn Authorizer>,
    client_secret_path: PathBuf,
    scopes: Vec<String>,
    authorization_timeout: Duration,
}

impl CredentialStore {
    /// Creates a credential store.
    ///
    /// `client_secret_path` is only read when re-authorization is required.
    #[must_use]
    pub fn new(
        store: Arc<dyn TokenStore>,
        authorizer: Arc<dyn Authorizer>,
        client_secret_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            authorizer,
            client_secret_path: client_secret_path.into(),
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            authorization_timeout: Duration::from_secs(300),
        }
    }

    /// Creates a file-backed credential store from the bot configuration.
    #[must_use]
    pub fn from_config(config: &BotConfig, authorizer: Arc<dyn Authorizer>) -> Self {
        Self::new(
            Arc::new(FileTokenStore::new(&config.token_path)),
            authorizer,
            &config.client_secret_path,
        )
        .with_scopes(config.scopes.clone())
        .with_authorization_timeout(config.timeouts.authorization)
    }

    /// Sets the scopes requested on re-authorization.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Sets the bound on the interactive re-authorization.
    #[must_use]
    pub fn with_authorization_timeout(mut self, timeout: Duration) -> Self {
        self.authorization_timeout = timeout;
        self
    }

    /// Returns a usable credential.
    ///
    /// 1. A persisted, unexpired credential is returned as-is.
    /// 2. An expired credential with a refresh token is refreshed and persisted.
    /// 3. Otherwise (nothing stored, unreadable store, no refresh token or a
    ///    rejected refresh) an interactive re-authorization is run and the
    ///    grant persisted.
    ///
    /// # Errors
    ///
    /// Returns an authentication error ([`Error::is_authentication_failure`])
    /// if the client-secret file is missing or re-authorization fails, and
    /// [`Error::TokenStore`] if a new credential cannot be persisted.
    #[instrument(name = "CredentialStore::obtain_credential", skip(self))]
    pub async fn obtain_credential(&self) -> Result<Credential> {
        let persisted = match self.store.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(error = %e, "Persisted credential unreadable, re-authorizing");
                None
            }
        };

        if let Some(credential) = persisted {
            if !credential.is_expired() {
                debug!("Using persisted credential");
                return Ok(credential);
            }

            if credential.refresh_token().is_some() {
                match self.authorizer.refresh(&credential).await {
                    Ok(refreshed) => {
                        self.store.save(&refreshed)?;
                        info!(expiry = ?refreshed.expiry(), "Refreshed credential");
                        return Ok(refreshed);
                    }
                    Err(e) => {
                        warn!(error = %e, "Credential refresh failed, re-authorizing");
                    }
                }
            } else {
                debug!("Credential expired without a refresh token");
            }
        } else {
            debug!("No persisted credential");
        }

        self.reauthorize().await
    }

    #[instrument(
        name = "CredentialStore::reauthorize",
        skip(self),
        fields(client_secret_path = %self.client_secret_path.display())
    )]
    async fn reauthorize(&self) -> Result<Credential> {
        let secrets = ClientSecrets::from_file(&self.client_secret_path)?;

        info!("Starting interactive authorization");

        let credential = tokio::time::timeout(
            self.authorization_timeout,
            self.authorizer.authorize(&secrets, &self.scopes),
        )
        .await
        .map_err(|_| Error::AuthorizationTimeout {
            timeout: self.authorization_timeout,
        })??;

        self.store.save(&credential)?;
        info!("Authorization complete, credential saved");
        Ok(credential)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("client_secret_path", &self.client_secret_path)
            .field("scopes", &self.scopes)
            .field("authorization_timeout", &self.authorization_timeout)
            .finish_non_exhaustive()
    }
}
