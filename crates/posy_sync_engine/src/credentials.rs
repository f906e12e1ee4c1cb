//! Credential and token handling.
//!
//! The sync client never touches credential files directly; it asks a
//! [`CredentialProvider`] for an [`AccessToken`]. [`OAuthProvider`] is the
//! Google implementation: it reads the client-secrets file (never writes it)
//! and keeps a refreshable session token in `token.json`.

use crate::error::{SyncError, SyncResult};
use crate::http::{form_encode, HttpClient, HttpRequest, Method};
use parking_lot::RwLock;
use posy_core::{Clock, Timestamp};
use posy_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default Google token endpoint.
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Default token file name.
pub const TOKEN_FILE: &str = "token.json";

/// A bearer token for remote calls.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<Timestamp>,
}

impl AccessToken {
    /// Creates a token.
    pub fn new(secret: impl Into<String>, expires_at: Option<Timestamp>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// The empty token used by remotes that need no authentication.
    pub fn anonymous() -> Self {
        Self::new("", None)
    }

    /// The token value.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Expiry, if known.
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    /// Whether the token expires within `skew` of `now`. Tokens of unknown
    /// expiry are used until the remote rejects them.
    pub fn expires_within(&self, now: Timestamp, skew: Duration) -> bool {
        match self.expires_at {
            Some(at) => at.as_millis() <= now.as_millis().saturating_add(skew.as_millis() as u64),
            None => false,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Capability to obtain access tokens.
pub trait CredentialProvider: Send + Sync {
    /// Returns a usable token, refreshing if the cached one is stale.
    fn load(&self) -> SyncResult<AccessToken>;

    /// Forces a refresh.
    fn refresh(&self) -> SyncResult<AccessToken>;

    /// Forgets the current token so the next `load` refreshes.
    fn invalidate(&self);
}

/// OAuth client credentials parsed from a Google credential file.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Token endpoint.
    pub token_uri: String,
    /// Refresh token, present in `authorized_user` files.
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Deserialize)]
struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default)]
    token_uri: Option<String>,
}

impl OAuthCredentials {
    /// Parses a client-secrets (`installed` / `web`) or `authorized_user` file.
    pub fn parse(data: &[u8]) -> SyncResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| SyncError::auth(format!("malformed credential file: {e}")))?;

        for section in ["installed", "web"] {
            if let Some(inner) = value.get(section) {
                let client: ClientSection = serde_json::from_value(inner.clone())
                    .map_err(|e| SyncError::auth(format!("malformed '{section}' credentials: {e}")))?;
                return Ok(Self {
                    client_id: client.client_id,
                    client_secret: client.client_secret,
                    token_uri: client.token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URI.to_string()),
                    refresh_token: None,
                });
            }
        }

        if value.get("type").and_then(|t| t.as_str()) == Some("authorized_user") {
            let user: AuthorizedUser = serde_json::from_value(value)
                .map_err(|e| SyncError::auth(format!("malformed authorized_user credentials: {e}")))?;
            return Ok(Self {
                client_id: user.client_id,
                client_secret: user.client_secret,
                token_uri: user.token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URI.to_string()),
                refresh_token: Some(user.refresh_token),
            });
        }

        Err(SyncError::auth("unrecognised credential file"))
    }

    /// Reads and parses a credential file.
    pub fn from_file(path: &Path) -> SyncResult<Self> {
        let data = std::fs::read(path).map_err(|e| {
            SyncError::auth(format!("cannot read credential file {}: {e}", path.display()))
        })?;
        Self::parse(&data)
    }
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Contents of the token file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    /// Access token.
    #[serde(alias = "token")]
    pub access_token: String,
    /// Refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl StoredToken {
    fn access_token(&self) -> AccessToken {
        AccessToken::new(
            self.access_token.clone(),
            self.expires_at.map(Timestamp::from_millis),
        )
    }
}

impl fmt::Debug for StoredToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredToken")
            .field("expires_at", &self.expires_at)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// The read-write token file.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn StorageBackend>,
    name: String,
}

impl TokenStore {
    /// Token file `name` inside `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>, name: impl Into<String>) -> Self {
        Self {
            backend,
            name: name.into(),
        }
    }

    /// Reads the token. Missing, unreadable or corrupt files read as `None`.
    pub fn load(&self) -> Option<StoredToken> {
        let data = match self.backend.read(&self.name) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(file = %self.name, error = %e, "cannot read token file");
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(file = %self.name, error = %e, "ignoring corrupt token file");
                None
            }
        }
    }

    /// Writes the token atomically.
    pub fn save(&self, token: &StoredToken) -> SyncResult<()> {
        let data = serde_json::to_vec_pretty(token)?;
        self.backend.write_atomic(&self.name, &data)?;
        Ok(())
    }

    /// Removes the token file.
    pub fn clear(&self) -> SyncResult<bool> {
        Ok(self.backend.remove(&self.name)?)
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore").field("name", &self.name).finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Google OAuth token provider.
pub struct OAuthProvider<C: HttpClient> {
    credentials_path: PathBuf,
    tokens: TokenStore,
    http: C,
    clock: Arc<dyn Clock>,
    skew: Duration,
    cached: RwLock<Option<AccessToken>>,
}

impl<C: HttpClient> OAuthProvider<C> {
    /// Creates a provider. Nothing is read until the first `load`.
    pub fn new(
        credentials_path: impl Into<PathBuf>,
        tokens: TokenStore,
        http: C,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            tokens,
            http,
            clock,
            skew: Duration::from_secs(60),
            cached: RwLock::new(None),
        }
    }

    /// Sets how early tokens are refreshed before expiry.
    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    fn usable(&self, token: &AccessToken) -> bool {
        !token.expires_within(self.clock.now(), self.skew)
    }

    fn refresh_with(&self, credentials: &OAuthCredentials) -> SyncResult<AccessToken> {
        let refresh_token = self
            .tokens
            .load()
            .and_then(|t| t.refresh_token)
            .or_else(|| credentials.refresh_token.clone())
            .ok_or_else(|| {
                SyncError::auth("no refresh token available; authorize this installation first")
            })?;

        let stored = self.exchange(credentials, &refresh_token)?;
        self.tokens.save(&stored)?;
        let token = stored.access_token();
        *self.cached.write() = Some(token.clone());
        tracing::info!(expires_at = ?token.expires_at(), "access token refreshed");
        Ok(token)
    }

    fn exchange(&self, credentials: &OAuthCredentials, refresh_token: &str) -> SyncResult<StoredToken> {
        let body = form_encode(&[
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ]);
        let request = HttpRequest::new(Method::Post, &credentials.token_uri)
            .body("application/x-www-form-urlencoded", body.into_bytes());
        let response = self.http.send(request)?;

        if response.is_success() {
            let granted: TokenResponse = response.read_json()?;
            let now = self.clock.now().as_millis();
            return Ok(StoredToken {
                access_token: granted.access_token,
                refresh_token: Some(
                    granted
                        .refresh_token
                        .unwrap_or_else(|| refresh_token.to_string()),
                ),
                expires_at: granted
                    .expires_in
                    .map(|secs| now.saturating_add(secs.saturating_mul(1000))),
            });
        }

        if response.status >= 500 || response.status == 429 {
            return Err(SyncError::transient(format!(
                "token endpoint returned {}",
                response.status
            )));
        }
        match response.read_json::<TokenErrorResponse>() {
            Ok(err) if err.error == "invalid_grant" => {
                if let Err(e) = self.tokens.clear() {
                    tracing::warn!(error = %e, "failed to remove revoked token file");
                }
                Err(SyncError::auth("refresh token expired or revoked"))
            }
            Ok(err) => Err(SyncError::auth(format!(
                "token refresh rejected: {}{}",
                err.error,
                err.error_description
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default()
            ))),
            Err(_) => Err(SyncError::auth(format!(
                "token refresh rejected with status {}",
                response.status
            ))),
        }
    }
}

impl<C: HttpClient> CredentialProvider for OAuthProvider<C> {
    fn load(&self) -> SyncResult<AccessToken> {
        // Tokens are only trusted while the credential file is readable.
        let credentials = OAuthCredentials::from_file(&self.credentials_path)?;
        if let Some(token) = self.cached.read().as_ref() {
            if self.usable(token) {
                return Ok(token.clone());
            }
        }
        if let Some(stored) = self.tokens.load() {
            let token = stored.access_token();
            if self.usable(&token) {
                *self.cached.write() = Some(token.clone());
                return Ok(token);
            }
        }
        self.refresh_with(&credentials)
    }

    fn refresh(&self) -> SyncResult<AccessToken> {
        self.refresh_with(&OAuthCredentials::from_file(&self.credentials_path)?)
    }

    fn invalidate(&self) {
        *self.cached.write() = None;
        if let Some(mut stored) = self.tokens.load() {
            stored.expires_at = Some(0);
            if let Err(e) = self.tokens.save(&stored) {
                tracing::warn!(error = %e, "failed to mark token expired");
            }
        }
    }
}

impl<C: HttpClient> fmt::Debug for OAuthProvider<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthProvider")
            .field("credentials_path", &self.credentials_path)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

/// A fixed token, for tests and simple remotes.
///
/// Each refresh hands out the next token in the list (the last one
/// repeats). Revoking makes every call fail with an auth error.
#[derive(Debug)]
pub struct StaticCredentials {
    tokens: Vec<String>,
    current: AtomicUsize,
    refreshes: AtomicUsize,
    revoked: AtomicBool,
}

impl StaticCredentials {
    /// Always hands out `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self::rotating(vec![token.into()])
    }

    /// Hands out `tokens` in order, advancing on every refresh.
    pub fn rotating(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            current: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            revoked: AtomicBool::new(false),
        }
    }

    /// Revokes (or restores) the credentials.
    pub fn set_revoked(&self, revoked: bool) {
        self.revoked.store(revoked, Ordering::SeqCst);
    }

    /// Number of refreshes so far.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn token(&self) -> SyncResult<AccessToken> {
        if self.revoked.load(Ordering::SeqCst) {
            return Err(SyncError::auth("credentials revoked"));
        }
        let index = self.current.load(Ordering::SeqCst);
        self.tokens
            .get(index.min(self.tokens.len().saturating_sub(1)))
            .map(|t| AccessToken::new(t.clone(), None))
            .ok_or_else(|| SyncError::auth("no credentials configured"))
    }
}

impl CredentialProvider for StaticCredentials {
    fn load(&self) -> SyncResult<AccessToken> {
        self.token()
    }

    fn refresh(&self) -> SyncResult<AccessToken> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.current.fetch_add(1, Ordering::SeqCst);
        self.token()
    }

    fn invalidate(&self) {}
}

/// Credentials for remotes that need none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn load(&self) -> SyncResult<AccessToken> {
        Ok(AccessToken::anonymous())
    }

    fn refresh(&self) -> SyncResult<AccessToken> {
        Ok(AccessToken::anonymous())
    }

    fn invalidate(&self) {}
}
