use std::fmt;
use std::sync::Arc;

use b2_types::{AuthorizeAccountResponse, API_PREFIX};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{AuthError, TransportError};

/// An application key as issued by the service.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub key_id: String,
    pub key: String,
}

impl Credentials {
    pub fn new(key_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key: key.into(),
        }
    }

    fn basic_auth_header(&self) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", self.key_id, self.key)))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Restriction of an application key to one bucket (and optionally a name prefix).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowedBucket {
    pub bucket_id: String,
    pub bucket_name: Option<String>,
    pub name_prefix: Option<String>,
}

/// An authenticated context. Never mutated; a refresh replaces it with a higher `version`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub account_id: String,
    pub authorization_token: String,
    pub api_url: String,
    pub download_url: String,
    pub recommended_part_size: u64,
    pub minimum_part_size: u64,
    pub absolute_minimum_part_size: u64,
    #[serde(default)]
    pub allowed: Option<AllowedBucket>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(skip)]
    pub version: u64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .field("api_url", &self.api_url)
            .field("download_url", &self.download_url)
            .field("recommended_part_size", &self.recommended_part_size)
            .field("absolute_minimum_part_size", &self.absolute_minimum_part_size)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn from_response(resp: AuthorizeAccountResponse, version: u64) -> Self {
        let storage = resp.api_info.storage_api;
        let allowed = storage.bucket_id.map(|bucket_id| AllowedBucket {
            bucket_id,
            bucket_name: storage.bucket_name,
            name_prefix: storage.name_prefix,
        });
        Self {
            account_id: resp.account_id,
            authorization_token: resp.authorization_token,
            api_url: storage.api_url.trim_end_matches('/').to_string(),
            download_url: storage.download_url.trim_end_matches('/').to_string(),
            recommended_part_size: storage.recommended_part_size,
            minimum_part_size: storage.minimum_part_size.unwrap_or(storage.recommended_part_size),
            absolute_minimum_part_size: storage.absolute_minimum_part_size,
            allowed,
            capabilities: storage.capabilities,
            version,
        }
    }

    /// Full URL of an API operation, e.g. `b2_list_buckets`.
    pub fn api_endpoint(&self, name: &str) -> String {
        format!("{}{API_PREFIX}/{name}", self.api_url)
    }
}

/// Acquires sessions and replaces them when the service reports the token as expired.
///
/// The mutex is held across the authorize call, so concurrent refreshes collapse into one request
/// and callers waiting on it pick up the new session.
pub struct AuthManager {
    client: reqwest::Client,
    auth_endpoint: String,
    credentials: Option<Credentials>,
    current: Mutex<Option<Arc<Session>>>,
}

impl AuthManager {
    pub fn new(client: reqwest::Client, auth_endpoint: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            client,
            auth_endpoint: auth_endpoint.into().trim_end_matches('/').to_string(),
            credentials,
            current: Mutex::new(None),
        }
    }

    /// Starts from a previously persisted session instead of authorizing on first use.
    pub fn with_session(self, mut session: Session) -> Self {
        session.version = 1;
        Self {
            current: Mutex::new(Some(Arc::new(session))),
            ..self
        }
    }

    /// Calls `b2_authorize_account` and makes the result the current session.
    pub async fn authorize(&self) -> Result<Arc<Session>, AuthError> {
        let mut current = self.current.lock().await;
        let version = current.as_ref().map(|s| s.version).unwrap_or(0) + 1;
        let session = Arc::new(self.authorize_account(version).await?);
        *current = Some(session.clone());
        Ok(session)
    }

    /// The current session, authorizing if there is none yet.
    pub async fn session(&self) -> Result<Arc<Session>, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref() {
            return Ok(session.clone());
        }
        let session = Arc::new(self.authorize_account(1).await?);
        *current = Some(session.clone());
        Ok(session)
    }

    /// Replaces the session that was used for a rejected request.
    ///
    /// If another caller already replaced `stale_version`, the newer session is returned without
    /// contacting the service.
    pub async fn refresh(&self, stale_version: u64) -> Result<Arc<Session>, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref() {
            if session.version > stale_version {
                debug!(stale_version, current_version = session.version, "session already refreshed");
                return Ok(session.clone());
            }
        }
        let version = current.as_ref().map(|s| s.version).unwrap_or(stale_version) + 1;
        info!(stale_version, "authorization token expired; re-authorizing");
        let session = Arc::new(self.authorize_account(version).await?);
        *current = Some(session.clone());
        Ok(session)
    }

    /// The session in use right now, without authorizing. Used to persist it.
    pub async fn current_session(&self) -> Option<Arc<Session>> {
        self.current.lock().await.clone()
    }

    async fn authorize_account(&self, version: u64) -> Result<Session, AuthError> {
        let credentials = self.credentials.as_ref().ok_or(AuthError::MissingCredentials)?;
        let url = format!("{}{API_PREFIX}/b2_authorize_account", self.auth_endpoint);
        debug!(url, key_id = credentials.key_id, "authorizing account");

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, credentials.basic_auth_header())
            .send()
            .await
            .map_err(AuthError::Unreachable)?;

        let status = response.status();
        let body = response.bytes().await.map_err(AuthError::Unreachable)?;

        if !status.is_success() {
            return Err(match TransportError::from_api_error(status, &body) {
                TransportError::Api { status, message, .. }
                    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN =>
                {
                    AuthError::InvalidCredentials(message)
                },
                TransportError::Api { code, message, .. } => AuthError::Rejected { code, message },
                other => AuthError::Malformed(other.to_string()),
            });
        }

        let parsed: AuthorizeAccountResponse =
            serde_json::from_slice(&body).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let session = Session::from_response(parsed, version);
        info!(account_id = session.account_id, api_url = session.api_url, "authorized");
        Ok(session)
    }
}
