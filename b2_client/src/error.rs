use b2_types::{ApiErrorResponse, BAD_AUTH_TOKEN, EXPIRED_AUTH_TOKEN};
use reqwest::StatusCode;
use thiserror::Error;

/// Failures acquiring or refreshing a session.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Authorization endpoint unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("Malformed authorization response: {0}")]
    Malformed(String),

    /// The request was still rejected after the session was refreshed once.
    #[error("Request rejected after re-authorization ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("No credentials available; run `b2 authorise` first")]
    MissingCredentials,
}

/// Failures of a single HTTP exchange.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("API error {status} ({code}): {message}")]
    Api { status: StatusCode, code: String, message: String },

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    /// The response body ended early or could not be read.
    #[error("Error reading response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Middleware error: {0}")]
    Middleware(#[source] anyhow::Error),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    pub fn from_api_error(status: StatusCode, body: &[u8]) -> Self {
        match serde_json::from_slice::<ApiErrorResponse>(body) {
            Ok(err) => TransportError::Api {
                status,
                code: err.code,
                message: err.message,
            },
            Err(_) => TransportError::Api {
                status,
                code: status.canonical_reason().unwrap_or("unknown").to_ascii_lowercase().replace(' ', "_"),
                message: String::from_utf8_lossy(body).chars().take(200).collect(),
            },
        }
    }

    /// Whether the failure is likely to go away on retry: timeouts, connection resets, truncated
    /// bodies, 408, 429 and every 5xx. An expired upload-URL token also counts: the next attempt
    /// fetches a fresh URL.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Api { status, code, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
                    || (*status == StatusCode::UNAUTHORIZED && is_refreshable_auth_code(code))
            },
            TransportError::Network(e) => {
                matches!(reqwest_retry::default_on_request_failure(e), Some(reqwest_retry::Retryable::Transient))
            },
            TransportError::Timeout(_) | TransportError::Body(_) => true,
            TransportError::Auth(_) | TransportError::Middleware(_) | TransportError::InvalidResponse(_) => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::Api { status, .. } => Some(*status),
            TransportError::Network(e) | TransportError::Timeout(e) | TransportError::Body(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e)
        } else if e.is_body() || e.is_decode() {
            TransportError::Body(e)
        } else {
            TransportError::Network(e)
        }
    }
}

impl From<reqwest_middleware::Error> for TransportError {
    fn from(e: reqwest_middleware::Error) -> Self {
        match e {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => match e.downcast::<AuthError>() {
                Ok(auth) => TransportError::Auth(auth),
                Err(e) => TransportError::Middleware(e),
            },
        }
    }
}

pub(crate) fn is_refreshable_auth_code(code: &str) -> bool {
    code == EXPIRED_AUTH_TOKEN || code == BAD_AUTH_TOKEN
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum UploadErrorReason {
    /// A part was rejected with an error that retrying cannot fix.
    #[error("part {part_number} failed: {source}")]
    PartFailed {
        part_number: u32,
        #[source]
        source: TransportError,
    },

    /// The retry budget ran out on transient failures.
    #[error("gave up after {attempts} attempts{}: {source}", part_suffix(*part_number))]
    Exhausted {
        part_number: Option<u32>,
        attempts: usize,
        #[source]
        source: TransportError,
    },

    #[error("error reading local file: {0}")]
    LocalReadError(#[source] std::io::Error),

    #[error("file of {size} bytes is too small to upload in parts of at least {minimum_part_size} bytes")]
    TooSmallForParts { size: u64, minimum_part_size: u64 },

    #[error(transparent)]
    Transport(TransportError),

    #[error(transparent)]
    Auth(AuthError),

    #[error("part upload task failed: {0}")]
    TaskFailed(#[source] tokio::task::JoinError),

    #[error("cancelled")]
    Cancelled,
}

impl From<TransportError> for UploadErrorReason {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Auth(e) => UploadErrorReason::Auth(e),
            e => UploadErrorReason::Transport(e),
        }
    }
}

fn part_suffix(part_number: Option<u32>) -> String {
    part_number.map(|n| format!(" on part {n}")).unwrap_or_default()
}

#[derive(Error, Debug)]
#[error("upload of {file_name} failed: {reason}")]
pub struct UploadError {
    pub file_name: String,
    #[source]
    pub reason: UploadErrorReason,
}

impl UploadError {
    pub fn new(file_name: impl Into<String>, reason: UploadErrorReason) -> Self {
        Self {
            file_name: file_name.into(),
            reason,
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DownloadErrorReason {
    /// The received content does not match what the server declared. Bytes were already handed to
    /// the sink; the caller decides what to do with them.
    #[error("content mismatch: {0}")]
    Corrupt(String),

    #[error("error writing output: {0}")]
    LocalWriteError(#[source] std::io::Error),

    #[error("file not found")]
    NotFound,

    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: usize,
        #[source]
        source: TransportError,
    },

    /// The server ignored a resume range and the sink cannot be rewound.
    #[error("server ignored the resume range at byte {offset} and the output cannot restart")]
    RangeNotHonoured { offset: u64 },

    #[error(transparent)]
    Transport(TransportError),

    #[error(transparent)]
    Auth(AuthError),

    #[error("cancelled")]
    Cancelled,
}

impl From<TransportError> for DownloadErrorReason {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Auth(e) => DownloadErrorReason::Auth(e),
            e if e.is_not_found() => DownloadErrorReason::NotFound,
            e => DownloadErrorReason::Transport(e),
        }
    }
}

#[derive(Error, Debug)]
#[error("download of {file_name} failed: {reason}")]
pub struct DownloadError {
    pub file_name: String,
    #[source]
    pub reason: DownloadErrorReason,
}

impl DownloadError {
    pub fn new(file_name: impl Into<String>, reason: DownloadErrorReason) -> Self {
        Self {
            file_name: file_name.into(),
            reason,
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum B2ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Configuration Error: {0}")]
    ConfigurationError(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Other Internal Error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, B2ClientError>;
