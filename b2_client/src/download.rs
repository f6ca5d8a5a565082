use b2_types::{API_PREFIX, X_BZ_CONTENT_SHA1, X_BZ_INFO_LARGE_FILE_SHA1};
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::StatusCode;
use sha1::{Digest, Sha1};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::download_sink::DownloadSink;
use crate::error::{DownloadError, DownloadErrorReason, TransportError};
use crate::http_client::{Api, Transport};
use crate::progress::{ProgressCallback, ProgressStream, StreamProgressReporter, TransferProgress};
use crate::retry_utils::RetryPolicy;

/// The file to fetch.
#[derive(Debug, Clone)]
pub enum DownloadTarget {
    ByName { bucket_name: String, file_name: String },
    ById { file_id: String },
}

impl DownloadTarget {
    fn label(&self) -> &str {
        match self {
            DownloadTarget::ByName { file_name, .. } => file_name,
            DownloadTarget::ById { file_id } => file_id,
        }
    }

    fn url(&self, download_url: &str) -> String {
        match self {
            DownloadTarget::ByName { bucket_name, file_name } => {
                format!("{download_url}/file/{}/{}", urlencoding::encode(bucket_name), encode_file_name(file_name))
            },
            DownloadTarget::ById { file_id } => {
                format!("{download_url}{API_PREFIX}/b2_download_file_by_id?fileId={}", urlencoding::encode(file_id))
            },
        }
    }
}

/// Percent-encodes a file name for a URL path or the `X-Bz-File-Name` header, keeping `/`.
pub fn encode_file_name(name: &str) -> String {
    name.split('/').map(|segment| urlencoding::encode(segment)).collect::<Vec<_>>().join("/")
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub bytes_written: u64,
    /// SHA1 of the received bytes.
    pub content_sha1: String,
    pub content_type: Option<String>,
}

/// What the server declared about the content on the first response.
#[derive(Debug, Clone, Default, PartialEq)]
struct ExpectedContent {
    length: Option<u64>,
    sha1: Option<String>,
    content_type: Option<String>,
}

impl ExpectedContent {
    fn from_headers(headers: &HeaderMap, status: StatusCode) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

        let length = if status == StatusCode::PARTIAL_CONTENT {
            header(CONTENT_RANGE.as_str()).and_then(parse_content_range).and_then(|r| r.total)
        } else {
            header(CONTENT_LENGTH.as_str()).and_then(|v| v.parse().ok())
        };

        let sha1 = match header(X_BZ_CONTENT_SHA1) {
            Some(s) if !s.is_empty() && s != "none" => Some(s.strip_prefix("unverified:").unwrap_or(s).to_ascii_lowercase()),
            _ => header(X_BZ_INFO_LARGE_FILE_SHA1).map(str::to_ascii_lowercase),
        };

        Self {
            length,
            sha1,
            content_type: header(CONTENT_TYPE.as_str()).map(String::from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

/// Parses `bytes START-END/TOTAL`, where TOTAL may be `*`.
pub(crate) fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some(ContentRange {
        start: start.trim().parse().ok()?,
        end: end.trim().parse().ok()?,
        total,
    })
}

/// Compares what was received against what the server declared.
fn verify(expected: &ExpectedContent, written: u64, actual_sha1: &str) -> Result<(), DownloadErrorReason> {
    if let Some(length) = expected.length {
        if length != written {
            return Err(DownloadErrorReason::Corrupt(format!("expected {length} bytes, received {written}")));
        }
    }
    if let Some(sha1) = expected.sha1.as_deref() {
        if sha1 != actual_sha1 {
            return Err(DownloadErrorReason::Corrupt(format!("expected SHA1 {sha1}, computed {actual_sha1}")));
        }
    }
    Ok(())
}

/// State carried across attempts of one download.
struct DownloadState {
    written: u64,
    hasher: Sha1,
    expected: Option<ExpectedContent>,
}

impl DownloadState {
    fn new() -> Self {
        Self {
            written: 0,
            hasher: Sha1::new(),
            expected: None,
        }
    }
}

enum AttemptError {
    Transport(TransportError),
    Fatal(DownloadErrorReason),
}

impl From<TransportError> for AttemptError {
    fn from(e: TransportError) -> Self {
        AttemptError::Transport(e)
    }
}

/// Streams remote files into a [`DownloadSink`], resuming after transient failures and verifying
/// length and SHA1 at the end.
#[derive(Clone)]
pub struct DownloadEngine {
    transport: Transport,
    policy: RetryPolicy,
}

impl DownloadEngine {
    pub fn new(transport: Transport, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn download<S: DownloadSink + ?Sized>(
        &self,
        bucket_name: &str,
        file_name: &str,
        sink: &mut S,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let target = DownloadTarget::ByName {
            bucket_name: bucket_name.to_string(),
            file_name: file_name.to_string(),
        };
        self.download_target(&target, sink, progress, cancel).await
    }

    pub async fn download_by_id<S: DownloadSink + ?Sized>(
        &self,
        file_id: &str,
        sink: &mut S,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let target = DownloadTarget::ById {
            file_id: file_id.to_string(),
        };
        self.download_target(&target, sink, progress, cancel).await
    }

    #[instrument(skip_all, name = "download", fields(file = target.label()))]
    pub async fn download_target<S: DownloadSink + ?Sized>(
        &self,
        target: &DownloadTarget,
        sink: &mut S,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let err = |reason: DownloadErrorReason| DownloadError::new(target.label(), reason);
        let mut state = DownloadState::new();
        let progress = TransferProgress::new(0, progress);
        let reporter = progress.reporter();

        // Counts consecutive failed attempts; an attempt that moved data forward resets it.
        let mut failures = 0;
        loop {
            let written_before = state.written;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(err(DownloadErrorReason::Cancelled)),
                r = self.attempt(target, &mut state, sink, &reporter) => r,
            };

            let e = match result {
                Ok(()) => break,
                Err(AttemptError::Fatal(reason)) => return Err(err(reason)),
                Err(AttemptError::Transport(e)) => e,
            };

            if !self.policy.is_transient(&e) {
                return Err(err(e.into()));
            }

            failures = if state.written > written_before { 1 } else { failures + 1 };
            if failures >= self.policy.max_attempts() {
                return Err(err(DownloadErrorReason::Exhausted {
                    attempts: failures,
                    source: e,
                }));
            }

            warn!(offset = state.written, failures, "download interrupted, resuming: {e}");
            if !self.policy.wait_before_retry(failures, cancel).await {
                return Err(err(DownloadErrorReason::Cancelled));
            }
        }

        sink.flush().await.map_err(|e| err(DownloadErrorReason::LocalWriteError(e)))?;

        let actual_sha1 = format!("{:x}", state.hasher.finalize());
        let expected = state.expected.unwrap_or_default();
        verify(&expected, state.written, &actual_sha1).map_err(err)?;

        info!(bytes = state.written, sha1 = actual_sha1, "download complete");
        Ok(DownloadOutcome {
            bytes_written: state.written,
            content_sha1: actual_sha1,
            content_type: expected.content_type,
        })
    }

    async fn attempt<S: DownloadSink + ?Sized>(
        &self,
        target: &DownloadTarget,
        state: &mut DownloadState,
        sink: &mut S,
        reporter: &StreamProgressReporter,
    ) -> Result<(), AttemptError> {
        let session = self.transport.session().await?;
        let mut request = self
            .transport
            .client()
            .get(target.url(&session.download_url))
            .with_extension(Api("download"));
        if state.written > 0 {
            request = request.header(RANGE, format!("bytes={}-", state.written));
        }

        let response = self.transport.send(request).await?;
        let status = response.status();

        if state.written > 0 {
            if status == StatusCode::PARTIAL_CONTENT {
                let range = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range);
                if range.map(|r| r.start) != Some(state.written) {
                    return Err(AttemptError::Transport(TransportError::InvalidResponse(format!(
                        "resume at {} answered with range {range:?}",
                        state.written
                    ))));
                }
            } else {
                debug!(offset = state.written, %status, "server ignored range request");
                let restarted = sink.restart().await.map_err(|e| AttemptError::Fatal(DownloadErrorReason::LocalWriteError(e)))?;
                if !restarted {
                    return Err(AttemptError::Fatal(DownloadErrorReason::RangeNotHonoured { offset: state.written }));
                }
                *state = DownloadState::new();
            }
        }

        let declared = ExpectedContent::from_headers(response.headers(), status);
        match &state.expected {
            None => {
                if let Some(length) = declared.length {
                    reporter.set_total(length);
                }
                state.expected = Some(declared);
            },
            Some(expected) if declared.length.is_some() && declared.length != expected.length => {
                return Err(AttemptError::Fatal(DownloadErrorReason::Corrupt(format!(
                    "length changed between requests: {:?} then {:?}",
                    expected.length, declared.length
                ))));
            },
            Some(_) => {},
        }

        let mut stream = ProgressStream::wrap_stream(response.bytes_stream(), state.written, reporter.clone());
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(TransportError::from)?;
            sink.write_all(&chunk)
                .await
                .map_err(|e| AttemptError::Fatal(DownloadErrorReason::LocalWriteError(e)))?;
            state.hasher.update(&chunk);
            state.written += chunk.len() as u64;
        }
        Ok(())
    }
}
