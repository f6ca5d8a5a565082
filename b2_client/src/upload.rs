use std::collections::{BTreeMap, HashMap};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

use b2_config::groups::client::ConfigValueGroup as ClientConfig;
use b2_types::{
    CancelLargeFileRequest, CancelLargeFileResponse, FileVersion, FinishLargeFileRequest, GetUploadPartUrlRequest,
    GetUploadUrlRequest, StartLargeFileRequest, UploadPartResponse, UploadUrl, AUTO_CONTENT_TYPE, SRC_LAST_MODIFIED_INFO,
    X_BZ_CONTENT_SHA1, X_BZ_FILE_NAME, X_BZ_INFO_SRC_LAST_MODIFIED, X_BZ_PART_NUMBER,
};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Body;
use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use utils::BoundedJoinSet;

use crate::download::encode_file_name;
use crate::error::{TransportError, UploadError, UploadErrorReason};
use crate::http_client::Transport;
use crate::part_planner::{PartPlan, PartSpec};
use crate::progress::{ProgressCallback, ProgressStream, StreamProgressReporter, TransferProgress};
use crate::retry_utils::{RetryFailure, RetryPolicy, RetryableError};

#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Overrides the content type guessed from the destination name.
    pub content_type: Option<String>,
    /// Upload in parts even if the file is below the large-file threshold.
    pub force_multipart: bool,
    pub progress: Option<ProgressCallback>,
}

/// Failure of one upload attempt.
#[derive(Debug)]
enum AttemptError {
    Transport(TransportError),
    LocalRead(io::Error),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Transport(e) => e.fmt(f),
            AttemptError::LocalRead(e) => write!(f, "local read error: {e}"),
        }
    }
}

impl RetryableError for AttemptError {
    fn as_transport(&self) -> Option<&TransportError> {
        match self {
            AttemptError::Transport(e) => Some(e),
            AttemptError::LocalRead(_) => None,
        }
    }
}

impl From<TransportError> for AttemptError {
    fn from(e: TransportError) -> Self {
        AttemptError::Transport(e)
    }
}

/// Maps a failed retry loop onto an upload error reason. `part_number` is set for part uploads.
fn failure_reason(failure: RetryFailure<AttemptError>, part_number: Option<u32>) -> UploadErrorReason {
    match failure {
        RetryFailure::Cancelled => UploadErrorReason::Cancelled,
        RetryFailure::Exhausted {
            source: AttemptError::LocalRead(e),
            ..
        }
        | RetryFailure::Fatal {
            source: AttemptError::LocalRead(e),
            ..
        } => UploadErrorReason::LocalReadError(e),
        RetryFailure::Exhausted {
            attempts,
            source: AttemptError::Transport(source),
        } => UploadErrorReason::Exhausted {
            part_number,
            attempts,
            source,
        },
        RetryFailure::Fatal {
            source: AttemptError::Transport(source),
            ..
        } => match (part_number, source) {
            (_, TransportError::Auth(e)) => UploadErrorReason::Auth(e),
            (Some(part_number), source) => UploadErrorReason::PartFailed { part_number, source },
            (None, source) => source.into(),
        },
    }
}

/// SHA1 of `length` bytes of `path` starting at `offset`, read through a buffer of `buffer_size`.
pub async fn hash_file_range(path: &Path, offset: u64, length: u64, buffer_size: usize) -> io::Result<String> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut reader = file.take(length);

    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    if total != length {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {length} bytes at offset {offset}, file ended after {total}"),
        ));
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// A request body streaming `length` bytes of `path` from `offset`.
async fn file_body(
    path: &Path,
    offset: u64,
    length: u64,
    buffer_size: usize,
    reporter: StreamProgressReporter,
) -> io::Result<Body> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let stream = ReaderStream::with_capacity(file.take(length), buffer_size.max(1));
    Ok(Body::wrap_stream(ProgressStream::wrap_stream(stream, 0, reporter)))
}

async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| TransportError::InvalidResponse(e.to_string()))
}

fn modified_millis(metadata: &std::fs::Metadata) -> Option<u128> {
    let modified = metadata.modified().ok()?;
    Some(modified.duration_since(UNIX_EPOCH).ok()?.as_millis())
}

/// The content type to declare: explicit, else guessed from the name, else left to the server.
pub fn content_type_for(dest_name: &str, explicit: Option<&str>) -> String {
    match explicit {
        Some(ct) => ct.to_string(),
        None => mime_guess::from_path(dest_name)
            .first_raw()
            .unwrap_or(AUTO_CONTENT_TYPE)
            .to_string(),
    }
}

/// Everything the part workers of one large file share.
struct LargeFileUpload {
    transport: Transport,
    policy: RetryPolicy,
    path: PathBuf,
    file_id: String,
    read_buffer_size: usize,
    progress: TransferProgress,
    /// Part URLs not currently in use. A URL is taken by one request at a time and dropped after
    /// any failure.
    idle_urls: Mutex<Vec<UploadUrl>>,
}

impl LargeFileUpload {
    async fn take_url(&self) -> Result<UploadUrl, TransportError> {
        let idle = self.idle_urls.lock().ok().and_then(|mut urls| urls.pop());
        match idle {
            Some(url) => Ok(url),
            None => {
                let request = GetUploadPartUrlRequest {
                    file_id: self.file_id.clone(),
                };
                self.transport.call_api("b2_get_upload_part_url", &request).await
            },
        }
    }

    fn return_url(&self, url: UploadUrl) {
        if let Ok(mut urls) = self.idle_urls.lock() {
            urls.push(url);
        }
    }

    async fn upload_part_once(
        &self,
        part: PartSpec,
        sha1: &str,
        reporter: StreamProgressReporter,
    ) -> Result<UploadPartResponse, AttemptError> {
        let url = self.take_url().await?;
        let body = file_body(&self.path, part.offset, part.length, self.read_buffer_size, reporter)
            .await
            .map_err(AttemptError::LocalRead)?;

        let request = self
            .transport
            .client()
            .post(&url.upload_url)
            .header(AUTHORIZATION, &url.authorization_token)
            .header(X_BZ_PART_NUMBER, part.part_number)
            .header(CONTENT_LENGTH, part.length)
            .header(X_BZ_CONTENT_SHA1, sha1)
            .body(body);

        let response = self.transport.send(request).await?;
        let uploaded: UploadPartResponse = parse_json(response).await?;
        self.return_url(url);
        Ok(uploaded)
    }

    /// Hashes and uploads one part; returns its SHA1.
    async fn upload_part(self: Arc<Self>, part: PartSpec, cancel: CancellationToken) -> Result<(u32, String), UploadErrorReason> {
        let sha1 = hash_file_range(&self.path, part.offset, part.length, self.read_buffer_size)
            .await
            .map_err(UploadErrorReason::LocalReadError)?;
        let reporter = self.progress.reporter();

        let uploaded = self
            .policy
            .run("upload_part", &cancel, |_| self.upload_part_once(part, &sha1, reporter.clone()))
            .await
            .map_err(|f| failure_reason(f, Some(part.part_number)))?;

        if !uploaded.content_sha1.eq_ignore_ascii_case(&sha1) {
            return Err(UploadErrorReason::PartFailed {
                part_number: part.part_number,
                source: TransportError::InvalidResponse(format!(
                    "server recorded SHA1 {} for the part, expected {sha1}",
                    uploaded.content_sha1
                )),
            });
        }
        debug!(part = part.part_number, bytes = part.length, "part uploaded");
        Ok((part.part_number, sha1))
    }
}

/// Uploads local files, as a single request or as a large file uploaded in parts.
#[derive(Clone)]
pub struct UploadEngine {
    transport: Transport,
    policy: RetryPolicy,
    upload_concurrency: usize,
    large_file_threshold: Option<u64>,
    read_buffer_size: usize,
}

impl UploadEngine {
    pub fn new(transport: Transport, policy: RetryPolicy, config: &ClientConfig) -> Self {
        Self {
            transport,
            policy,
            upload_concurrency: config.upload_concurrency.max(1),
            large_file_threshold: config.large_file_threshold,
            read_buffer_size: config.read_buffer_size.max(1),
        }
    }

    #[instrument(skip(self, options, cancel), fields(path = %local_path.display()))]
    pub async fn upload(
        &self,
        local_path: &Path,
        bucket_id: &str,
        dest_name: &str,
        options: &UploadOptions,
        cancel: &CancellationToken,
    ) -> Result<FileVersion, UploadError> {
        let err = |reason: UploadErrorReason| UploadError::new(dest_name, reason);

        let metadata = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| err(UploadErrorReason::LocalReadError(e)))?;
        let size = metadata.len();
        let session = self.transport.session().await.map_err(|e| err(e.into()))?;

        let threshold = self
            .large_file_threshold
            .map_or(session.recommended_part_size, |t| t.min(session.recommended_part_size));

        let file = LocalFile {
            path: local_path,
            size,
            modified_millis: modified_millis(&metadata),
            content_type: content_type_for(dest_name, options.content_type.as_deref()),
        };
        let progress = TransferProgress::new(size, options.progress.clone());

        let result = if size <= threshold && !options.force_multipart {
            self.upload_single(&file, bucket_id, dest_name, progress, cancel).await
        } else {
            let plan = PartPlan::new(size, session.recommended_part_size, session.absolute_minimum_part_size)
                .map_err(err)?;
            self.upload_large(&file, bucket_id, dest_name, plan, progress, cancel).await
        };

        let version = result.map_err(err)?;
        info!(file_id = ?version.file_id, bytes = size, "upload complete");
        Ok(version)
    }

    async fn upload_single(
        &self,
        file: &LocalFile<'_>,
        bucket_id: &str,
        dest_name: &str,
        progress: TransferProgress,
        cancel: &CancellationToken,
    ) -> Result<FileVersion, UploadErrorReason> {
        let sha1 = hash_file_range(file.path, 0, file.size, self.read_buffer_size)
            .await
            .map_err(UploadErrorReason::LocalReadError)?;
        let reporter = progress.reporter();
        debug!(bytes = file.size, sha1, "single request upload");

        self.policy
            .run("upload_file", cancel, |_| async {
                // Upload URLs are never reused after a failure.
                let request = GetUploadUrlRequest {
                    bucket_id: bucket_id.to_string(),
                };
                let url: UploadUrl = self.transport.call_api("b2_get_upload_url", &request).await?;
                let body = file_body(file.path, 0, file.size, self.read_buffer_size, reporter.clone())
                    .await
                    .map_err(AttemptError::LocalRead)?;

                let mut request = self
                    .transport
                    .client()
                    .post(&url.upload_url)
                    .header(AUTHORIZATION, &url.authorization_token)
                    .header(X_BZ_FILE_NAME, encode_file_name(dest_name))
                    .header(CONTENT_TYPE, &file.content_type)
                    .header(CONTENT_LENGTH, file.size)
                    .header(X_BZ_CONTENT_SHA1, &sha1);
                if let Some(millis) = file.modified_millis {
                    request = request.header(X_BZ_INFO_SRC_LAST_MODIFIED, millis.to_string());
                }

                let response = self.transport.send(request.body(body)).await?;
                Ok(parse_json::<FileVersion>(response).await?)
            })
            .await
            .map_err(|f| failure_reason(f, None))
    }

    async fn upload_large(
        &self,
        file: &LocalFile<'_>,
        bucket_id: &str,
        dest_name: &str,
        plan: PartPlan,
        progress: TransferProgress,
        cancel: &CancellationToken,
    ) -> Result<FileVersion, UploadErrorReason> {
        let mut file_info = HashMap::new();
        if let Some(millis) = file.modified_millis {
            file_info.insert(SRC_LAST_MODIFIED_INFO.to_string(), millis.to_string());
        }
        let start = StartLargeFileRequest {
            bucket_id: bucket_id.to_string(),
            file_name: dest_name.to_string(),
            content_type: file.content_type.clone(),
            file_info,
        };
        let started: FileVersion = self
            .policy
            .run("start_large_file", cancel, |_| self.transport.call_api("b2_start_large_file", &start))
            .await
            .map_err(|f| failure_reason(f.map_source(AttemptError::Transport), None))?;
        let file_id = started
            .file_id
            .ok_or_else(|| TransportError::InvalidResponse("b2_start_large_file returned no fileId".into()))?;
        info!(file_id, parts = plan.parts.len(), part_size = plan.part_size, "started large file");

        let result = self.upload_parts_and_finish(file, &file_id, &plan, progress, cancel).await;
        if result.is_err() {
            self.cancel_large_file(&file_id).await;
        }
        result
    }

    async fn upload_parts_and_finish(
        &self,
        file: &LocalFile<'_>,
        file_id: &str,
        plan: &PartPlan,
        progress: TransferProgress,
        cancel: &CancellationToken,
    ) -> Result<FileVersion, UploadErrorReason> {
        let shared = Arc::new(LargeFileUpload {
            transport: self.transport.clone(),
            policy: self.policy.clone(),
            path: file.path.to_path_buf(),
            file_id: file_id.to_string(),
            read_buffer_size: self.read_buffer_size,
            progress,
            idle_urls: Mutex::new(Vec::new()),
        });

        let mut workers = BoundedJoinSet::new(self.upload_concurrency);
        for part in plan.parts.iter().copied() {
            workers.spawn(shared.clone().upload_part(part, cancel.child_token()));
        }

        let mut part_sha1s = BTreeMap::new();
        let failure = loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => break Some(UploadErrorReason::Cancelled),
                joined = workers.join_next() => joined,
            };
            match joined {
                None => break None,
                Some(Ok(Ok((part_number, sha1)))) => {
                    part_sha1s.insert(part_number, sha1);
                },
                Some(Ok(Err(reason))) => break Some(reason),
                Some(Err(join_error)) => break Some(UploadErrorReason::TaskFailed(join_error)),
            }
        };

        if let Some(reason) = failure {
            workers.abort_all();
            return Err(reason);
        }

        if part_sha1s.len() != plan.parts.len() {
            return Err(TransportError::InvalidResponse(format!(
                "{} of {} parts completed",
                part_sha1s.len(),
                plan.parts.len()
            ))
            .into());
        }

        let finish = FinishLargeFileRequest {
            file_id: file_id.to_string(),
            part_sha1_array: part_sha1s.into_values().collect(),
        };
        self.policy
            .run("finish_large_file", cancel, |_| self.transport.call_api("b2_finish_large_file", &finish))
            .await
            .map_err(|f| failure_reason(f.map_source(AttemptError::Transport), None))
    }

    /// Best effort: a failure here is logged and never replaces the error that caused it.
    async fn cancel_large_file(&self, file_id: &str) {
        let request = CancelLargeFileRequest {
            file_id: file_id.to_string(),
        };
        match self
            .transport
            .call_api::<_, CancelLargeFileResponse>("b2_cancel_large_file", &request)
            .await
        {
            Ok(_) => info!(file_id, "cancelled large file"),
            Err(e) => warn!(file_id, "failed to cancel large file: {e}"),
        }
    }
}

struct LocalFile<'a> {
    path: &'a Path,
    size: u64,
    modified_millis: Option<u128>,
    content_type: String,
}
