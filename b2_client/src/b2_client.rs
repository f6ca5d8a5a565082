use std::path::Path;
use std::sync::Arc;

use b2_config::groups::client::ConfigValueGroup as ClientConfig;
use b2_types::{Bucket, FileVersion};
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthManager, Credentials, Session};
use crate::download::{DownloadEngine, DownloadOutcome};
use crate::download_sink::DownloadSink;
use crate::error::{B2ClientError, Result};
use crate::http_client::{build_reqwest_client, Transport};
use crate::listing::{BucketPages, FileNamePages, FileVersionPages, Paginator};
use crate::progress::ProgressCallback;
use crate::retry_utils::RetryPolicy;
use crate::upload::{UploadEngine, UploadOptions};

/// Entry point of the library: one session, one connection pool and the engines built on them.
#[derive(Clone)]
pub struct B2Client {
    transport: Transport,
    uploads: UploadEngine,
    downloads: DownloadEngine,
    list_page_size: u32,
}

impl B2Client {
    /// `cached_session` is used until the service rejects it; `credentials` are needed to get a
    /// new one.
    pub fn new(config: &ClientConfig, credentials: Option<Credentials>, cached_session: Option<Session>) -> Result<Self> {
        let client = build_reqwest_client(config)?;
        let mut auth = AuthManager::new(client.clone(), config.auth_endpoint.clone(), credentials);
        if let Some(session) = cached_session {
            auth = auth.with_session(session);
        }
        let transport = Transport::from_client(client, Arc::new(auth));
        Ok(Self::from_transport(config, transport))
    }

    pub fn from_transport(config: &ClientConfig, transport: Transport) -> Self {
        let policy = RetryPolicy::from_config(config);
        Self {
            uploads: UploadEngine::new(transport.clone(), policy.clone(), config),
            downloads: DownloadEngine::new(transport.clone(), policy),
            transport,
            list_page_size: config.list_page_size.clamp(1, 10_000),
        }
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        self.transport.auth()
    }

    pub async fn session(&self) -> Result<Arc<Session>> {
        Ok(self.transport.auth().session().await?)
    }

    pub fn uploads(&self) -> &UploadEngine {
        &self.uploads
    }

    pub fn downloads(&self) -> &DownloadEngine {
        &self.downloads
    }

    pub fn list_buckets(&self) -> Paginator<BucketPages> {
        Paginator::new(BucketPages::new(self.transport.clone(), None))
    }

    pub fn list_file_names(&self, bucket_id: &str, prefix: Option<&str>) -> Paginator<FileNamePages> {
        Paginator::new(FileNamePages::new(
            self.transport.clone(),
            bucket_id.to_string(),
            prefix.map(String::from),
            self.list_page_size,
        ))
    }

    pub fn list_file_versions(&self, bucket_id: &str, prefix: Option<&str>) -> Paginator<FileVersionPages> {
        Paginator::new(FileVersionPages::new(
            self.transport.clone(),
            bucket_id.to_string(),
            prefix.map(String::from),
            self.list_page_size,
        ))
    }

    /// Resolves a bucket name.
    pub async fn find_bucket(&self, bucket_name: &str) -> Result<Bucket> {
        let mut buckets = Paginator::new(BucketPages::new(self.transport.clone(), Some(bucket_name.to_string())));
        while let Some(bucket) = buckets.next().await? {
            if bucket.bucket_name == bucket_name {
                return Ok(bucket);
            }
        }
        Err(B2ClientError::BucketNotFound(bucket_name.to_string()))
    }

    pub async fn upload_file(
        &self,
        local_path: &Path,
        bucket_id: &str,
        dest_name: &str,
        options: &UploadOptions,
        cancel: &CancellationToken,
    ) -> Result<FileVersion> {
        Ok(self.uploads.upload(local_path, bucket_id, dest_name, options, cancel).await?)
    }

    pub async fn download_file<S: DownloadSink + ?Sized>(
        &self,
        bucket_name: &str,
        file_name: &str,
        sink: &mut S,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        Ok(self.downloads.download(bucket_name, file_name, sink, progress, cancel).await?)
    }

    pub async fn download_file_by_id<S: DownloadSink + ?Sized>(
        &self,
        file_id: &str,
        sink: &mut S,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        Ok(self.downloads.download_by_id(file_id, sink, progress, cancel).await?)
    }
}
