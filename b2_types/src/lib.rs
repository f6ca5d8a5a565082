//! Request and response bodies of the B2 native API (v3) as consumed by the client.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod headers;
pub use headers::*;

/// Path prefix of every API call, relative to the `apiUrl` of a session.
pub const API_PREFIX: &str = "/b2api/v3";

/// B2 rejects large files with more parts than this.
pub const MAX_PART_COUNT: u64 = 10_000;

/// Error codes that mean the session token must be replaced.
pub const EXPIRED_AUTH_TOKEN: &str = "expired_auth_token";
pub const BAD_AUTH_TOKEN: &str = "bad_auth_token";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeAccountResponse {
    pub account_id: String,
    pub api_info: ApiInfo,
    pub authorization_token: String,
    #[serde(default)]
    pub application_key_expiration_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiInfo {
    pub storage_api: StorageApiInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageApiInfo {
    pub absolute_minimum_part_size: u64,
    pub api_url: String,
    #[serde(default)]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub download_url: String,
    #[serde(default)]
    pub minimum_part_size: Option<u64>,
    #[serde(default)]
    pub name_prefix: Option<String>,
    pub recommended_part_size: u64,
    #[serde(default)]
    pub s3_api_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BucketType {
    AllPublic,
    AllPrivate,
    Snapshot,
    Shared,
    Restricted,
    #[serde(other)]
    Unknown,
}

impl BucketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllPublic => "allPublic",
            Self::AllPrivate => "allPrivate",
            Self::Snapshot => "snapshot",
            Self::Shared => "shared",
            Self::Restricted => "restricted",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub account_id: String,
    pub bucket_id: String,
    pub bucket_name: String,
    pub bucket_type: BucketType,
    #[serde(default)]
    pub bucket_info: serde_json::Value,
    #[serde(default)]
    pub revision: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBucketsRequest {
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBucketsResponse {
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    /// A completed upload.
    Upload,
    /// A hide marker; the name looks deleted.
    Hide,
    /// A large file that was started and neither finished nor cancelled.
    Start,
    /// A virtual folder, only returned when listing with a delimiter.
    Folder,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Hide => "hide",
            Self::Start => "start",
            Self::Folder => "folder",
        }
    }
}

/// One file version as returned by listings, uploads and `b2_finish_large_file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileVersion {
    #[serde(default)]
    pub account_id: Option<String>,
    pub action: FileAction,
    #[serde(default)]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub content_length: u64,
    #[serde(default)]
    pub content_sha1: Option<String>,
    #[serde(default)]
    pub content_md5: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub file_info: HashMap<String, String>,
    pub file_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub upload_timestamp: DateTime<Utc>,
}

impl FileVersion {
    /// The SHA1 of the whole content, if the server knows it.
    ///
    /// Large files report `"none"` as their content SHA1 and may carry the real value in the
    /// `large_file_sha1` file info entry.
    pub fn whole_file_sha1(&self) -> Option<&str> {
        match self.content_sha1.as_deref() {
            Some(s) if s != "none" => Some(s.strip_prefix("unverified:").unwrap_or(s)),
            _ => self.file_info.get(LARGE_FILE_SHA1_INFO).map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFileNamesRequest {
    pub bucket_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFileNamesResponse {
    pub files: Vec<FileVersion>,
    #[serde(default)]
    pub next_file_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFileVersionsRequest {
    pub bucket_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFileVersionsResponse {
    pub files: Vec<FileVersion>,
    #[serde(default)]
    pub next_file_name: Option<String>,
    #[serde(default)]
    pub next_file_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUploadUrlRequest {
    pub bucket_id: String,
}

/// An upload target for single-shot uploads or for parts of one large file. The token is only
/// valid for this URL and must not be shared between concurrent uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrl {
    #[serde(default)]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
    pub upload_url: String,
    pub authorization_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUploadPartUrlRequest {
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartLargeFileRequest {
    pub bucket_id: String,
    pub file_name: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub file_info: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPartResponse {
    pub file_id: String,
    pub part_number: u32,
    pub content_length: u64,
    pub content_sha1: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishLargeFileRequest {
    pub file_id: String,
    pub part_sha1_array: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelLargeFileRequest {
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelLargeFileResponse {
    pub file_id: String,
    #[serde(default)]
    pub account_id: Option<String>,
    pub bucket_id: String,
    pub file_name: String,
}

/// The JSON body of every non-2xx API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub status: u16,
    pub code: String,
    #[serde(default)]
    pub message: String,
}
