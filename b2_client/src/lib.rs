#![cfg_attr(feature = "strict", deny(warnings))]

pub use auth::{AllowedBucket, AuthManager, Credentials, Session};
pub use b2_client::B2Client;
pub use download::{DownloadEngine, DownloadOutcome, DownloadTarget};
pub use download_sink::{create_output_file, default_output_path, DownloadSink};
pub use error::{
    AuthError, B2ClientError, DownloadError, DownloadErrorReason, Result, TransportError, UploadError,
    UploadErrorReason,
};
pub use http_client::{Api, Transport};
pub use listing::{Page, PageSource, Paginator};
pub use part_planner::{PartPlan, PartSpec};
pub use progress::ProgressCallback;
pub use retry_utils::{RetryFailure, RetryPolicy};
pub use upload::{content_type_for, UploadEngine, UploadOptions};

mod auth;
mod b2_client;
mod download;
mod download_sink;
pub mod error;
pub mod http_client;
pub mod listing;
mod part_planner;
mod progress;
pub mod retry_utils;
mod upload;
