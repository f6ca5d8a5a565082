mod common;

use std::io::Write;

use b2_client::{create_output_file, B2Client, B2ClientError, DownloadError, DownloadErrorReason, UploadOptions};
use common::{random_bytes, sha1_hex, FakeB2};
use tokio_util::sync::CancellationToken;

async fn upload(client: &B2Client, name: &str, data: &[u8]) -> String {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(data).unwrap();
    tmp.flush().unwrap();
    client
        .upload_file(tmp.path(), "b1", name, &UploadOptions::default(), &CancellationToken::new())
        .await
        .unwrap()
        .file_id
        .unwrap()
}

async fn setup() -> (FakeB2, B2Client) {
    let fake = FakeB2::start().await;
    fake.add_bucket("b1", "bucket");
    let client = fake.client();
    (fake, client)
}

fn download_error(err: B2ClientError) -> DownloadError {
    match err {
        B2ClientError::Download(e) => e,
        other => panic!("expected a download error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_round_trip_small_file() {
    let (_fake, client) = setup().await;
    let data = random_bytes(700);
    upload(&client, "photos/a b.jpg", &data).await;

    let mut out: Vec<u8> = Vec::new();
    let outcome = client
        .download_file("bucket", "photos/a b.jpg", &mut out, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(out, data);
    assert_eq!(outcome.bytes_written, 700);
    assert_eq!(outcome.content_sha1, sha1_hex(&data));
    assert_eq!(outcome.content_type.as_deref(), Some("image/jpeg"));
}

#[tokio::test]
async fn test_round_trip_large_file_to_disk() {
    let (_fake, client) = setup().await;
    let data = random_bytes(2345);
    upload(&client, "big.bin", &data).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/dir/big.bin");
    let mut file = create_output_file(&path).await.unwrap();
    let outcome = client
        .download_file("bucket", "big.bin", &mut file, None, &CancellationToken::new())
        .await
        .unwrap();
    drop(file);

    assert_eq!(outcome.bytes_written, 2345);
    assert_eq!(std::fs::read(&path).unwrap(), data);
}

#[tokio::test]
async fn test_download_by_id() {
    let (_fake, client) = setup().await;
    upload(&client, "v.txt", b"first").await;
    let second = upload(&client, "v.txt", b"second").await;
    let first = client.list_file_versions("b1", None).collect_all().await.unwrap();
    let oldest = first.iter().find(|v| v.file_id.as_deref() != Some(second.as_str())).unwrap();

    let mut out: Vec<u8> = Vec::new();
    client
        .download_file_by_id(oldest.file_id.as_deref().unwrap(), &mut out, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(out, b"first");

    let mut out: Vec<u8> = Vec::new();
    client
        .download_file("bucket", "v.txt", &mut out, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(out, b"second");
}

#[tokio::test]
async fn test_missing_file_is_not_found() {
    let (fake, client) = setup().await;

    let err = client
        .download_file("bucket", "nothing-here", &mut Vec::<u8>::new(), None, &CancellationToken::new())
        .await
        .unwrap_err();
    let err = download_error(err);
    assert!(matches!(err.reason, DownloadErrorReason::NotFound));
    assert_eq!(fake.state().download_requests, 1);
}

#[tokio::test]
async fn test_checksum_mismatch_is_corrupt() {
    let (fake, client) = setup().await;
    let data = random_bytes(300);
    upload(&client, "c.bin", &data).await;
    fake.state().corrupt_download_sha1 = true;

    let mut out: Vec<u8> = Vec::new();
    let err = client
        .download_file("bucket", "c.bin", &mut out, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(download_error(err).reason, DownloadErrorReason::Corrupt(_)));
    // The bytes stay where they were written.
    assert_eq!(out, data);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (fake, client) = setup().await;
    upload(&client, "r.bin", b"retry me").await;
    fake.state().fail_downloads = 2;

    let mut out: Vec<u8> = Vec::new();
    client
        .download_file("bucket", "r.bin", &mut out, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(out, b"retry me");
    assert_eq!(fake.state().download_requests, 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let (fake, client) = setup().await;
    upload(&client, "r.bin", b"never arrives").await;
    fake.state().fail_downloads = 100;

    let err = client
        .download_file("bucket", "r.bin", &mut Vec::<u8>::new(), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(download_error(err).reason, DownloadErrorReason::Exhausted { attempts: 5, .. }));
    assert_eq!(fake.state().download_requests, 5);
}

#[tokio::test]
async fn test_cancelled_download() {
    let (_fake, client) = setup().await;
    upload(&client, "x", b"data").await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client
        .download_file("bucket", "x", &mut Vec::<u8>::new(), None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(download_error(err).reason, DownloadErrorReason::Cancelled));
}

#[tokio::test]
async fn test_progress_reaches_total() {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    let (_fake, client) = setup().await;
    let data = random_bytes(1500);
    upload(&client, "p.bin", &data).await;

    let seen = Arc::new(AtomicU64::new(0));
    let seen_cb = seen.clone();
    let callback: b2_client::ProgressCallback = Arc::new(move |_delta, completed, _total| {
        seen_cb.fetch_max(completed, Ordering::Relaxed);
    });

    client
        .download_file("bucket", "p.bin", &mut Vec::<u8>::new(), Some(callback), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::Relaxed), 1500);
}
