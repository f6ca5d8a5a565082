use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWrite};

/// Where downloaded bytes go.
///
/// A sink that can be rewound lets the download engine start over when a server ignores a resume
/// range; an append-only sink makes that case an error.
#[async_trait]
pub trait DownloadSink: AsyncWrite + Send + Unpin {
    /// Discards everything written so far. Returns false if the sink can't do that.
    async fn restart(&mut self) -> io::Result<bool> {
        Ok(false)
    }
}

#[async_trait]
impl DownloadSink for File {
    async fn restart(&mut self) -> io::Result<bool> {
        self.set_len(0).await?;
        self.rewind().await?;
        Ok(true)
    }
}

#[async_trait]
impl DownloadSink for Vec<u8> {
    async fn restart(&mut self) -> io::Result<bool> {
        self.clear();
        Ok(true)
    }
}

#[async_trait]
impl DownloadSink for tokio::io::Stdout {}

/// Creates (or truncates) the destination file of a download, creating parent directories.
pub async fn create_output_file(path: impl AsRef<Path>) -> io::Result<File> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    File::create(path).await
}

/// Destination file name for `remote_name` when none was given: its last path segment.
pub fn default_output_path(remote_name: &str) -> PathBuf {
    let base = remote_name.rsplit('/').find(|s| !s.is_empty()).unwrap_or(remote_name);
    PathBuf::from(base)
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn test_file_restart_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.bin");
        let mut file = create_output_file(&path).await.unwrap();

        file.write_all(b"partial data").await.unwrap();
        assert!(file.restart().await.unwrap());
        file.write_all(b"ok").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_buffer_restart_and_stdout() {
        let mut buf = b"abc".to_vec();
        assert!(buf.restart().await.unwrap());
        assert!(buf.is_empty());

        let mut stdout = tokio::io::stdout();
        assert!(!stdout.restart().await.unwrap());
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(default_output_path("a/b/c.txt"), PathBuf::from("c.txt"));
        assert_eq!(default_output_path("plain"), PathBuf::from("plain"));
        assert_eq!(default_output_path("dir/"), PathBuf::from("dir"));
    }
}
