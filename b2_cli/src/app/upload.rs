use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use b2_client::{B2ClientError, UploadErrorReason, UploadOptions};
use clap::Args;
use colored::Colorize;
use walkdir::WalkDir;

use super::CommandContext;
use crate::{output, progress};

#[derive(Args, Debug)]
pub(crate) struct UploadArg {
    /// Upload in parts even if the file is small enough for a single request.
    #[clap(short, long)]
    parts: bool,

    /// Content type of the uploaded files instead of guessing from the file extension.
    #[clap(short, long, value_name = "content-type")]
    content_type: Option<String>,

    /// Upload directories recursively.
    #[clap(short, long)]
    recursive: bool,

    /// The file (or directory, with `-r`) to upload.
    #[clap(value_name = "file")]
    file: PathBuf,

    /// The bucket to upload into.
    #[clap(value_name = "bucket")]
    bucket: String,

    /// Destination name relative to the root of the bucket. A trailing `/` keeps the local name
    /// under that prefix.
    #[clap(value_name = "dest")]
    dest: Option<String>,
}

pub(crate) async fn upload_command(ctx: &mut CommandContext, args: UploadArg) -> Result<()> {
    let metadata = std::fs::metadata(&args.file).with_context(|| format!("cannot read {}", args.file.display()))?;

    let jobs = if metadata.is_dir() {
        if !args.recursive {
            bail!("{} is a directory; use -r to upload it recursively", args.file.display());
        }
        directory_jobs(&args.file, args.dest.as_deref())?
    } else {
        vec![(args.file.clone(), file_remote_name(&args.file, args.dest.as_deref())?)]
    };

    let bucket_id = ctx.bucket_id(&args.bucket).await?;
    let client = ctx.client()?;

    let mut failed = 0;
    for (path, remote_name) in &jobs {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let bar = progress::transfer_bar(ctx.show_progress, "Uploading", remote_name, size);
        let options = UploadOptions {
            content_type: args.content_type.clone(),
            force_multipart: args.parts,
            progress: Some(progress::bar_callback(&bar)),
        };

        let result = client.upload_file(path, &bucket_id, remote_name, &options, &ctx.cancel).await;
        bar.finish_and_clear();

        match result {
            Ok(version) => {
                let line = format!("Uploaded {} to {}!", output::size(version.content_length), version.file_name);
                println!("{}", line.green());
            },
            Err(B2ClientError::Upload(e)) if matches!(e.reason, UploadErrorReason::Cancelled) => {
                bail!("upload of {} interrupted", e.file_name);
            },
            Err(e) if jobs.len() == 1 => return Err(e.into()),
            Err(e) => {
                eprintln!("{}", format!("{}: {e}", path.display()).red());
                failed += 1;
            },
        }
    }

    if failed > 0 {
        bail!("{failed} of {} uploads failed", jobs.len());
    }
    Ok(())
}

/// Remote name of a single uploaded file.
fn file_remote_name(path: &Path, dest: Option<&str>) -> Result<String> {
    let local_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?;
    Ok(match dest {
        None | Some("") => local_name.to_string(),
        Some(dest) if dest.ends_with('/') => format!("{dest}{local_name}"),
        Some(dest) => dest.to_string(),
    })
}

/// Every file under `root` with its remote name: the path relative to `root`, under `dest` if
/// given and otherwise under the directory's own name.
fn directory_jobs(root: &Path, dest: Option<&str>) -> Result<Vec<(PathBuf, String)>> {
    let prefix = match dest {
        Some(dest) => dest.trim_end_matches('/').to_string(),
        None => root.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string(),
    };

    let mut jobs = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root)?;
        jobs.push((entry.path().to_path_buf(), remote_name(&prefix, relative)?));
    }
    Ok(jobs)
}

/// Joins `prefix` and the components of `relative` with `/`.
fn remote_name(prefix: &str, relative: &Path) -> Result<String> {
    let mut segments: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(
                segment
                    .to_str()
                    .ok_or_else(|| anyhow!("{} is not valid UTF-8", relative.display()))?,
            ),
            Component::CurDir => {},
            _ => bail!("unexpected path component in {}", relative.display()),
        }
    }
    Ok(segments.join("/"))
}
