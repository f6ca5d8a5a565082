use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use b2_client::{create_output_file, default_output_path, B2ClientError, DownloadErrorReason};
use clap::Args;
use colored::Colorize;
use dialoguer::Confirm;
use tracing::warn;

use super::CommandContext;
use crate::{output, progress};

#[derive(Args, Debug)]
pub(crate) struct DownloadArg {
    /// The file to write to. Defaults to the last segment of the remote name in the current
    /// directory.
    #[clap(short = 'O', long, value_name = "file")]
    output: Option<PathBuf>,

    /// The bucket to download from.
    #[clap(value_name = "bucket")]
    bucket: String,

    /// The name of the file in the bucket.
    #[clap(value_name = "file")]
    file: String,
}

#[derive(Args, Debug)]
pub(crate) struct CatArg {
    /// Print the file even if it is not text.
    #[clap(short, long)]
    force: bool,

    /// The bucket to read from.
    #[clap(value_name = "bucket")]
    bucket: String,

    /// The name of the file in the bucket.
    #[clap(value_name = "file")]
    file: String,
}

pub(crate) async fn download_command(ctx: &mut CommandContext, args: DownloadArg) -> Result<()> {
    let client = ctx.client()?;
    let output_path = args.output.unwrap_or_else(|| default_output_path(&args.file));
    let mut file = create_output_file(&output_path)
        .await
        .with_context(|| format!("cannot create {}", output_path.display()))?;

    let bar = progress::transfer_bar(ctx.show_progress, "Downloading", &args.file, 0);
    let result = client
        .download_file(&args.bucket, &args.file, &mut file, Some(progress::bar_callback(&bar)), &ctx.cancel)
        .await;
    bar.finish_and_clear();
    drop(file);

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            discard_failed_output(&output_path, &e);
            return Err(e.into());
        },
    };

    let line = format!("Downloaded {} to {}!", output::size(outcome.bytes_written), output_path.display());
    println!("{}", line.green());
    Ok(())
}

/// Removes the output of a failed download. Bytes that failed verification stay for inspection;
/// anything else is incomplete.
fn discard_failed_output(path: &Path, error: &B2ClientError) {
    if matches!(error, B2ClientError::Download(d) if matches!(d.reason, DownloadErrorReason::Corrupt(_))) {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {},
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %path.display(), "failed to remove incomplete download: {e}"),
    }
}

pub(crate) async fn cat_command(ctx: &mut CommandContext, args: CatArg) -> Result<()> {
    let client = ctx.client()?;
    let mut content: Vec<u8> = Vec::new();
    client
        .download_file(&args.bucket, &args.file, &mut content, None, &ctx.cancel)
        .await?;

    let mut stdout = std::io::stdout();
    match String::from_utf8(content) {
        Ok(text) => stdout.write_all(text.as_bytes())?,
        Err(e) => {
            let print = args.force
                || !stdout.is_terminal()
                || Confirm::new()
                    .with_prompt("This file is not plain text. Print it anyway?")
                    .default(false)
                    .interact()?;
            if !print {
                eprintln!("Exiting.");
                return Ok(());
            }
            stdout.write_all(e.as_bytes())?;
        },
    }
    stdout.flush()?;
    Ok(())
}
