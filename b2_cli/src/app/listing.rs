use anyhow::{bail, Result};
use b2_client::{PageSource, Paginator};
use b2_types::FileVersion;
use clap::Args;
use tokio_util::sync::CancellationToken;

use super::CommandContext;
use crate::output;

#[derive(Args, Debug)]
pub(crate) struct ListBucketsArg {
    /// Also print the bucket id and type.
    #[clap(short, long)]
    long: bool,
}

#[derive(Args, Debug)]
pub(crate) struct LsArg {
    /// Print size, upload date and name.
    #[clap(short, long)]
    long: bool,

    /// List every version of every file, not just the newest.
    #[clap(long)]
    versions: bool,

    /// Only list files whose names start with this prefix.
    #[clap(long)]
    prefix: Option<String>,

    /// Stop after this many entries.
    #[clap(short = 'n', long = "max-entries", value_name = "N")]
    max_entries: Option<usize>,

    /// The bucket to list.
    #[clap(value_name = "bucket")]
    bucket: String,
}

pub(crate) async fn list_buckets_command(ctx: &mut CommandContext, args: ListBucketsArg) -> Result<()> {
    let client = ctx.client()?;
    let buckets = tokio::select! {
        _ = ctx.cancel.cancelled() => bail!("interrupted"),
        r = client.list_buckets().collect_all() => r?,
    };

    ctx.account.buckets = buckets
        .iter()
        .map(|b| (b.bucket_name.clone(), b.bucket_id.clone()))
        .collect();

    for bucket in &buckets {
        println!("{}", output::bucket_line(bucket, args.long));
    }
    Ok(())
}

pub(crate) async fn ls_command(ctx: &mut CommandContext, args: LsArg) -> Result<()> {
    let bucket_id = ctx.bucket_id(&args.bucket).await?;
    let client = ctx.client()?;
    let limit = args.max_entries.unwrap_or(usize::MAX);
    let prefix = args.prefix.as_deref();

    if args.long {
        println!("{}", output::long_listing_header(args.versions));
    }
    let format = |file: &FileVersion| {
        if args.long {
            output::long_listing_entry(file, args.versions)
        } else {
            output::short_listing_entry(file)
        }
    };

    if args.versions {
        print_entries(client.list_file_versions(&bucket_id, prefix), limit, &ctx.cancel, format).await
    } else {
        print_entries(client.list_file_names(&bucket_id, prefix), limit, &ctx.cancel, format).await
    }
}

/// Prints up to `limit` entries, pulling pages only as they are needed.
async fn print_entries<S, F>(mut listing: Paginator<S>, limit: usize, cancel: &CancellationToken, format: F) -> Result<()>
where
    S: PageSource<Item = FileVersion>,
    F: Fn(&FileVersion) -> String,
{
    let mut shown = 0;
    while shown < limit {
        let next = tokio::select! {
            _ = cancel.cancelled() => bail!("interrupted"),
            r = listing.next() => r?,
        };
        let Some(file) = next else {
            break;
        };
        println!("{}", format(&file));
        shown += 1;
    }
    Ok(())
}

#[cfg(test)]
impl LsArg {
    pub(crate) fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    pub(crate) fn bucket(&self) -> &str {
        &self.bucket
    }
}
