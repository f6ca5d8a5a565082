use std::path::PathBuf;

use anyhow::{bail, Result};
use b2_client::{B2Client, Credentials};
use b2_config::B2Config;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::account::AccountConfig;
use crate::constants::{CURRENT_VERSION, PROGRAM_NAME};

mod authorise;
mod download;
mod listing;
mod upload;

#[derive(Subcommand, Debug)]
#[non_exhaustive]
enum Command {
    /// Authorise your B2 account. Prompts for the application key unless it is given as options.
    #[clap(alias = "authorize")]
    Authorise(authorise::AuthoriseArg),

    /// List the buckets (also refreshes the bucket cache).
    ListBuckets(listing::ListBucketsArg),

    /// Show files in a bucket.
    Ls(listing::LsArg),

    /// Upload a file to a bucket. Without `dest` the file keeps its own name.
    Upload(upload::UploadArg),

    /// Download a file from a bucket.
    Download(download::DownloadArg),

    /// Print a file from a bucket to stdout.
    Cat(download::CatArg),
}

#[derive(Args, Debug)]
struct CliOverrides {
    /// Account state file. Defaults to `<config dir>/b2/config.toml`.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Don't draw progress bars.
    #[clap(long, short, global = true)]
    quiet: bool,

    /// Write logs to this file, or into this directory if it ends with a `/`.
    #[clap(long, global = true)]
    log: Option<String>,
}

/// Command-line client for Backblaze B2 cloud storage.
#[derive(Parser, Debug)]
#[clap(name = PROGRAM_NAME, version = CURRENT_VERSION, propagate_version = true)]
pub struct B2App {
    #[clap(flatten)]
    overrides: CliOverrides,

    #[clap(subcommand)]
    command: Command,
}

impl B2App {
    /// Configuration from the environment with the command line applied on top.
    pub fn config(&self) -> B2Config {
        let mut config = B2Config::new();
        if let Some(log) = &self.overrides.log {
            config.log.dest = Some(log.clone());
        }
        config
    }

    pub async fn run(self, config: B2Config) -> Result<()> {
        let account_path = match self.overrides.config {
            Some(path) => path,
            None => AccountConfig::default_path()?,
        };
        let account = AccountConfig::load(&account_path)?;

        let cancel = CancellationToken::new();
        let interrupt = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted");
                    cancel.cancel();
                }
            }
        });

        let mut ctx = CommandContext {
            config,
            account,
            account_path,
            client: None,
            cancel,
            show_progress: !self.overrides.quiet,
        };

        let result = self.command.run(&mut ctx).await;
        interrupt.abort();

        // Keep a refreshed session and bucket cache even if the command failed.
        if let Err(e) = ctx.persist().await {
            if result.is_ok() {
                return Err(e);
            }
            warn!("failed to save account state: {e:#}");
        }
        result
    }
}

impl Command {
    async fn run(self, ctx: &mut CommandContext) -> Result<()> {
        debug!(command = self.name(), "running");
        match self {
            Command::Authorise(args) => authorise::authorise_command(ctx, args).await,
            Command::ListBuckets(args) => listing::list_buckets_command(ctx, args).await,
            Command::Ls(args) => listing::ls_command(ctx, args).await,
            Command::Upload(args) => upload::upload_command(ctx, args).await,
            Command::Download(args) => download::download_command(ctx, args).await,
            Command::Cat(args) => download::cat_command(ctx, args).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::Authorise(_) => "authorise",
            Command::ListBuckets(_) => "list-buckets",
            Command::Ls(_) => "ls",
            Command::Upload(_) => "upload",
            Command::Download(_) => "download",
            Command::Cat(_) => "cat",
        }
    }
}

/// State shared by one command: configuration, persisted account state and the client built
/// from it.
pub(crate) struct CommandContext {
    config: B2Config,
    account: AccountConfig,
    account_path: PathBuf,
    client: Option<B2Client>,
    cancel: CancellationToken,
    show_progress: bool,
}

impl CommandContext {
    /// The client for the stored account, seeded with the stored session.
    fn client(&mut self) -> Result<B2Client> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let credentials = self.account.credentials();
        if credentials.is_none() && self.account.session.is_none() {
            bail!("no account is configured; run `{PROGRAM_NAME} authorise` first");
        }
        let client = B2Client::new(&self.config.client, credentials, self.account.session.clone())?;
        self.client = Some(client.clone());
        Ok(client)
    }

    /// Authorises `credentials` and makes them the stored account.
    async fn authorise(&mut self, credentials: Credentials) -> Result<()> {
        let client = B2Client::new(&self.config.client, Some(credentials.clone()), None)?;
        let session = client.session().await?;
        self.account.set_credentials(&credentials, Some((*session).clone()));
        self.client = Some(client);
        Ok(())
    }

    /// Resolves a bucket name through the cache, asking the service on a miss.
    async fn bucket_id(&mut self, bucket_name: &str) -> Result<String> {
        if let Some(id) = self.account.buckets.get(bucket_name) {
            return Ok(id.clone());
        }
        let bucket = self.client()?.find_bucket(bucket_name).await?;
        self.account.buckets.insert(bucket.bucket_name, bucket.bucket_id.clone());
        Ok(bucket.bucket_id)
    }

    async fn persist(&mut self) -> Result<()> {
        if let Some(client) = &self.client {
            if let Some(session) = client.auth().current_session().await {
                self.account.session = Some((*session).clone());
            }
        }
        self.account.save(&self.account_path)
    }
}
