use anyhow::Result;
use b2_client::Credentials;
use clap::Args;
use colored::Colorize;
use dialoguer::{Input, Password};

use super::CommandContext;

#[derive(Args, Debug)]
pub(crate) struct AuthoriseArg {
    /// The application key id. Prompted for if missing.
    #[clap(long)]
    key_id: Option<String>,

    /// The application key. Prompted for if missing.
    #[clap(long)]
    key: Option<String>,
}

pub(crate) async fn authorise_command(ctx: &mut CommandContext, args: AuthoriseArg) -> Result<()> {
    let key_id = match args.key_id {
        Some(key_id) => key_id,
        None => Input::<String>::new()
            .with_prompt("Backblaze application key ID")
            .interact_text()?,
    };
    let key = match args.key {
        Some(key) => key,
        None => Password::new().with_prompt("Backblaze application key").interact()?,
    };

    ctx.authorise(Credentials::new(key_id.trim(), key.trim())).await?;

    if let Some(allowed) = ctx.account.session.as_ref().and_then(|s| s.allowed.as_ref()) {
        let bucket = allowed.bucket_name.as_deref().unwrap_or(&allowed.bucket_id);
        eprintln!("{}", format!("This key is restricted to bucket `{bucket}`.").yellow());
    }
    println!("{}", "Authorised!".green());
    Ok(())
}
