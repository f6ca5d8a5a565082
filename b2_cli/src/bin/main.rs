use b2_cli::app::B2App;
use b2_cli::CURRENT_VERSION;
use b2_logging::{init_logging, LoggingConfig};
use clap::Parser;
use colored::Colorize;

#[tokio::main]
async fn main() {
    let app = B2App::parse();
    let config = app.config();
    init_logging(LoggingConfig::new(CURRENT_VERSION.to_string(), &config.log));

    if let Err(e) = app.run(config).await {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}
