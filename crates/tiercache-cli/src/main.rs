mod cli;
mod commands;
mod output;

use anyhow::{Result, anyhow};
use clap::Parser;
use cli::{Cli, Commands};
use output::print_error;
use tiercache::config::loader;
use tiercache::observability;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    observability::init_tracing_with_level("warn");

    let cli = Cli::parse();

    let mut settings = loader::load_settings(cli.config.as_deref()).map_err(|e| anyhow!(e))?;
    if let Some(url) = cli.redis_url {
        settings.redis.url = url;
    }
    let level = if cli.verbose {
        "debug"
    } else {
        settings.logging.level.as_str()
    };
    observability::apply_logging_level(level);
    tracing::debug!(url = %settings.redis.url, "settings loaded");

    match cli.command {
        Commands::Get(args) => commands::cache::get(&settings, args).await,
        Commands::Set(args) => commands::cache::set(&settings, args).await,
        Commands::Remove(args) => commands::cache::remove(&settings, args).await,
        Commands::Clear(args) => commands::cache::clear(&settings, args).await,
        Commands::Keys(args) => commands::cache::keys(&settings, args).await,
        Commands::Watch => commands::watch::run(&settings).await,
    }
}
