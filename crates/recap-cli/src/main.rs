//! `recap-say` entry point - the composition root.

mod handlers;
mod parser;

use clap::Parser as _;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::parser::{Cli, Commands};

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "recap_voice=debug,recap_say=debug"
    } else {
        "warn"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Speak(args) => handlers::speak(args, cli.state_dir).await,
        Commands::Chunks(args) => handlers::chunks(&args),
    }
}
