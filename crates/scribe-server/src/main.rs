mod cli;
mod config;
mod http;
mod nats;
mod remote;
mod serve;
mod worker;

use clap::Parser;
use cli::{Cli, Commands};
use config::ScribeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ScribeConfig::load_or_default(&cli.config)?;
    cli.apply_overrides(&mut config);

    match cli.command {
        Commands::Serve => serve::run(config).await,
        Commands::Process(args) => serve::process_one(config, args).await,
        Commands::Config => {
            let rendered = toml::to_string_pretty(&config)?;
            println!("{}", rendered);
            Ok(())
        }
    }
}
