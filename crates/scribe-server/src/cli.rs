use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "scribe")]
#[command(version, about = "Summarise documents as they land in a bucket and index the result")]
pub struct Cli {
    /// Path to scribe.toml
    #[arg(
        long,
        global = true,
        env = "SCRIBE_CONFIG",
        default_value = "scribe.toml"
    )]
    pub config: PathBuf,

    /// HTTP listen address (overrides config file)
    #[arg(long, global = true, env = "SCRIBE_HTTP_ADDR")]
    pub http_addr: Option<SocketAddr>,

    /// NATS URL; setting it enables the JetStream consumer
    #[arg(long, global = true, env = "NATS_URL")]
    pub nats_url: Option<String>,

    /// Summarisations allowed in flight (overrides config file)
    #[arg(long, global = true, env = "SCRIBE_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Credential for the summarisation service
    #[arg(long, global = true, env = "SCRIBE_MODEL_API_KEY", hide_env_values = true)]
    pub model_api_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the worker: HTTP API plus the NATS consumer when enabled
    Serve,
    /// Run a single object through the pipeline and print the outcome
    Process(ProcessArgs),
    /// Print the resolved configuration as TOML
    Config,
}

#[derive(Args, Debug)]
pub struct ProcessArgs {
    #[arg(long)]
    pub bucket: String,
    #[arg(long)]
    pub key: String,
}

impl Cli {
    /// Apply flag and env overrides on top of the file configuration.
    pub fn apply_overrides(&self, config: &mut crate::config::ScribeConfig) {
        if let Some(addr) = self.http_addr {
            config.server.http_addr = addr;
        }
        if let Some(url) = &self.nats_url {
            config.nats.url = url.clone();
            config.nats.enabled = true;
        }
        if let Some(max) = self.max_concurrency {
            config.pipeline.max_concurrency = max;
        }
        if let Some(key) = &self.model_api_key {
            config.model.api_key = Some(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScribeConfig;

    #[test]
    fn test_overrides_win_over_file() {
        let cli = Cli::parse_from([
            "scribe",
            "--max-concurrency",
            "4",
            "--nats-url",
            "nats://queue:4222",
            "process",
            "--bucket",
            "b1",
            "--key",
            "a.txt",
        ]);
        let mut config = ScribeConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.pipeline.max_concurrency, 4);
        assert!(config.nats.enabled);
        assert_eq!(config.nats.url, "nats://queue:4222");
        assert!(matches!(cli.command, Commands::Process(ref a) if a.key == "a.txt"));
    }
}
