#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use subtrack::{gateway, Config};
use tracing_subscriber::EnvFilter;

/// Subscription tracker account service.
#[derive(Parser, Debug)]
#[command(name = "subtrack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config.toml (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, overrides [gateway] host
    #[arg(long)]
    host: Option<String>,

    /// Port, overrides [gateway] port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("subtrack=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.gateway.host = host;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    config.validate()?;

    tracing::debug!(?config, "Configuration loaded");
    gateway::run_gateway(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_overrides_parse() {
        let cli = Cli::try_parse_from(["subtrack", "--config", "/etc/subtrack.toml", "--port", "8080"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/subtrack.toml")));
        assert_eq!(cli.port, Some(8080));
        assert!(cli.host.is_none());
    }
}
