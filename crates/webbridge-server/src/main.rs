//! `webbridge` binary entrypoint.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use webbridge_config::{load_config, WebbridgeConfig};
use webbridge_protocol::MODEL_IDS;
use webbridge_server::{build_bridge, WebbridgeServer};

/// OpenAI-compatible API over the Claude and Copilot web apps
#[derive(Parser, Debug)]
#[command(name = "webbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: webbridge.{jsonc,json,yml,yaml} or ~/.config/webbridge/)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, overrides server.host
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides server.port
    #[arg(short, long)]
    port: Option<u16>,

    /// Run the browser without a window
    #[arg(long, conflicts_with = "headed")]
    headless: bool,

    /// Show the browser window (useful when logging in)
    #[arg(long)]
    headed: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn apply(&self, config: &mut WebbridgeConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.headless {
            config.browser.headless = true;
        }
        if self.headed {
            config.browser.headless = false;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Err(e) = run(cli).await {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    // Respect `RUST_LOG` if set; otherwise default to info.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    cli.apply(&mut config);

    let bridge = Arc::new(build_bridge(&config));
    let server = WebbridgeServer::new(bridge.clone());

    print_banner(&config);
    server
        .start(&config.server.host, config.server.port, shutdown_signal())
        .await?;

    let closed = bridge.coordinator().shutdown().await;
    info!(closed, "Browser sessions closed");
    Ok(())
}

fn print_banner(config: &WebbridgeConfig) {
    println!("{}", "webbridge".cyan().bold());
    println!("{}", "─".repeat(50).dimmed());
    println!(
        "{}: http://{}",
        "Listening".cyan(),
        config.server.bind_address().yellow()
    );
    println!(
        "{}: {}",
        "Browser".cyan(),
        if config.browser.headless {
            "headless".yellow()
        } else {
            "headed".yellow()
        }
    );
    println!(
        "{}: {}",
        "Max sessions".cyan(),
        config.server.max_sessions.to_string().yellow()
    );
    let models: Vec<&str> = MODEL_IDS.iter().map(|(id, _)| *id).collect();
    println!("{}: {}", "Models".cyan(), models.join(", ").dimmed());
    if config.login.command.is_none() {
        println!(
            "{}",
            "No login command configured; requests must carry cookies.".dimmed()
        );
    }
    println!("{}", "─".repeat(50).dimmed());
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from(["webbridge", "--port", "9999", "--headed"]);
        let mut config = WebbridgeConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(!config.browser.headless);
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_headless_and_headed_conflict() {
        assert!(Cli::try_parse_from(["webbridge", "--headless", "--headed"]).is_err());
    }

    #[test]
    fn test_json_log_format() {
        let cli = Cli::parse_from(["webbridge", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
