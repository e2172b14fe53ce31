//! pvemcp server
//!
//! MCP server over stdio that runs commands in Proxmox VMs (guest agent),
//! LXC containers (SSH + `pct exec`) and on cluster nodes (SSH).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use eyre::{WrapErr, eyre};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

mod config;
mod factory;
mod format;
mod server;
mod tools;

use config::{Config, LogFormat, LoggingSection};
use factory::Services;
use server::McpServer;
use tools::Tools;

#[derive(Parser)]
#[command(name = "pvemcp", version)]
#[command(about = "MCP server for running commands on Proxmox guests and nodes", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `pvemcp_core=trace`; overrides RUST_LOG and the config file
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate the configuration, print a summary and exit
    #[arg(long)]
    check_config: bool,
}

/// Logs go to stderr or a file; stdout carries JSON-RPC only
fn init_tracing(logging: &LoggingSection, level_override: Option<&str>) -> Result<()> {
    let filter = match level_override {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?,
    };

    let (writer, ansi) = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("cannot open log file {}", path.display()))?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);
    match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| eyre!("failed to initialize logging: {e}"))
}

fn print_summary(path: &Path, config: &Config, services: &Services) {
    eprintln!("Configuration OK: {}", path.display());
    eprintln!(
        "  • API: https://{}:{}/api2/json ({}, verify_ssl={})",
        config.proxmox.host, config.proxmox.port, config.proxmox.service, config.proxmox.verify_ssl
    );
    eprintln!("  • Token: {}!{}", config.auth.user, config.auth.token_name);
    match &config.ssh {
        Some(ssh) if services.ssh_enabled => eprintln!(
            "  • SSH: {}@<node>:{} (sudo={}, keep_alive={})",
            ssh.username, ssh.port, ssh.use_sudo, ssh.keep_alive
        ),
        _ => eprintln!("  • SSH: not configured (container and host commands disabled)"),
    }
    eprintln!(
        "  • Guest agent polling: every {} ms for up to {} s",
        config.exec.poll_interval_ms, config.exec.poll_budget_secs
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let path = config::locate(cli.config.as_deref())?;
    let config = Config::load(&path)?;
    init_tracing(&config.logging, cli.log_level.as_deref())?;
    info!(path = %path.display(), "configuration loaded");

    let services = factory::build(&config)?;
    if cli.check_config {
        print_summary(&path, &config, &services);
        return Ok(());
    }

    let server = Arc::new(McpServer::new(Tools::new(
        services.coordinator,
        services.inventory,
    )));
    info!(version = env!("CARGO_PKG_VERSION"), "serving MCP on stdio");
    server
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
        .wrap_err("stdio transport failed")?;
    info!("input closed, shutting down");
    Ok(())
}
