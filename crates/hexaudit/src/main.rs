#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! hexaudit - encrypted audit trail daemon
//!
//! This daemon provides:
//! - AES-256-GCM encrypted SQLite audit trail
//! - HTTP API for recording, querying and exporting audit logs
//! - Scheduled retention sweeps

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hexaudit::api;
use hexaudit::audit::{AuditService, SqliteAuditStore, SystemClock};
use hexaudit::config::Config;
use hexaudit::logging::config::LoggingConfig;
use hexaudit::logging::CategoryLogger;
use hexaudit::state::AppState;

fn normalize_host_for_listen(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string()
}

fn parse_listen_host_port(listen: &str) -> anyhow::Result<(String, u16)> {
    let listen = listen.trim();

    if let Ok(addr) = listen.parse::<SocketAddr>() {
        return Ok((addr.ip().to_string(), addr.port()));
    }

    if let Some(rest) = listen.strip_prefix('[') {
        let end = rest.find(']').ok_or_else(|| {
            anyhow::anyhow!("Invalid listen address {listen:?}: missing closing ']'")
        })?;
        let host = &rest[..end];
        let port_str = rest[end + 1..].strip_prefix(':').ok_or_else(|| {
            anyhow::anyhow!("Invalid listen address {listen:?}: expected :PORT after ]")
        })?;
        let port: u16 = port_str
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {listen:?}: invalid port: {e}"))?;
        return Ok((host.to_string(), port));
    }

    let idx = listen
        .rfind(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid listen address {listen:?}: expected HOST:PORT"))?;
    let host = &listen[..idx];
    let port_str = &listen[idx + 1..];
    let port: u16 = port_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address {listen:?}: invalid port: {e}"))?;
    Ok((host.to_string(), port))
}

fn format_listen(host: &str, port: u16) -> String {
    let host = normalize_host_for_listen(host);
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[derive(Parser)]
#[command(name = "hexaudit")]
#[command(about = "Encrypted audit trail daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default)
    Start {
        /// Listen address (HOST:PORT)
        #[arg(short, long)]
        listen: Option<String>,

        /// Port, keeping the configured host
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load_default()?
    };

    // Override log level from CLI
    let log_level = match cli.verbose {
        0 => config.tracing_level(),
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            log_level,
        ))
        .init();

    match cli.command {
        None | Some(Commands::Start { .. }) => {
            // Apply CLI overrides
            if let Some(Commands::Start { listen, port }) = cli.command {
                if let Some(listen) = listen {
                    config.listen = listen;
                }
                if let Some(port) = port {
                    let host = parse_listen_host_port(&config.listen)?.0;
                    config.listen = format_listen(&host, port);
                }
            }

            config.validate()?;
            run_daemon(config).await
        }

        Some(Commands::ShowConfig) => {
            let yaml = serde_yaml::to_string(&config.redacted())?;
            println!("{}", yaml);
            Ok(())
        }
    }
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let environment = config.environment();
    tracing::info!(
        listen = %config.listen,
        audit_db = %config.audit_db.display(),
        logging_config = %config.logging_config.display(),
        environment = %environment,
        "Starting hexaudit"
    );

    // Logging config falls back to defaults; the audit key does not.
    let logging = Arc::new(LoggingConfig::load_or_default(&config.logging_config));
    let logger = Arc::new(CategoryLogger::new(logging, environment));

    let store = SqliteAuditStore::open(&config.audit_db)?;
    let audit = AuditService::initialize(
        Arc::new(store),
        logger,
        Arc::new(SystemClock),
        config.retention.schedule(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Audit log initialization failed: {e}"))?;
    let audit = Arc::new(audit);

    let sweeper = audit.spawn_sweeper();
    let auth_store = config.load_auth_store().await?;
    if !config.auth.enabled {
        tracing::warn!(
            listen = %config.listen,
            "API authentication is disabled; any local caller can read audit logs"
        );
    }

    // Create application state
    let state = AppState::new(config.clone(), Arc::clone(&audit), auth_store);

    // Create router
    let app = api::create_router(state.clone());

    // Parse listen address
    let addr: SocketAddr = config.listen.parse()?;

    // Create listener
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Listening");

    // Setup signal handlers for graceful shutdown
    let shutdown_signal = async move {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    tracing::error!(error = %err, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        tracing::info!("Shutdown signal received");
    };

    // Run server
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    sweeper.shutdown().await;

    // Log final stats
    let total = audit.count().await.unwrap_or(0);
    tracing::info!(
        audit_rows = total,
        uptime_secs = state.uptime_secs(),
        "Daemon stopped"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listen_host_port_handles_ipv6() {
        let (host, port) = parse_listen_host_port("[::1]:9876").expect("parse");
        assert_eq!(host, "::1");
        assert_eq!(port, 9876);
    }

    #[test]
    fn parse_listen_host_port_handles_hostname() {
        let (host, port) = parse_listen_host_port("localhost:9876").expect("parse");
        assert_eq!(host, "localhost");
        assert_eq!(port, 9876);
    }

    #[test]
    fn format_listen_brackets_ipv6_hosts() {
        assert_eq!(format_listen("::1", 9876), "[::1]:9876");
        assert_eq!(format_listen("[::1]", 9876), "[::1]:9876");
    }

    #[test]
    fn cli_parses_start_overrides() {
        let cli = Cli::try_parse_from(["hexaudit", "-vv", "start", "--listen", "0.0.0.0:8080"])
            .expect("parse");
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Some(Commands::Start { listen: Some(ref l), port: None }) if l == "0.0.0.0:8080"
        ));
    }
}
