//! ParkClient - line-based client for the parking reservation server
//!
//! Connects to the server on request, prints every line it sends, and
//! forwards typed lines as reservation requests.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parkclient::config::{Config, ConfigManager};
use parkclient::terminal::{self, Command, Terminal};
use parkclient::{display, ConnectionManager, ShutdownCoordinator};

/// CLI arguments for ParkClient
#[derive(Parser, Debug)]
#[command(name = "parkclient")]
#[command(about = "ParkClient - line-based client for the parking reservation server")]
#[command(version)]
#[command(long_about = "
ParkClient - line-based client for the parking reservation server

Lines typed on stdin are sent to the server; lines from the server are
printed as they arrive. Type /help once running for the command list.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  PARKCLIENT_HOST            - Server host (e.g., localhost)
  PARKCLIENT_PORT            - Server port (e.g., 12345)
  PARKCLIENT_CONNECT_TIMEOUT - Connect timeout (e.g., 10s)
  PARKCLIENT_LOG_LEVEL       - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "parkclient.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Server host (overrides config file)
    #[arg(long, help = "Server host")]
    pub host: Option<String>,

    /// Server port (overrides config file)
    #[arg(short, long, help = "Server port")]
    pub port: Option<u16>,

    /// Connect timeout in seconds
    #[arg(long, help = "Connect timeout in seconds")]
    pub timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Connect as soon as the client starts
    #[arg(long, help = "Connect on start-up")]
    pub connect: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.host.as_deref(),
        args.port,
        args.timeout,
        args.log_level.as_deref(),
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&args, &config)?;

    info!("Starting ParkClient v{}", env!("CARGO_PKG_VERSION"));

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Server: {}", config.server.endpoint());
        info!("  Connect timeout: {:?}", config.server.connect_timeout);
        info!("  Read buffer size: {} bytes", config.client.read_buffer_size);
        info!("  Max line length: {} bytes", config.client.max_line_length);
        info!("  Shutdown timeout: {:?}", config.client.shutdown_timeout);
        info!("  Log level: {}", config.logging.log_level);
        return Ok(());
    }

    run(config, args.connect).await
}

async fn run(config: Config, connect_on_start: bool) -> Result<()> {
    let config = Arc::new(config);
    let (display, receiver) = display::channel();

    let renderer = tokio::spawn(terminal::render_loop(
        receiver,
        config.client.server_prefix.clone(),
        tokio::io::stdout(),
    ));

    let manager = Arc::new(ConnectionManager::new(Arc::clone(&config), display.clone()));
    let coordinator = ShutdownCoordinator::new(config.client.shutdown_timeout);
    let front_end = Terminal::new(Arc::clone(&manager), display.clone());

    info!("Server endpoint: {}", config.server.endpoint());
    display.notice(format!(
        "Endpoint {} (type /connect to connect, /help for commands)",
        config.server.endpoint()
    ));

    if connect_on_start {
        front_end.execute(Command::Connect).await;
    }

    let input = terminal::spawn_stdin_reader();
    let shutdown_rx = coordinator.subscribe();

    tokio::select! {
        _ = front_end.run(input, shutdown_rx) => {
            info!("Input loop finished");
        }
        result = coordinator.listen_for_signals() => {
            if let Err(e) = result {
                error!("Error setting up signal handlers: {}", e);
            }
        }
    }

    if let Err(e) = coordinator.shutdown_connection_manager(&manager).await {
        warn!("{}", e);
    }

    // The render loop ends once every display handle is gone
    drop(front_end);
    drop(manager);
    drop(display);

    match tokio::time::timeout(Duration::from_secs(1), renderer).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!("Display output failed: {}", e),
        Ok(Err(e)) => error!("Render task failed: {}", e),
        Err(_) => warn!("Render task did not finish in time"),
    }

    info!("ParkClient shutdown complete");
    Ok(())
}

/// Initialize tracing/logging on stderr so it stays out of the display
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.logging.log_level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
