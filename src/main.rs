//! Burrow CLI - expose a private HTTP service through a public relay
//!
//! `burrow relay` runs the public side, `burrow agent` runs next to the
//! private service and keeps the tunnel connection open.

use anyhow::{Context, Result};
use burrow_agent::{Agent, AgentConfig, AgentError, ReconnectConfig};
use burrow_auth::{hash_credential, AccessController};
use burrow_relay::{config::DEFAULT_MAX_BODY_BYTES, RelayConfig, RelayServer, TakeoverPolicy};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Burrow - tunnel HTTP requests to a service behind NAT
#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(about = "Tunnel public HTTP requests to a private service over one WebSocket")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level or filter directive (overrides --verbose)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the public relay
    #[command(long_about = r#"
Run the public relay. Agents connect to /ws?token=<access token>; every other
request is forwarded to the attached agent.

EXAMPLES:
  burrow relay --bind 0.0.0.0:8080 --access-token $ACCESS_TOKEN

  # Keep only a digest of the token in the environment
  burrow relay --access-token-hash "$(burrow hash-token)"

ENVIRONMENT VARIABLES:
  BURROW_BIND        Bind address
  ACCESS_TOKEN       Shared access token
  ACCESS_TOKEN_HASH  Argon2id digest of the access token
    "#)]
    Relay(RelayArgs),

    /// Connect to a relay and serve tunneled requests from a local service
    #[command(long_about = r#"
Connect to a relay and forward every tunneled request to a local HTTP service.
Reconnects automatically when the connection drops.

EXAMPLES:
  burrow agent --relay wss://relay.example.com --token $ACCESS_TOKEN \
    --local http://127.0.0.1:3000

ENVIRONMENT VARIABLES:
  BURROW_RELAY   Relay base URL
  ACCESS_TOKEN   Shared access token
  BURROW_LOCAL   Local service base URL
    "#)]
    Agent(AgentArgs),

    /// Print the Argon2id digest of an access token (reads stdin if not given)
    HashToken {
        #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

#[derive(Parser, Debug)]
struct RelayArgs {
    /// Address for public requests and agent connections
    #[arg(long, env = "BURROW_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Shared access token agents must present
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Argon2id digest of the access token (see `burrow hash-token`)
    #[arg(
        long,
        env = "ACCESS_TOKEN_HASH",
        hide_env_values = true,
        conflicts_with = "access_token"
    )]
    access_token_hash: Option<String>,

    /// Seconds a public request waits for the agent's reply
    #[arg(long, default_value = "60")]
    request_timeout: u64,

    /// Drop an agent connection silent for this many seconds (0 = never)
    #[arg(long, default_value = "90")]
    idle_timeout: u64,

    /// Seconds between keepalive pings to the agent (0 = disabled)
    #[arg(long, default_value = "30")]
    keepalive_interval: u64,

    /// Largest accepted public request body in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,

    /// Refuse new agents while one is attached instead of replacing it
    #[arg(long)]
    keep_existing: bool,
}

#[derive(Parser, Debug)]
struct AgentArgs {
    /// Relay base URL (e.g., wss://relay.example.com)
    #[arg(long, env = "BURROW_RELAY")]
    relay: String,

    /// Shared access token
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    token: String,

    /// Base URL of the local service
    #[arg(long, env = "BURROW_LOCAL", default_value = "http://127.0.0.1:3000")]
    local: String,

    /// Seconds to wait for the local service
    #[arg(long, default_value = "55")]
    local_timeout: u64,

    /// Maximum consecutive reconnection attempts (0 = infinite)
    #[arg(long, default_value = "0")]
    max_reconnect_attempts: usize,

    /// Initial reconnection delay in seconds
    #[arg(long, default_value = "1")]
    reconnect_delay: u64,

    /// Maximum reconnection delay in seconds
    #[arg(long, default_value = "60")]
    max_reconnect_delay: u64,
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool, log_level: Option<&str>) -> Result<()> {
    let log_level = log_level.unwrap_or(if verbose { "debug" } else { "info" });

    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// Load variables from `.env` (or the given file) without overriding the real environment
///
/// A missing file is not an error.
fn load_dotenv(path: Option<&Path>) -> Result<Option<PathBuf>, dotenvy::Error> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path).map(|()| path.to_path_buf()),
        None => dotenvy::dotenv(),
    };
    match loaded {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn report_dotenv(dotenv: &Result<Option<PathBuf>, dotenvy::Error>) {
    match dotenv {
        Ok(Some(path)) => debug!("Loaded environment from {}", path.display()),
        Ok(None) => debug!("No .env file found"),
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

async fn run_relay(args: RelayArgs) -> Result<()> {
    let access = match (args.access_token_hash, args.access_token) {
        (Some(digest), _) => {
            AccessController::from_digest(digest).context("Invalid --access-token-hash")?
        }
        (None, Some(token)) => {
            AccessController::new(&token).context("Invalid --access-token")?
        }
        (None, None) => anyhow::bail!(
            "An access token is required (use --access-token, --access-token-hash or ACCESS_TOKEN)"
        ),
    };

    let config = RelayConfig {
        bind_addr: args.bind,
        request_timeout: Duration::from_secs(args.request_timeout.max(1)),
        idle_timeout: seconds(args.idle_timeout),
        keepalive_interval: seconds(args.keepalive_interval),
        max_body_bytes: args.max_body_bytes,
        takeover_policy: if args.keep_existing {
            TakeoverPolicy::KeepExisting
        } else {
            TakeoverPolicy::Preempt
        },
    };

    info!("Request timeout: {}s", config.request_timeout.as_secs());
    info!("Takeover policy: {:?}", config.takeover_policy);

    RelayServer::new(config, Arc::new(access))
        .start()
        .await
        .context("Relay server failed")
}

async fn run_agent(args: AgentArgs) -> Result<()> {
    let config = AgentConfig {
        relay_url: args.relay,
        token: args.token,
        local_url: args.local,
        local_timeout: Duration::from_secs(args.local_timeout),
        reconnect: ReconnectConfig {
            initial_backoff: Duration::from_secs(args.reconnect_delay),
            max_backoff: Duration::from_secs(args.max_reconnect_delay),
            max_attempts: (args.max_reconnect_attempts > 0).then_some(args.max_reconnect_attempts),
            ..ReconnectConfig::default()
        },
    };

    info!("Relay: {}", config.relay_url);
    info!("Local service: {}", config.local_url);

    let agent = Agent::new(config).context("Failed to create agent")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
        result = agent.run() => match result {
            Ok(()) => Ok(()),
            Err(AgentError::Superseded) => {
                warn!("Tunnel taken over by another agent");
                Err(AgentError::Superseded.into())
            }
            Err(e) => {
                error!("Agent stopped: {}", e);
                Err(e.into())
            }
        },
    }
}

fn hash_token(token: Option<String>) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read token from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };

    let digest = hash_credential(&token).context("Failed to hash token")?;
    println!("{}", digest);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before clap reads `env` fallbacks
    let dotenv = load_dotenv(None);
    let cli = Cli::parse();

    match cli.command {
        Commands::HashToken { token } => hash_token(token),
        Commands::Relay(args) => {
            setup_logging(cli.verbose, cli.log_level.as_deref())?;
            report_dotenv(&dotenv);
            run_relay(args).await
        }
        Commands::Agent(args) => {
            setup_logging(cli.verbose, cli.log_level.as_deref())?;
            report_dotenv(&dotenv);
            run_agent(args).await
        }
    }
}
