//! Handshake Signal Relay
//!
//! HTTP signaling relay for peer-to-peer connection setup.
//!
//! # Usage
//!
//! ```bash
//! # JSON files under ./storage (default)
//! handshake-relay --port 8080
//!
//! # SQLite persistence
//! handshake-relay --storage sqlite --data-dir /var/lib/handshake
//!
//! # Print a sample config file
//! handshake-relay --print-config > ~/.config/handshake/config.toml
//!
//! # Persist flags into the config file
//! handshake-relay --storage sqlite --port 9000 --save-config
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use handshake_core::{Config, LoggingConfig, StorageBackend, SystemClock};
use handshake_relay::{AppState, RelayServer};

#[derive(Parser, Debug)]
#[command(name = "handshake-relay")]
#[command(about = "Signaling relay for peer-to-peer connection setup")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "HANDSHAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "HANDSHAKE_PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long, env = "HANDSHAKE_BIND")]
    bind: Option<IpAddr>,

    /// Storage backend: memory, json or sqlite
    #[arg(short, long, env = "HANDSHAKE_STORAGE")]
    storage: Option<StorageBackend>,

    /// Directory for store files
    #[arg(short, long, env = "HANDSHAKE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Print a sample configuration file and exit
    #[arg(long)]
    print_config: bool,

    /// Write the effective configuration (file plus flags) back to the
    /// config path and exit
    #[arg(long)]
    save_config: bool,
}

impl Args {
    /// Load the config file, then let flags override it
    fn into_config(self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load(),
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(backend) = self.storage {
            config.storage.backend = backend;
        }
        if let Some(dir) = self.data_dir {
            config.storage.dir = dir;
        }
        if self.log_json {
            config.logging.json = true;
        }

        Ok(config)
    }
}

fn init_logging(logging: &LoggingConfig) {
    let default_directive = logging
        .filter
        .as_deref()
        .and_then(|f| f.parse::<Directive>().ok())
        .unwrap_or_else(|| Level::INFO.into());

    let filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .from_env_lossy();

    if logging.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", Config::sample());
        return Ok(());
    }

    let save_path = match (args.save_config, &args.config) {
        (false, _) => None,
        (true, Some(path)) => Some(path.clone()),
        (true, None) => Some(Config::default_path().ok_or("No config directory available")?),
    };

    let config = args.into_config()?;
    init_logging(&config.logging);

    if let Some(path) = save_path {
        config.save_to(&path)?;
        println!("Saved config to {}", path.display());
        return Ok(());
    }

    let addr = SocketAddr::new(config.server.bind, config.server.port);

    info!("Starting Handshake Signal Relay");
    info!(
        "Message TTL {}s, presence TTL {}s, max {} messages",
        config.relay.message_ttl_secs, config.relay.presence_ttl_secs, config.relay.max_messages
    );
    if config.storage.backend == StorageBackend::Memory {
        warn!("Using in-memory storage (no persistence)");
    }

    let state = AppState::from_config(&config, Arc::new(SystemClock))?;
    let server = RelayServer::new(state);
    server.serve(addr).await?;

    info!("Relay stopped");
    Ok(())
}
