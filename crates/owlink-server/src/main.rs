//! owlink tunnel server entry point.
//!
//! Loads the TOML config, applies CLI / environment overrides, builds the
//! adapter to expose and serves it until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! owlink-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>              Config file [default: platform config dir]
//!   --bind <ADDR>                Listen address
//!   --port <PORT>                Listen port
//!   --secret <SECRET>            Shared secret
//!   --socket-timeout-secs <N>    Per-connection read timeout, 0 = none
//!   --single-threaded            Serve one connection at a time
//!   --multicast                  Answer multicast beacon probes
//!   --log-level <LEVEL>          Used when RUST_LOG is unset
//!   --init-config                Write a default config file and exit
//! ```
//!
//! Every option except the two flags can also be set through an `OWLINK_*`
//! environment variable; the command line wins when both are present.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()              -- file, then CLI overrides
//!  └─ LocalAdapter<SimulatedBus>  -- devices from [[simulated_devices]]
//!  └─ start services
//!       ├─ TunnelServer::run     (blocking thread, accept loop)
//!       └─ beacon responder      (UDP background thread, optional)
//! ```

use std::path::PathBuf;
use std::sync::{atomic::Ordering, Arc};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use owlink_core::{BusAdapter, LocalAdapter};
use owlink_server::infrastructure::network::discovery::{start_beacon_responder, BeaconConfig};
use owlink_server::infrastructure::storage::config::{
    default_config_path, load_config, save_config, ServerConfig,
};
use owlink_server::{ServerOptions, TunnelServer};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// owlink tunnel server.
///
/// Exposes a 1-Wire adapter to remote clients over authenticated TCP.
#[derive(Debug, Parser)]
#[command(
    name = "owlink-server",
    about = "Expose a 1-Wire adapter over an authenticated TCP tunnel",
    version
)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long, env = "OWLINK_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to listen on.
    #[arg(long, env = "OWLINK_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "OWLINK_PORT")]
    port: Option<u16>,

    /// Shared secret clients must prove knowledge of.
    #[arg(long, env = "OWLINK_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Per-connection read timeout in seconds.  `0` blocks forever.
    /// Defaults to 30 when multithreaded and 0 with `--single-threaded`.
    #[arg(long, env = "OWLINK_SOCKET_TIMEOUT")]
    socket_timeout_secs: Option<u64>,

    /// Serve one connection at a time instead of one thread per connection.
    #[arg(long)]
    single_threaded: bool,

    /// Answer multicast beacon probes.
    #[arg(long)]
    multicast: bool,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "OWLINK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write a default config file to `--config` (or the default path) and exit.
    #[arg(long)]
    init_config: bool,
}

impl Cli {
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => default_config_path().context("no --config given"),
        }
    }

    /// Overwrites config values with whatever was given on the command line.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(secret) = &self.secret {
            config.auth.secret = secret.clone();
        }
        if let Some(timeout) = self.socket_timeout_secs {
            config.server.socket_timeout_secs = Some(timeout);
        }
        if self.single_threaded {
            config.server.multithreaded = false;
        }
        if self.multicast {
            config.multicast.enabled = true;
        }
        if let Some(level) = &self.log_level {
            config.server.log_level = level.clone();
        }
    }
}

fn server_options(config: &ServerConfig) -> anyhow::Result<ServerOptions> {
    Ok(ServerOptions {
        listen: config
            .server
            .listen_address()
            .context("invalid [server] bind_address / port")?,
        secret: config.auth.secret.as_bytes().to_vec(),
        multithreaded: config.server.multithreaded,
        socket_timeout: config.server.socket_timeout(),
    })
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = cli.config_path()?;

    if cli.init_config {
        let mut config = ServerConfig::default();
        cli.apply(&mut config);
        save_config(&path, &config)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let mut config =
        load_config(&path).with_context(|| format!("failed to load {}", path.display()))?;
    cli.apply(&mut config);

    // Structured logging.  `RUST_LOG` wins over the configured level.
    let fallback = config.server.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&fallback))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(config = %path.display(), "owlink server starting");

    let adapter: Arc<dyn BusAdapter> =
        Arc::new(LocalAdapter::new("simulated", config.simulated_bus()));
    info!(
        devices = config.simulated_devices.len(),
        "serving simulated bus"
    );

    let server = TunnelServer::bind(server_options(&config)?, adapter)?;
    let running = server.running_flag();

    // ── Beacon responder ──────────────────────────────────────────────────────
    if config.multicast.enabled {
        let beacon = BeaconConfig::new(
            &config.multicast.group,
            config.multicast.port,
            server.local_addr()?.port(),
        )?;
        if let Err(e) = start_beacon_responder(beacon, Arc::clone(&running)) {
            error!("failed to start beacon responder: {e}");
        }
    }

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl-C: {e}"),
        }
    });

    info!("owlink server ready.  Press Ctrl-C to exit.");

    // The accept loop and sessions are blocking std::net code.
    tokio::task::spawn_blocking(move || server.run())
        .await
        .context("accept loop panicked")??;

    info!("owlink server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
