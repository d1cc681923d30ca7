//! owlink tunnel client entry point.
//!
//! # Usage
//!
//! ```text
//! owlink-client [OPTIONS] <COMMAND>
//!
//! Commands:
//!   list      Enumerate devices on the remote bus
//!   present   Check whether one address is on the bus
//!   ping      Round-trip to the server
//!   probe     Find servers with the multicast beacon
//!
//! Options:
//!   --config <PATH>      Config file [default: platform config dir]
//!   --server <HOST:PORT> Tunnel server
//!   --secret <SECRET>    Shared secret
//!   --log-level <LEVEL>  Used when RUST_LOG is unset
//! ```
//!
//! `--server`, `--secret` and `--config` can also be set through
//! `OWLINK_SERVER`, `OWLINK_SECRET` and `OWLINK_CONFIG`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use owlink_client::application::check_presence::check_presence;
use owlink_client::application::list_devices::{list_devices, SearchFilter};
use owlink_client::infrastructure::config::{default_config_path, load_config, ClientConfig};
use owlink_client::infrastructure::network::discovery::probe_multicast;
use owlink_client::TunnelClient;
use owlink_core::{FamilyRegistry, OwnerId, RomId};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// owlink tunnel client.
#[derive(Debug, Parser)]
#[command(
    name = "owlink-client",
    about = "Drive a remote 1-Wire adapter through an owlink tunnel",
    version
)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long, global = true, env = "OWLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Tunnel server as `host:port`.
    #[arg(long, global = true, env = "OWLINK_SERVER")]
    server: Option<String>,

    /// Shared secret.  Overrides `secret` and `[host_secrets]`.
    #[arg(long, global = true, env = "OWLINK_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enumerate devices on the remote bus.
    List {
        /// Only this family (hex, e.g. `28`).  Repeatable.
        #[arg(long = "family", value_parser = parse_family)]
        families: Vec<u8>,

        /// Never this family (hex).  Repeatable.
        #[arg(long = "exclude", value_parser = parse_family)]
        exclude: Vec<u8>,

        /// Only devices with the alarm flag set.
        #[arg(long)]
        alarm: bool,
    },

    /// Check whether one address is on the bus.
    Present {
        /// 16 hex digits, CRC byte first.
        address: RomId,
    },

    /// Round-trip to the server.
    Ping,

    /// Find servers with the multicast beacon.
    Probe {
        /// How long to wait for answers, in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn parse_family(text: &str) -> Result<u8, String> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid family {text:?}: {e}"))
}

impl Cli {
    fn load(&self) -> anyhow::Result<ClientConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => default_config_path().context("no --config given")?,
        };
        let mut config =
            load_config(&path).with_context(|| format!("failed to load {}", path.display()))?;
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut ClientConfig) {
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        if let Some(secret) = &self.secret {
            config.secret = secret.clone();
            config.host_secrets.clear();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Probe { timeout_ms } => {
            let timeout = Duration::from_millis(timeout_ms.unwrap_or(config.multicast.probe_timeout_ms));
            let servers = probe_multicast(&config.multicast.group, config.multicast.port, timeout)?;
            if servers.is_empty() {
                println!("no servers answered");
            }
            for server in servers {
                println!("{server}");
            }
        }
        Command::Ping => {
            let client = connect(&config)?;
            let started = Instant::now();
            client.ping()?;
            println!("{}: {:?}", client.server(), started.elapsed());
        }
        Command::Present { address } => {
            let client = connect(&config)?;
            let presence = check_presence(&client, OwnerId::new(), address)?;
            let state = match (presence.present, presence.alarming) {
                (false, _) => "absent",
                (true, false) => "present",
                (true, true) => "present, alarming",
            };
            println!("{address}: {state}");
        }
        Command::List {
            families,
            exclude,
            alarm,
        } => {
            let client = connect(&config)?;
            let owner = OwnerId::new();
            let filter = SearchFilter {
                include: families,
                exclude,
                alarm_only: alarm,
            };
            let listing = list_devices(&client, owner, &filter, &FamilyRegistry::default())?;
            for device in &listing {
                let crc = if device.crc_valid { "" } else { "  (bad CRC)" };
                println!("{}  {:<10} {}{crc}", device.address, device.name, device.description);
            }
            info!(count = listing.len(), "devices listed");
        }
    }
    Ok(())
}

fn connect(config: &ClientConfig) -> anyhow::Result<TunnelClient> {
    TunnelClient::connect(config.tunnel_options())
        .with_context(|| format!("could not open tunnel to {}", config.server))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
