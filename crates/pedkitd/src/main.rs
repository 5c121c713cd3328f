//! pedkitd: PED key injection daemon and operator tool
//!
//! Usage:
//!   pedkitd [--config /etc/pedkit/config.toml] <command>
//!
//! Commands:
//!   serve               - answer the host protocol on the serial link / TCP port
//!   keys list|check|delete|check-all
//!                       - key inventory and deletion safety
//!   kek status|generate|rotate
//!                       - storage KEK in the platform keychain
//!   ceremony            - assemble a key from 2 or 3 custodian components
//!   migrate             - seal legacy plaintext key material under the KEK

mod commands;
mod daemon;
mod services;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pedkit_core::config::PedkitConfig;
use pedkit_core::KeyAlgorithm;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "pedkitd", version, about = "PED key injection daemon")]
struct Cli {
    /// Path to pedkit.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "PEDKIT_CONFIG",
        default_value = "/etc/pedkit/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides daemon.log_level
    #[arg(long, env = "PEDKIT_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides daemon.log_format
    #[arg(long, env = "PEDKIT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the host protocol until Ctrl-C
    Serve {
        /// Serial device, overriding link.device
        #[arg(long)]
        device: Option<PathBuf>,
        /// TCP listen address, overriding link.listen
        #[arg(long)]
        listen: Option<String>,
    },

    /// Key inventory and deletion safety
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Storage KEK management
    Kek {
        #[command(subcommand)]
        action: KekAction,
    },

    /// Assemble a key from custodian components entered at this terminal
    Ceremony {
        /// Number of custodians (2 or 3); defaults to ceremony.default_custodians
        #[arg(long)]
        custodians: Option<u8>,
        /// Key algorithm (3DES_2KEY, 3DES_3KEY, AES_128, AES_192, AES_256)
        #[arg(long, default_value = "3DES_3KEY", value_parser = parse_algorithm)]
        algorithm: KeyAlgorithm,
        /// Assemble the storage KEK (always AES-256)
        #[arg(long)]
        kek: bool,
        /// Label stored with the record
        #[arg(long)]
        label: Option<String>,
    },

    /// Seal legacy plaintext key material under the active KEK
    Migrate,
}

#[derive(Subcommand, Debug)]
enum KeysAction {
    /// List every key record
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show whether one key may be deleted
    Check { kcv: String },
    /// Delete one key record after the safety check
    Delete { kcv: String },
    /// Show which keys would block a delete-all
    CheckAll,
}

#[derive(Subcommand, Debug)]
enum KekAction {
    /// Show the active KEK and how much material it protects
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Generate a fresh KEK and make it active
    Generate {
        /// Key length in bytes (16, 24 or 32); defaults to kek.default_length
        #[arg(long)]
        length: Option<usize>,
    },
    /// Replace the active KEK and reseal all stored material
    Rotate {
        #[arg(long)]
        length: Option<usize>,
    },
}

fn parse_algorithm(s: &str) -> Result<KeyAlgorithm, String> {
    s.parse().map_err(|e: pedkit_core::PedkitError| e.to_string())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, found) = load_config(&cli.config).await?;
    let level = cli
        .log
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli
        .log_format
        .unwrap_or(match config.daemon.log_format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        });
    init_logging(&level, format);

    if !found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    config
        .validate()
        .with_context(|| format!("invalid config {}", cli.config.display()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "pedkitd starting"
    );

    match cli.command {
        Commands::Serve { device, listen } => daemon::run(config, device, listen).await,
        Commands::Keys { action } => {
            let services = services::open(&config)?;
            match action {
                KeysAction::List { json } => commands::cmd_keys_list(&services, json),
                KeysAction::Check { kcv } => commands::cmd_keys_check(&services, &kcv),
                KeysAction::Delete { kcv } => commands::cmd_keys_delete(&services, &kcv),
                KeysAction::CheckAll => commands::cmd_keys_check_all(&services),
            }
        }
        Commands::Kek { action } => {
            let services = services::open(&config)?;
            match action {
                KekAction::Status { json } => commands::cmd_kek_status(&services, json),
                KekAction::Generate { length } => commands::cmd_kek_generate(
                    &services,
                    length.unwrap_or(config.kek.default_length),
                ),
                KekAction::Rotate { length } => commands::cmd_kek_rotate(
                    &services,
                    length.unwrap_or(config.kek.default_length),
                ),
            }
        }
        Commands::Ceremony {
            custodians,
            algorithm,
            kek,
            label,
        } => {
            let services = services::open(&config)?;
            let custodians = custodians.unwrap_or(config.ceremony.default_custodians);
            commands::cmd_ceremony(
                &services,
                &config.ceremony,
                custodians,
                algorithm,
                kek,
                label.as_deref(),
            )
        }
        Commands::Migrate => {
            let services = services::open(&config)?;
            commands::cmd_migrate(&services)
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Read the config file; the flag is false when it does not exist.
async fn load_config(path: &Path) -> Result<(PedkitConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((PedkitConfig::default(), false))
    }
}

/// Logs go to stderr; stdout carries command output.
fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
