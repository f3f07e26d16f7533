//! Binary entrypoint for the Loragate CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the gateway, connecting to a LoStik radio
//! - `init` - create a starter `config.toml`
//! - `status` - print a summary of the mailbox
//!
//! See the library crate docs for module-level details: `loragate::`.
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use loragate::config::Config;
use loragate::gateway::{Gateway, GatewayLock};
use loragate::radio::{Arbiter, RadioSession, SerialTransport};
use loragate::storage::MailboxStore;

#[derive(Parser)]
#[command(name = "loragate")]
#[command(about = "A mailbox gateway for LoStik LoRa radios")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Start {
        /// LoStik serial port (e.g., /dev/ttyUSB0); overrides the config
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Initialize a new gateway configuration
    Init,
    /// Show mailbox status and statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging (except for Init which writes defaults later)
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { port } => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting Loragate v{}", env!("CARGO_PKG_VERSION"));

            let _lock = GatewayLock::acquire(&config.gateway.lock_file)?;
            let store = MailboxStore::open(MailboxStore::path_under(&config.storage.data_dir))?;

            // Port resolution: CLI overrides config; empty config means autodetect.
            let port_path = match port {
                Some(cli_port) => cli_port,
                None if !config.radio.port.is_empty() => config.radio.port.clone(),
                None => {
                    let detected = SerialTransport::detect_port()?;
                    info!("Autodetected LoStik on {}", detected);
                    detected
                }
            };

            let transport = SerialTransport::open(
                &port_path,
                config.radio.baud_rate,
                Duration::from_millis(config.radio.read_timeout_ms),
            )?;
            info!("Connected to LoStik on {}", port_path);

            let mut session = RadioSession::new(transport, config.radio.clone());
            session.initialize()?;
            info!(
                "Radio session ready (firmware: {})",
                session.firmware().unwrap_or("unknown")
            );

            let mut gateway = Gateway::new(Arbiter::new(session), store, config.gateway.clone());

            let shutdown = gateway.shutdown_flag();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for ctrl-c: {}", e);
                    return;
                }
                warn!("Interrupt received, shutting down");
                shutdown.store(true, Ordering::Relaxed);
            });

            gateway.run().await?;
        }
        Commands::Init => {
            info!("Initializing new gateway configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            info!("Edit the [station] id before joining the mesh");
        }
        Commands::Status => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let store = MailboxStore::open(MailboxStore::path_under(&config.storage.data_dir))?;
            let summary = store.summary()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => match config.as_ref().map(|c| c.logging.level.as_str()) {
            Some("debug") => log::LevelFilter::Debug,
            Some("trace") => log::LevelFilter::Trace,
            Some("warn") => log::LevelFilter::Warn,
            Some("error") => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        },
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    if let Some(file) = config.as_ref().and_then(|c| c.logging.file.clone()) {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

            // If stdout is a terminal, echo log lines there as well.
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        } else {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
