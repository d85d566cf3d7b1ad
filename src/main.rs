//! # MKR5 Bridge
//!
//! Command-line front end for an MKR5 (DART) pump bus.
//!
//! # Examples
//!
//! ```bash
//! mkr5-bridge scan
//! mkr5-bridge --json status 0x50
//! mkr5-bridge prices 50h 1=1.599 2=1.649
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use mkr5_bridge::config::{Config, LoggingConfig};
use mkr5_bridge::mkr5::protocol::{parse_address, PriceEntry, PumpCommand};
use mkr5_bridge::pump::{CommandDispatcher, DeviceScanner, DispatchTimings};
use mkr5_bridge::serial::TransportSession;

/// Configuration file used when `--config` is not given, if present
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Parser)]
#[command(name = "mkr5-bridge", version)]
#[command(about = "Drive MKR5 fuel dispenser controllers over a serial bus")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial device, overrides the configuration
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the pumps on the bus
    Scan {
        #[arg(long, value_parser = address_arg)]
        min: Option<u8>,
        #[arg(long, value_parser = address_arg)]
        max: Option<u8>,
        /// Also read the last filling of every pump found
        #[arg(long)]
        filling: bool,
    },
    /// Read the pump state
    Status {
        #[arg(value_parser = address_arg)]
        address: u8,
    },
    /// Read the pump identity
    Identity {
        #[arg(value_parser = address_arg)]
        address: u8,
    },
    /// Read volume and amount of the last filling
    FillingInfo {
        #[arg(value_parser = address_arg)]
        address: u8,
    },
    /// Send a pump command (authorize, reset, stop, switch-off, parameters, ...)
    Command {
        #[arg(value_parser = address_arg)]
        address: u8,
        command: PumpCommand,
    },
    /// Program unit prices as NOZZLE=PRICE pairs
    Prices {
        #[arg(value_parser = address_arg)]
        address: u8,
        #[arg(required = true)]
        prices: Vec<PriceEntry>,
    },
}

fn address_arg(text: &str) -> std::result::Result<u8, String> {
    parse_address(text).map_err(|e| e.to_string())
}

/// Main entry point for MKR5 Bridge
///
/// Loads the configuration, opens the bus, runs one subcommand and closes
/// the bus again.
///
/// # Errors
///
/// Returns error if:
/// - The configuration cannot be loaded
/// - The serial port cannot be opened
/// - The port fails mid-exchange, or the addressed pump does not answer
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(port) = cli.port.clone() {
        config.serial.port = port;
    }

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&config.logging)?;

    info!("MKR5 Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let session = TransportSession::open(&config.serial)?;
    info!("Pump bus opened at: {}", session.device_path());

    let mut dispatcher = CommandDispatcher::new(session, DispatchTimings::from(&config.protocol));
    let outcome = run(&cli, &config, &mut dispatcher).await;

    dispatcher.into_session().close();
    outcome
}

async fn run<P>(cli: &Cli, config: &Config, dispatcher: &mut CommandDispatcher<P>) -> Result<()>
where
    P: mkr5_bridge::serial::port_trait::SerialPortIO,
{
    match &cli.command {
        Commands::Scan { min, max, filling } => {
            let mut range = config.scan.clone();
            range.min_address = min.unwrap_or(range.min_address);
            range.max_address = max.unwrap_or(range.max_address);

            let mut scanner = DeviceScanner::new(dispatcher);
            let mut report = scanner.scan(&range).await?;
            if *filling {
                scanner.collect_filling_info(&mut report.pumps).await?;
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Scanned 0x{:02X}-0x{:02X}: {} pump(s) found",
                    report.min_address, report.max_address, report.total_pumps_found
                );
                for pump in &report.pumps {
                    println!(
                        "  0x{:02X}  {:<18} {}",
                        pump.address,
                        pump.status.name(),
                        pump.identity.as_deref().unwrap_or("-")
                    );
                    if let (Some(volume), Some(amount)) = (pump.filled_volume, pump.filled_amount) {
                        println!("        last filling: volume {:.3}, amount {:.2}", volume, amount);
                    }
                }
            }
        }
        Commands::Status { address } => {
            let Some(status) = dispatcher.status(*address).await? else {
                bail!("No response from pump 0x{:02X}", address);
            };
            print_value(cli.json, *address, "status", json!(status), status.name());
        }
        Commands::Identity { address } => {
            let Some(identity) = dispatcher.identity(*address).await? else {
                bail!("No response from pump 0x{:02X}", address);
            };
            print_value(cli.json, *address, "identity", json!(identity), &identity);
        }
        Commands::FillingInfo { address } => {
            let Some(info) = dispatcher.get_filling_information(*address).await? else {
                bail!("No response from pump 0x{:02X}", address);
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!(
                    "Pump 0x{:02X}: volume {:.3}, amount {:.2}",
                    address, info.filled_volume, info.filled_amount
                );
                if let (Some(nozzle), Some(out), Some(price)) =
                    (info.nozzle_number, info.is_nozzle_out, info.filling_price)
                {
                    let state = if out { "out" } else { "in" };
                    println!("  nozzle {} ({}), price {:.3}", nozzle, state, price);
                }
            }
        }
        Commands::Command { address, command } => {
            let Some(reply) = dispatcher.query(*address, *command).await? else {
                bail!("No response from pump 0x{:02X} to {}", address, command);
            };
            let kind = reply.response().kind();
            print_value(cli.json, *address, "response", json!(kind), kind);
        }
        Commands::Prices { address, prices } => {
            if dispatcher.update_prices(*address, prices).await?.is_none() {
                bail!("Pump 0x{:02X} did not acknowledge the price update", address);
            }
            print_value(cli.json, *address, "prices_updated", json!(prices.len()), "prices updated");
        }
    }

    Ok(())
}

fn print_value(as_json: bool, address: u8, field: &str, value: serde_json::Value, text: &str) {
    if as_json {
        println!("{}", json!({ "address": format!("0x{:02X}", address), field: value }));
    } else {
        println!("Pump 0x{:02X}: {}", address, text);
    }
}

/// Explicit path must load; otherwise the default file is used if it exists
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("Failed to load configuration from {}", DEFAULT_CONFIG_PATH)),
        None => Ok(Config::default()),
    }
}

/// Console logging to stderr, plus a daily file when `log_dir` is set
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log level")?;

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "mkr5-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}
