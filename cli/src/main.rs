// uwblink: desktop command-line interface for UWBLink
//
// Encodes and decodes the BLE out-of-band block, scans for UWB peers over
// BLE, and runs an in-process two-device simulation of the full flow.

mod config;

use anyhow::{Context, Result};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::Manager;
use clap::{Parser, Subcommand};
use colored::*;
use futures::StreamExt;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uwblink_core::sim::{LoopbackRadio, SimulatedRangingProvider};
use uwblink_core::{
    display_short, ComplexChannel, DeviceHandle, DiscoveryLedger, ErrorKind, LocalIdentity,
    LocalSummary, Measurement, MeasurementDisplay, ParameterCodec, RangingEvent, RangingObserver,
    RangingService, Role, SessionState,
};

#[derive(Parser)]
#[command(name = "uwblink")]
#[command(about = "UWBLink: UWB ranging bootstrapped over BLE", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a local identity into the 7-byte advertisement block
    Encode {
        /// Local UWB address (decimal, signed form accepted)
        #[arg(short, long)]
        address: String,
        /// controller or controlee (defaults to the configured role)
        #[arg(short, long)]
        role: Option<String>,
        #[arg(short, long, default_value = "9")]
        channel: u8,
        #[arg(short, long, default_value = "10")]
        preamble: u8,
        /// Session id (defaults to the configured one)
        #[arg(short, long)]
        session_id: Option<u16>,
    },
    /// Decode a hex advertisement block
    Decode { hex: String },
    /// Scan for UWB peers advertising over BLE
    Scan {
        /// Scan window in seconds (defaults to the configured window)
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Run two simulated devices through discovery and ranging
    Simulate {
        #[arg(short, long, default_value = "10")]
        measurements: usize,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let _log_guard = init_logging(cli.verbose, config.log_file.as_deref())?;

    match cli.command {
        Commands::Encode {
            address,
            role,
            channel,
            preamble,
            session_id,
        } => cmd_encode(&config, &address, role, channel, preamble, session_id),
        Commands::Decode { hex } => cmd_decode(&hex),
        Commands::Scan { seconds } => cmd_scan(&config, seconds).await,
        Commands::Simulate { measurements } => cmd_simulate(&config, measurements).await,
        Commands::Config { action } => cmd_config(config, action),
    }
}

fn init_logging(
    verbose: bool,
    log_file: Option<&str>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
    };

    match log_file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file = path.file_name().context("Log file path has no file name")?;
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
            Ok(None)
        }
    }
}

fn parse_role(text: &str) -> Result<Role> {
    match text.to_ascii_lowercase().as_str() {
        "controller" | "server" => Ok(Role::Controller),
        "controlee" | "client" => Ok(Role::Controlee),
        other => anyhow::bail!("Unknown role '{}' (use controller or controlee)", other),
    }
}

fn cmd_encode(
    config: &config::Config,
    address: &str,
    role: Option<String>,
    channel: u8,
    preamble: u8,
    session_id: Option<u16>,
) -> Result<()> {
    let address = uwblink_core::service::parse_address(address)?;
    let role = match role {
        Some(text) => parse_role(&text)?,
        None => config.role,
    };
    let identity = match role {
        Role::Controller => LocalIdentity::Controller {
            address,
            channel: ComplexChannel::new(channel, preamble),
        },
        Role::Controlee => LocalIdentity::Controlee { address },
    };
    let session_id = session_id.unwrap_or(config.ranging.session_id);

    let bytes = ParameterCodec::encode(&identity, session_id);
    println!("{}", hex::encode(bytes).bright_yellow());
    Ok(())
}

fn cmd_decode(text: &str) -> Result<()> {
    let bytes = hex::decode(text.trim()).context("Input is not valid hex")?;
    let payload = ParameterCodec::decode(&bytes)?;

    println!("{}", "OOB Payload".bold());
    println!("  Address:        {}", display_short(payload.address).to_string().bright_cyan());
    println!("  Channel:        {}", payload.channel);
    println!("  Preamble Index: {}", payload.preamble_index);
    println!("  Session ID:     {}", display_short(payload.session_id));
    println!("  Is Controller:  {}", payload.is_controller);
    if bytes.len() > uwblink_core::OOB_PAYLOAD_LEN {
        println!(
            "  {} {} trailing byte(s) ignored",
            "note:".yellow(),
            bytes.len() - uwblink_core::OOB_PAYLOAD_LEN
        );
    }
    Ok(())
}

async fn cmd_scan(config: &config::Config, seconds: Option<u64>) -> Result<()> {
    let service_id = config.ranging.service_id()?;
    let window = seconds
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.ranging.scan_window());

    let manager = Manager::new().await.context("Failed to open Bluetooth")?;
    let central = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .context("No Bluetooth adapter found")?;

    let mut events = central.events().await?;
    central
        .start_scan(ScanFilter {
            services: vec![service_id],
        })
        .await
        .context("Failed to start BLE scan")?;

    println!(
        "{} for {}s (service {})",
        "Scanning".bold(),
        window.as_secs(),
        service_id
    );

    let mut ledger = DiscoveryLedger::new();

    let scan = async {
        while let Some(event) = events.next().await {
            // Only advertisements carrying our service data are listed
            let CentralEvent::ServiceDataAdvertisement { id, service_data } = event else {
                continue;
            };
            let Some(oob) = service_data.get(&service_id) else {
                continue;
            };
            let peripheral = match central.peripheral(&id).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!("Peripheral lookup failed: {}", e);
                    continue;
                }
            };
            let props = peripheral.properties().await.ok().flatten();
            let device = DeviceHandle::new(
                props
                    .as_ref()
                    .map(|p| p.address.to_string())
                    .unwrap_or_else(|| format!("{:?}", id)),
            );
            let name = props.and_then(|p| p.local_name);
            let Some(record) = ledger.observe(device, name, Some(oob.as_slice())) else {
                continue;
            };

            println!();
            println!("{}", record.display_text().bright_cyan());
        }
    };

    let _ = tokio::time::timeout(window, scan).await;
    central.stop_scan().await.context("Failed to stop BLE scan")?;

    println!();
    println!("{} {} peer(s) found", "✓".green(), ledger.len());
    Ok(())
}

/// Prints notifications of one simulated device
struct ConsoleObserver {
    label: ColoredString,
}

impl RangingObserver for ConsoleObserver {
    fn on_measurement(&self, _measurement: Measurement) {}

    fn on_display_changed(&self, display: MeasurementDisplay) {
        println!(
            "[{}] distance {} m  azimuth {}°  elevation {}°",
            self.label, display.distance, display.azimuth, display.elevation
        );
    }

    fn on_session_state_changed(&self, state: SessionState) {
        println!("[{}] session {}", self.label, state.to_string().bold());
    }

    fn on_peer_discovered(&self, display_text: String) {
        println!("[{}] discovered {}", self.label, display_text.replace('\n', " | "));
    }

    fn on_local_identity_changed(&self, summary: LocalSummary) {
        println!(
            "[{}] {}: {}",
            self.label,
            summary.title.bold(),
            summary.message.replace('\n', " | ")
        );
    }

    fn on_broadcast_state_changed(&self, advertising: bool) {
        println!("[{}] advertising {}", self.label, advertising);
    }

    fn on_scan_state_changed(&self, scanning: bool) {
        println!("[{}] scanning {}", self.label, scanning);
    }

    fn on_error(&self, kind: ErrorKind, message: String) {
        println!("[{}] {} {:?}: {}", self.label, "error".red(), kind, message);
    }
}

async fn cmd_simulate(config: &config::Config, measurements: usize) -> Result<()> {
    println!("{}", "Simulating two UWBLink devices".bold());
    println!();

    let radio = LoopbackRadio::new();
    let mut devices = Vec::new();
    for (name, role, base) in [
        ("device-a", Role::Controller, 0x1000u16),
        ("device-b", Role::Controlee, 0x2000u16),
    ] {
        let endpoint = Arc::new(radio.endpoint(name));
        let provider = Arc::new(SimulatedRangingProvider::new(base));
        let observer = Arc::new(ConsoleObserver {
            label: name.bright_magenta(),
        });
        let service = RangingService::new(
            config.ranging.clone(),
            role,
            provider.clone(),
            endpoint.clone(),
            endpoint,
            observer,
        )?;
        service.refresh_session_blocking()?;
        service.start_advertising()?;
        devices.push((service, provider));
    }

    for (service, _) in &devices {
        service.start_scan()?;
    }

    if devices
        .iter()
        .any(|(service, _)| service.session_state() != SessionState::Active)
    {
        anyhow::bail!("Devices did not pair up; check auto_initiate in the config");
    }

    let mut rng = rand::thread_rng();
    for step in 0..measurements {
        let distance = 3.0 - step as f64 * 0.2 + rng.gen_range(-0.05..0.05);
        let azimuth = rng.gen_range(-30.0..30.0);
        let elevation = rng.gen_range(-10.0..10.0);
        for (_, provider) in &devices {
            provider.emit(RangingEvent::Position(Measurement {
                distance_m: Some(distance.max(0.1)),
                azimuth_deg: Some(azimuth),
                elevation_deg: Some(elevation),
            }));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    for (service, _) in &devices {
        service.shutdown();
    }

    println!();
    println!("{} Simulation finished", "✓".green());
    Ok(())
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<28} {}", key.bright_cyan(), value);
            }
            println!();
            println!("Config file: {}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}
