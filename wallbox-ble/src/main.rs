//! BLE firmware provisioning tool for Wallbox chargers
//!
//! Finds a charger, opens its BLE control channel and either issues single
//! calls or runs the full update workflow over the charger's Wi-Fi hotspot.

mod logging;

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use md5::{Digest, Md5};
use serde_json::Value;

use wallbox_ble_controller::provision::DEFAULT_PACKAGE_NAME;
use wallbox_ble_controller::{
    Announcement, BtleLink, Handoff, Package, ProvisionConfig, Provisioner, Reply, Session, SessionConfig,
    WifiCredentials, ble,
};
use wallbox_proto::ble::ProfileRegistry;

#[derive(Parser)]
#[command(name = "wallbox-ble")]
#[command(about = "BLE firmware provisioning tool for Wallbox chargers")]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for chargers
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Send one method call and print the reply
    Call {
        #[command(flatten)]
        target: Target,
        /// Method name, e.g. r_hup
        method: String,
        /// Parameters as JSON
        params: Option<String>,
    },
    /// Push a software package over the charger hotspot and wait for the update
    Update {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        polling: Polling,
        /// Package to install
        #[arg(short, long, default_value = "pwnware.tar")]
        file: PathBuf,
        /// Name announced to the charger
        #[arg(long, default_value = DEFAULT_PACKAGE_NAME)]
        name: String,
        /// Bulk transfer timeout in seconds
        #[arg(long, default_value = "120")]
        transfer_timeout: u64,
        /// Don't wait for Enter before the transfer
        #[arg(short, long)]
        yes: bool,
    },
    /// Announce a package that will be uploaded separately, then wait for the update
    Prepare {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        polling: Polling,
        /// Name announced to the charger
        #[arg(long, default_value = DEFAULT_PACKAGE_NAME)]
        name: String,
        /// MD5 hex digest of the package
        #[arg(long)]
        md5: String,
        /// Package size in bytes
        #[arg(long)]
        size: u64,
    },
}

#[derive(Args)]
struct Target {
    /// Device name or address to connect to (default: first WB device)
    #[arg(short, long, env = "WALLBOX_DEVICE")]
    device: Option<String>,
    /// Scan duration in seconds
    #[arg(long, default_value = "5")]
    scan: u64,
    /// Connection timeout in seconds
    #[arg(long, default_value = "30")]
    connect_timeout: u64,
    /// Reply timeout per call in seconds
    #[arg(long, default_value = "10")]
    response_timeout: u64,
}

#[derive(Args)]
struct Polling {
    /// Seconds between status polls
    #[arg(long, default_value = "2")]
    poll_interval: u64,
    /// Give up after this many polls per stage (default: wait forever)
    #[arg(long)]
    max_polls: Option<u32>,
}

impl Polling {
    fn config(&self) -> ProvisionConfig {
        ProvisionConfig {
            poll_interval: Duration::from_secs(self.poll_interval),
            max_polls: self.max_polls,
            ..ProvisionConfig::default()
        }
    }
}

/// Tells the operator to join the hotspot and, for pushed packages, waits for Enter
struct OperatorPrompt {
    wait: bool,
}

#[async_trait::async_trait]
impl Handoff for OperatorPrompt {
    async fn ready_for_transfer(&mut self, credentials: &WifiCredentials, external: bool) {
        let pass = credentials.pass.as_deref().unwrap_or("");
        if external {
            println!(
                "Wallbox AP is ready, connect to {} using password {} and upload the package",
                credentials.ssid, pass
            );
            return;
        }

        println!("Wallbox AP is ready, connect to {} using password {}", credentials.ssid, pass);
        if self.wait {
            println!("Press return once connected");
            let line = tokio::task::spawn_blocking(|| {
                let mut line = String::new();
                std::io::stdin().lock().read_line(&mut line).map(|_| ())
            })
            .await;
            match line {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "could not read from stdin"),
                Err(e) => tracing::warn!(error = %e, "stdin reader failed"),
            }
        }
        println!("Sending package");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    match cli.command {
        Commands::Scan { duration } => {
            scan_devices(duration).await?;
        }
        Commands::Call { target, method, params } => {
            let params = params.map(|p| serde_json::from_str::<Value>(&p)).transpose()?;
            let mut session = connect(&target).await?;
            let reply = session.execute(&method, params).await?;
            print_reply(&reply)?;
            session.close().await?;
        }
        Commands::Update { target, polling, file, name, transfer_timeout, yes } => {
            let payload = std::fs::read(&file)?;
            let announcement = Announcement {
                name,
                md5: md5_hex(&payload),
                size: payload.len() as u64,
            };
            let config = ProvisionConfig {
                transfer_timeout: Duration::from_secs(transfer_timeout),
                ..polling.config()
            };
            let package = Package::with_payload(announcement, payload);
            provision(&target, config, &package, OperatorPrompt { wait: !yes }).await?;
        }
        Commands::Prepare { target, polling, name, md5, size } => {
            let package = Package::external(Announcement { name, md5, size });
            provision(&target, polling.config(), &package, OperatorPrompt { wait: false }).await?;
        }
    }

    Ok(())
}

async fn scan_devices(duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for Wallbox chargers ({} seconds)...", duration);

    let adapter = ble::get_adapter().await?;
    let devices = ble::scan(&adapter, Duration::from_secs(duration)).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device.rssi.map(|r| format!("{} dBm", r)).unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_wallbox { " [WALLBOX]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }

    Ok(())
}

async fn connect(target: &Target) -> Result<Session<BtleLink>, Box<dyn std::error::Error>> {
    println!("Scanning for Wallbox chargers...");
    let adapter = ble::get_adapter().await?;
    let peripheral = ble::find_device(&adapter, target.device.as_deref(), Duration::from_secs(target.scan)).await?;

    println!("Connecting...");
    let link = BtleLink::connect(peripheral, Duration::from_secs(target.connect_timeout)).await?;
    let config = SessionConfig {
        response_timeout: Duration::from_secs(target.response_timeout),
    };
    let session = Session::connect(link, &ProfileRegistry::builtin(), config).await?;
    println!("Connected! ({})", session.profile().name);

    Ok(session)
}

async fn provision(
    target: &Target,
    config: ProvisionConfig,
    package: &Package,
    mut prompt: OperatorPrompt,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = connect(target).await?;

    println!("Setting Wallbox to AP mode");
    let state = {
        let mut provisioner = Provisioner::new(&mut session, config);
        provisioner.run(package, &mut prompt).await?
    };

    if state.last_status.as_deref() == Some(wallbox_proto::status::DONE) {
        println!("Wallbox was updated successfully!");
    }
    session.close().await?;
    Ok(())
}

fn print_reply(reply: &Reply) -> Result<(), serde_json::Error> {
    match reply {
        Reply::Answered(value) => println!("{}", serde_json::to_string_pretty(value)?),
        Reply::NoResponse => println!("No response"),
    }
    Ok(())
}

fn md5_hex(data: &[u8]) -> String {
    Md5::digest(data).iter().map(|b| format!("{b:02x}")).collect()
}
