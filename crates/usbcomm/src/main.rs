//! usbcomm
//!
//! Command-line front end for the USB session manager: list devices, run
//! bulk transfers against configured devices, reset them, and watch
//! hotplug events.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use common::{HandleId, HotplugEvent, VidPidSet, setup_logging};
use tokio::signal;
use tracing::{error, info, warn};
use usbcomm::config::Config;
use usbcomm::usb::catalog;
use usbcomm::{DeviceSession, HotplugMonitor};

#[derive(Parser, Debug)]
#[command(name = "usbcomm")]
#[command(author, version, about = "USB device session manager")]
#[command(long_about = "
Talks to USB peripherals through libusb: enumerate devices, open the ones
listed in the configuration, run bulk transfers and watch hotplug events.

EXAMPLES:
    # List every attached device
    usbcomm list

    # Read 64 bytes from endpoint 0x81 after claiming interface 0
    usbcomm read --device 0x04b4:0x00f1 --interface 0 --endpoint 0x81 --length 64

    # Write bytes to endpoint 0x01
    usbcomm write --device 0x04b4:0x00f1 --interface 0 --endpoint 0x01 --data 'de ad be ef'

    # Print arrivals and departures of HID devices
    usbcomm monitor --class 0x03

CONFIGURATION:
    usbcomm looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbcomm/usbcomm.toml
    3. /etc/usbcomm/usbcomm.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices with their descriptor tree
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Only list these devices (VID:PID, repeatable)
        #[arg(long = "device", value_name = "VID:PID", value_parser = parse_device)]
        devices: Vec<(u16, u16)>,
    },
    /// Bulk read from an IN endpoint
    Read {
        #[command(flatten)]
        target: TransferTarget,

        /// IN endpoint address, e.g. 0x81
        #[arg(long, value_parser = parse_byte)]
        endpoint: u8,

        /// Number of bytes to read
        #[arg(long, default_value_t = 64)]
        length: usize,
    },
    /// Bulk write to an OUT endpoint
    Write {
        #[command(flatten)]
        target: TransferTarget,

        /// OUT endpoint address, e.g. 0x01
        #[arg(long, value_parser = parse_byte)]
        endpoint: u8,

        /// Bytes to send as hex, e.g. "deadbeef" or "de ad be ef"
        #[arg(long)]
        data: String,
    },
    /// Reset the configured devices
    Reset {
        /// Devices to reset (VID:PID, repeatable; defaults to the configuration)
        #[arg(long = "device", value_name = "VID:PID", value_parser = parse_device)]
        devices: Vec<(u16, u16)>,
    },
    /// Watch device arrivals and departures until Ctrl+C
    Monitor {
        /// Device class filter, e.g. 0x03
        #[arg(long)]
        class: Option<String>,

        /// Vendor id filter
        #[arg(long)]
        vendor: Option<String>,

        /// Product id filter
        #[arg(long)]
        product: Option<String>,
    },
}

/// Device selection and preparation shared by read/write
#[derive(clap::Args, Debug)]
struct TransferTarget {
    /// Devices to open (VID:PID, repeatable; defaults to the configuration)
    #[arg(long = "device", value_name = "VID:PID", value_parser = parse_device)]
    devices: Vec<(u16, u16)>,

    /// Configuration value to activate
    #[arg(long)]
    configuration: Option<u8>,

    /// Interface to claim
    #[arg(long)]
    interface: Option<u8>,

    /// Alternate setting to select on the claimed interface
    #[arg(long)]
    alt: Option<u8>,

    /// Transfer timeout in milliseconds (0 = wait forever)
    #[arg(long)]
    timeout_ms: Option<u64>,
}

fn parse_device(s: &str) -> Result<(u16, u16), String> {
    VidPidSet::parse_pair(s).ok_or_else(|| format!("'{}' is not a VID:PID pair", s))
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    value.map_err(|e| format!("'{}' is not a byte value: {}", s, e))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if digits.len() % 2 != 0 {
        bail!("Hex data must have an even number of digits");
    }

    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|byte| u8::from_str_radix(byte, 16).ok())
                .ok_or_else(|| anyhow!("Invalid hex byte '{}'", String::from_utf8_lossy(pair)))
        })
        .collect()
}

fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = Config::default();
        let path = Config::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        usbcomm::config::load_config(path).context("Failed to load configuration")?
    } else {
        Config::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usbcomm v{}", env!("CARGO_PKG_VERSION"));

    let command = args.command.unwrap_or(Command::List {
        json: false,
        devices: Vec::new(),
    });

    match command {
        Command::List { json, devices } => {
            tokio::task::spawn_blocking(move || list_devices(&config, devices, json)).await?
        }
        Command::Read {
            target,
            endpoint,
            length,
        } => {
            if endpoint & 0x80 == 0 {
                bail!("Endpoint 0x{:02x} is not an IN endpoint", endpoint);
            }
            tokio::task::spawn_blocking(move || -> Result<()> {
                let mut buf = vec![0u8; length];
                let n = transfer(&config, &target, endpoint, &mut buf)?;
                println!("Read {} byte(s): {}", n, format_hex(&buf[..n]));
                Ok(())
            })
            .await?
        }
        Command::Write {
            target,
            endpoint,
            data,
        } => {
            if endpoint & 0x80 != 0 {
                bail!("Endpoint 0x{:02x} is not an OUT endpoint", endpoint);
            }
            let mut buf = parse_hex_bytes(&data)?;
            tokio::task::spawn_blocking(move || -> Result<()> {
                let n = transfer(&config, &target, endpoint, &mut buf)?;
                println!("Wrote {} of {} byte(s)", n, buf.len());
                Ok(())
            })
            .await?
        }
        Command::Reset { devices } => {
            tokio::task::spawn_blocking(move || reset_devices(&config, devices)).await?
        }
        Command::Monitor {
            class,
            vendor,
            product,
        } => {
            let mut config = config;
            if class.is_some() {
                config.hotplug.device_class = class;
            }
            if vendor.is_some() {
                config.hotplug.vendor_id = vendor;
            }
            if product.is_some() {
                config.hotplug.product_id = product;
            }
            monitor(config).await
        }
    }
}

/// Devices from the command line, falling back to the configuration
fn device_set(config: &Config, devices: Vec<(u16, u16)>) -> Result<VidPidSet> {
    if devices.is_empty() {
        config.device_set()
    } else {
        Ok(devices.into_iter().collect())
    }
}

fn list_devices(config: &Config, devices: Vec<(u16, u16)>, json: bool) -> Result<()> {
    let session = DeviceSession::new(config.session_options())
        .context("Failed to initialize USB subsystem")?;
    let set: VidPidSet = devices.into_iter().collect();

    let trees: Vec<_> = session
        .enumerate()
        .context("Failed to enumerate USB devices")?
        .filter(|tree| set.is_empty() || catalog::matches(&tree.identity, &set))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&trees)?);
    } else if trees.is_empty() {
        println!("No USB devices found.");
    } else {
        println!("Found {} USB device(s):\n", trees.len());
        for tree in &trees {
            println!("{}", tree);
        }
    }
    Ok(())
}

/// Open the selected devices and prepare the first one for transfers
fn open_first(
    config: &Config,
    target: &TransferTarget,
) -> Result<(DeviceSession, HandleId)> {
    let set = device_set(config, target.devices.clone())?;
    let mut session = DeviceSession::new(config.session_options())
        .context("Failed to initialize USB subsystem")?;

    let opened = session.open(&set).context("Failed to open devices")?;
    let handle = session
        .handle_at(0)
        .ok_or_else(|| anyhow!("None of the selected devices could be opened"))?;
    info!("{} device(s) open, using {}", opened, handle);

    if let Some(value) = target.configuration.or(config.session.configuration) {
        session
            .set_configuration(handle, value)
            .with_context(|| format!("Failed to set configuration {}", value))?;
    }

    if let Some(interface) = target.interface.or(config.session.interface) {
        session
            .claim_interface(handle, interface)
            .with_context(|| format!("Failed to claim interface {}", interface))?;

        if let Some(alt) = target.alt {
            session
                .set_interface_alt_setting(handle, interface, alt)
                .with_context(|| format!("Failed to select alternate setting {}", alt))?;
        }
    } else if target.alt.is_some() {
        warn!("--alt needs an interface to claim; ignoring");
    }

    Ok((session, handle))
}

fn transfer(
    config: &Config,
    target: &TransferTarget,
    endpoint: u8,
    buf: &mut [u8],
) -> Result<usize> {
    let (mut session, handle) = open_first(config, target)?;
    let timeout = target
        .timeout_ms
        .map(std::time::Duration::from_millis)
        .unwrap_or_else(|| config.session.timeout());

    session
        .bulk_transfer(handle, endpoint, buf, timeout)
        .map_err(|e| anyhow!("Bulk transfer failed ({}): {}", e.code(), e))
}

fn reset_devices(config: &Config, devices: Vec<(u16, u16)>) -> Result<()> {
    let set = device_set(config, devices)?;
    let mut session = DeviceSession::new(config.session_options())
        .context("Failed to initialize USB subsystem")?;
    session.open(&set).context("Failed to open devices")?;

    let handles: Vec<_> = session.handles().collect();
    if handles.is_empty() {
        println!("No matching devices are open.");
        return Ok(());
    }

    for handle in handles {
        match session.reset(handle) {
            Ok(()) => println!("Reset {}", handle),
            Err(e) => error!("Reset {} failed: {}", handle, e),
        }
    }
    Ok(())
}

async fn monitor(config: Config) -> Result<()> {
    config.validate()?;
    let filter = config.hotplug.filter()?;
    let set = config.device_set()?;

    let (mut monitor, events) = HotplugMonitor::new(config.hotplug.poll_interval())
        .context("Failed to initialize USB subsystem")?;
    monitor
        .register(filter)
        .context("Failed to register hotplug callback")?;

    // Re-open the configured devices whenever the bus changes
    let mut session = if set.is_empty() {
        None
    } else {
        let mut session = DeviceSession::new(config.session_options())
            .context("Failed to initialize USB subsystem")?;
        match session.open(&set) {
            Ok(n) => info!("{} configured device(s) open", n),
            Err(e) => warn!("Failed to open configured devices: {}", e),
        }
        Some(session)
    };

    println!("Watching for USB hotplug events (Ctrl+C to stop)...");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event.context("Hotplug channel closed")? {
                    HotplugEvent::Arrived => println!("Device arrived"),
                    HotplugEvent::Left => println!("Device left"),
                }

                if let Some(session) = session.as_mut() {
                    match tokio::task::block_in_place(|| session.open(&set)) {
                        Ok(n) => info!("{} configured device(s) open", n),
                        Err(e) => warn!("Failed to re-open configured devices: {}", e),
                    }
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    if let Some(mut session) = session {
        session.close_all();
    }
    monitor.deregister();
    Ok(())
}
