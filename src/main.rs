//! # Thermolink CLI
//!
//! Command-line interface for Bluetooth ESC/POS printers.
//!
//! ## Usage
//!
//! ```bash
//! # Run the HTTP API
//! thermolink serve --listen 0.0.0.0:8080
//!
//! # Same, against an in-memory printer
//! thermolink serve --dry-run
//!
//! # Look for printers nearby
//! thermolink scan --timeout 10
//!
//! # Print a job file (a JSON list of operations)
//! thermolink print 66:22:B3:4C:1D:0E job.json
//! ```

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use thermolink::{
    ConnectionRegistry, EventHub, Operation, PrinterEvent, ThermolinkError, TransportEventRouter,
    config::LinkConfig,
    discovery::{BluetoothctlScanner, DeviceScanner, DiscoveryRelay, IdleScanner},
    gate::{AccessGate, AlwaysGranted, BluetoothctlGate, run_gated},
    protocol::EscPosEncoder,
    server::{self, AppState},
    transport::{MockTransport, RfcommTransport, Transport, event_channel},
};

/// Thermolink - Bluetooth thermal printer bridge
#[derive(Parser, Debug)]
#[command(name = "thermolink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Address to listen on (overrides the config file)
        #[arg(long)]
        listen: Option<String>,

        /// Use an in-memory printer instead of Bluetooth
        #[arg(long)]
        dry_run: bool,
    },

    /// Scan for nearby printers
    Scan {
        /// Scan duration in seconds (overrides the config file)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print a job file to a printer
    Print {
        /// Printer Bluetooth address
        address: String,

        /// Job file: a JSON list of operations, or `{"encoding", "operations"}`
        job: PathBuf,

        /// Text encoding (GBK or UTF-8)
        #[arg(long)]
        encoding: Option<String>,

        /// Dump the job bytes instead of printing
        #[arg(long)]
        dry_run: bool,

        /// Milliseconds to let queued bytes drain before disconnecting
        #[arg(long, default_value = "1500")]
        linger: u64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JobFile {
    Operations(Vec<Operation>),
    Job {
        #[serde(default)]
        encoding: Option<String>,
        operations: Vec<Operation>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,thermolink=debug".into()),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ThermolinkError> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => LinkConfig::load(path)?,
        None => LinkConfig::default(),
    };

    match cli.command {
        Commands::Serve { listen, dry_run } => serve(config, listen, dry_run).await,
        Commands::Scan { timeout } => scan(config, timeout).await,
        Commands::Print {
            address,
            job,
            encoding,
            dry_run,
            linger,
        } => print(config, &address, &job, encoding, dry_run, Duration::from_millis(linger)).await,
    }
}

/// Registry wired to a transport, with its event router running.
struct Stack {
    registry: Arc<ConnectionRegistry>,
    gate: Arc<dyn AccessGate>,
    router: tokio::task::JoinHandle<()>,
}

fn build_stack(config: &LinkConfig, events: EventHub, dry_run: bool) -> Stack {
    let (tx, rx) = event_channel();
    let (transport, gate): (Arc<dyn Transport>, Arc<dyn AccessGate>) = if dry_run {
        (Arc::new(MockTransport::new(tx).with_auto_connect()), Arc::new(AlwaysGranted))
    } else {
        (
            Arc::new(RfcommTransport::new(config.rfcomm.clone(), tx)),
            Arc::new(BluetoothctlGate),
        )
    };

    let registry = Arc::new(ConnectionRegistry::new(transport, Arc::new(EscPosEncoder), events));
    let router = TransportEventRouter::new(registry.clone(), rx).spawn();
    Stack {
        registry,
        gate,
        router,
    }
}

async fn serve(config: LinkConfig, listen: Option<String>, dry_run: bool) -> Result<(), ThermolinkError> {
    let events = EventHub::new();
    let stack = build_stack(&config, events.clone(), dry_run);

    let scanner: Arc<dyn DeviceScanner> = if dry_run {
        Arc::new(IdleScanner)
    } else {
        Arc::new(BluetoothctlScanner::new(config.discovery.timeout()))
    };
    let discovery = Arc::new(DiscoveryRelay::new(scanner, events.clone()));

    let mut feed = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = feed.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                info!(event = %json, "printer event");
            }
        }
    });

    let state = Arc::new(
        AppState::new(stack.registry.clone(), discovery, stack.gate.clone())
            .with_default_encoding(config.default_encoding()),
    );
    let listen = listen.unwrap_or(config.server.listen);

    tokio::select! {
        result = server::serve(state, &listen) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    stack.registry.shutdown().await;
    stack.router.await.ok();
    Ok(())
}

async fn scan(config: LinkConfig, timeout: Option<u64>) -> Result<(), ThermolinkError> {
    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.discovery.timeout());
    let events = EventHub::new();
    let relay = DiscoveryRelay::new(Arc::new(BluetoothctlScanner::new(timeout)), events.clone());
    let mut feed = events.subscribe();

    run_gated(&BluetoothctlGate, "scan", || relay.start_scan()).await?;
    println!("Scanning for {}s...", timeout.as_secs());

    let mut found = Vec::new();
    while let Ok(event) = feed.recv().await {
        match event {
            PrinterEvent::DiscoverDevices { devices } => found = devices,
            PrinterEvent::DiscoveryFinish => break,
            _ => {}
        }
    }

    if found.is_empty() {
        println!("No printers found.");
    }
    for device in found {
        println!("{}  {}", device.address, device.name);
    }
    Ok(())
}

fn load_job(path: &Path) -> Result<(Option<String>, Vec<Operation>), ThermolinkError> {
    let content = std::fs::read_to_string(path)?;
    let job: JobFile = serde_json::from_str(&content).map_err(|e| {
        ThermolinkError::InvalidArgument(format!("{}: {}", path.display(), e))
    })?;
    Ok(match job {
        JobFile::Operations(ops) => (None, ops),
        JobFile::Job {
            encoding,
            operations,
        } => (encoding, operations),
    })
}

async fn print(
    config: LinkConfig,
    address: &str,
    job: &Path,
    encoding: Option<String>,
    dry_run: bool,
    linger: Duration,
) -> Result<(), ThermolinkError> {
    let (job_encoding, ops) = load_job(job)?;
    let encoding = encoding
        .or(job_encoding)
        .unwrap_or_else(|| config.default_encoding().as_str().to_string());

    let stack = build_stack(&config, EventHub::new(), dry_run);
    let registry = stack.registry.clone();

    let printer = run_gated(stack.gate.as_ref(), "connect", || {
        registry.connect(address, Some(encoding.as_str()))
    })
    .await?
    .ok_or(ThermolinkError::NotConnected)?;
    info!(id = %printer.connection_id, name = %printer.name, "connected");

    let id = Some(printer.connection_id);
    registry.begin(id).await?;
    registry.apply_all(id, &ops).await?;
    debug!(ops = ops.len(), "job applied");

    if dry_run {
        let bytes = registry.buffered(id).await?;
        for line in bytes.chunks(16) {
            let hex: Vec<String> = line.iter().map(|b| format!("{:02X}", b)).collect();
            println!("{}", hex.join(" "));
        }
    } else {
        registry.write(id).await?;
        tokio::time::sleep(linger).await;
        println!("Printed successfully!");
    }

    registry.disconnect(id).await.ok();
    registry.shutdown().await;
    stack.router.await.ok();
    Ok(())
}
