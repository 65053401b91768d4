//! brewpilot CLI and daemon entry point.

mod args;
mod daemon;
mod machine;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use brewpilot_core::catalog::PatternCatalog;
use brewpilot_core::protocol::{Command, Request};
use brewpilot_core::state::RequestKind;
use clap::Parser;
use tracing::{error, info};
use uuid::Uuid;

use crate::args::{Cli, Commands, DaemonArgs};
use crate::daemon::client::DaemonClient;
use crate::daemon::server::DaemonServer;
use crate::machine::bus::{RtuBus, SerialConfig};
use crate::machine::controller::{Controller, ControllerHandle, ControllerOptions};
use crate::machine::device::{DeviceSession, ThreadDelay};
use crate::machine::event_log::EventLog;
use crate::machine::pins::{CdevPins, PinConfig};
use crate::machine::timings::Timings;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Daemon command runs the controller, all other commands are clients
    if let Commands::Daemon(args) = cli.command {
        run_daemon(args);
        return;
    }

    if let Err(e) = run_client_command(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn submit(request: RequestKind, parameter: i32) -> Command {
    Command::Submit { request, parameter }
}

/// Convert CLI args to a protocol Command.
fn cli_to_command(cli: &Cli) -> Command {
    match &cli.command {
        Commands::Status => Command::Status,
        Commands::Events(args) => Command::Events { after: args.after },
        Commands::GetState => submit(RequestKind::GetState, 0),
        Commands::PowerOn => submit(RequestKind::PowerOn, 0),
        Commands::PowerOff => submit(RequestKind::PowerOff, 0),
        Commands::Espresso => submit(RequestKind::Espresso, 0),
        Commands::Coffee => submit(RequestKind::Coffee, 0),
        Commands::Americano => submit(RequestKind::Americano, 0),
        Commands::HotWater => submit(RequestKind::HotWater, 0),
        Commands::Aroma(args) => submit(RequestKind::SetAroma, args.level),
        Commands::Temperature(args) => submit(RequestKind::SetTemperature, args.level),
        Commands::Stop => Command::Shutdown,
        Commands::Daemon(_) => unreachable!("Daemon command handled separately"),
    }
}

/// Run a client command by connecting to the daemon.
fn run_client_command(cli: Cli) -> anyhow::Result<()> {
    let command = cli_to_command(&cli);
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let mut client = DaemonClient::connect().await?;

        let request = Request {
            id: Uuid::new_v4().to_string(),
            command,
        };

        let response = client.request(request).await?;

        if response.success {
            if let Some(data) = response.data {
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
        } else if let Some(err) = response.error {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }

        Ok(())
    })
}

/// Open the hardware and start the control thread.
fn start_controller(args: &DaemonArgs) -> anyhow::Result<ControllerHandle> {
    let catalog = PatternCatalog::load(&args.patterns)
        .with_context(|| format!("loading patterns from {}", args.patterns.display()))?;
    info!("Loaded {} screen patterns", catalog.len());

    let events = match &args.event_log {
        Some(path) => EventLog::with_file(path)?,
        None => EventLog::in_memory(),
    };

    let bus = RtuBus::open(&SerialConfig {
        path: args.serial.clone(),
        baud_rate: args.baud,
        unit: args.unit,
        timeout: Duration::from_millis(args.timeout_ms),
    })?;
    let pins = CdevPins::open(
        &args.gpio_chip,
        PinConfig {
            reset_line: args.reset_line,
            new_data_line: args.new_data_line,
        },
    )?;

    let session = DeviceSession::new(
        Box::new(bus),
        Box::new(ThreadDelay),
        catalog,
        Timings::default(),
        Arc::new(events),
    );
    Controller::start(
        session,
        Box::new(pins),
        ControllerOptions {
            carafe_attached: args.carafe_attached,
            archive_path: args.archive.clone(),
        },
    )
}

/// Run the daemon server with graceful signal handling.
///
/// Handles SIGINT (Ctrl+C) and SIGTERM for clean shutdown. The control
/// thread is stopped before the server is dropped; the server's Drop impl
/// cleans up socket and PID files.
fn run_daemon(args: DaemonArgs) {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let controller = match start_controller(&args) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start controller: {:#}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let server = match DaemonServer::bind(controller.clone()).await {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to start daemon: {:#}", e);
                controller.stop();
                std::process::exit(1);
            }
        };

        tokio::select! {
            result = server.run() => {
                if let Err(e) = result {
                    error!("Daemon error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down gracefully");
            }
            _ = sigterm() => {
                info!("Received SIGTERM, shutting down gracefully");
            }
        }

        let stopping = controller.clone();
        if tokio::task::spawn_blocking(move || stopping.stop()).await.is_err() {
            error!("Control thread did not stop cleanly");
        }
        // Server is dropped here, triggering cleanup of socket and PID files
    });
}

/// Wait for SIGTERM signal.
///
/// If signal registration fails, logs a warning and waits indefinitely.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(
                "Failed to register SIGTERM handler: {}, daemon will only respond to SIGINT",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
