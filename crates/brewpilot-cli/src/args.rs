//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Remote control for a bean-to-cup coffee machine.
///
/// `brewpilot daemon` owns the serial link and GPIO lines and runs the
/// control loop. Every other subcommand talks to that daemon over a Unix
/// socket and prints the JSON answer.
#[derive(Debug, Parser)]
#[command(name = "brewpilot", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the controller daemon (foreground)
    #[command(after_help = "\
Examples:
  brewpilot daemon --serial /dev/ttyAMA0 --patterns screens.json
  brewpilot daemon --serial /dev/ttyUSB0 --patterns screens.json \\
      --event-log /var/log/brewpilot.log --archive screens-seen.json
  RUST_LOG=debug brewpilot daemon --serial /dev/ttyAMA0 --patterns screens.json")]
    Daemon(DaemonArgs),

    /// Show state, last error and whether a request is in flight
    Status,

    /// Print event log entries
    #[command(after_help = "\
Examples:
  brewpilot events                      # Everything still buffered
  brewpilot events --after 120          # Only entries newer than #120")]
    Events(EventsArgs),

    /// Re-read the appliance state
    GetState,

    /// Switch the appliance on
    PowerOn,

    /// Switch the appliance off
    PowerOff,

    /// Brew an espresso
    Espresso,

    /// Brew a coffee
    Coffee,

    /// Brew an americano
    Americano,

    /// Dispense hot water
    HotWater,

    /// Set the aroma (0 = ground coffee, 1-5 = bean intensity)
    Aroma(AromaArgs),

    /// Set the brew temperature (0 = min, 1 = medium, 2 = max)
    Temperature(TemperatureArgs),

    /// Stop the controller and the daemon
    Stop,
}

#[derive(Debug, clap::Args)]
pub struct DaemonArgs {
    /// Serial device wired to the register handler
    #[arg(long, value_name = "PORT")]
    pub serial: PathBuf,

    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,

    /// Modbus unit address
    #[arg(long, default_value_t = 2)]
    pub unit: u8,

    /// Per-transaction serial timeout in milliseconds
    #[arg(long, default_value_t = 100, value_name = "MS")]
    pub timeout_ms: u64,

    /// Screen pattern database (JSON)
    #[arg(long, value_name = "FILE")]
    pub patterns: PathBuf,

    /// Append event log lines to this file as well
    #[arg(long, value_name = "FILE")]
    pub event_log: Option<PathBuf>,

    /// Write the pattern database here on shutdown, including archived
    /// unknown error screens
    #[arg(long, value_name = "FILE")]
    pub archive: Option<PathBuf>,

    #[arg(long, default_value = "/dev/gpiochip0", value_name = "CHIP")]
    pub gpio_chip: PathBuf,

    /// GPIO line driving the microcontroller reset
    #[arg(long, default_value_t = 25)]
    pub reset_line: u32,

    /// GPIO line signalling a fresh capture
    #[arg(long, default_value_t = 11)]
    pub new_data_line: u32,

    /// A milk carafe is mounted; carafe prompts are left alone
    #[arg(long)]
    pub carafe_attached: bool,
}

#[derive(Debug, clap::Args)]
pub struct EventsArgs {
    /// Only show entries with a sequence number above this
    #[arg(long, default_value_t = 0)]
    pub after: u64,
}

#[derive(Debug, clap::Args)]
pub struct AromaArgs {
    #[arg(value_parser = clap::value_parser!(i32).range(0..=5))]
    pub level: i32,
}

#[derive(Debug, clap::Args)]
pub struct TemperatureArgs {
    #[arg(value_parser = clap::value_parser!(i32).range(0..=2))]
    pub level: i32,
}
