//! Command-line tool for BBD2xx benchtop motor controllers.
//!
//! Subcommands:
//! - `query` - position, status flags, and velocity profile
//! - `home` - home the axis
//! - `move` - absolute or relative move
//! - `velocity` - set the velocity profile
//! - `scan` - walk the axis in fixed increments and record positions to CSV
//!
//! All subcommands accept `--simulate` to run against the in-memory
//! backend instead of real hardware.

use std::io::Write;

use anyhow::{bail, Result};
use bbd2xx::{Bbd, DeviceManager, SimDeviceManager};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "bbd_tool")]
#[command(about = "Control tool for Thorlabs BBD2xx benchtop motor controllers")]
#[command(version)]
struct Args {
    /// Controller serial number (first discovered controller if omitted)
    #[arg(long, global = true)]
    serial: Option<String>,

    /// Channel number on the controller (1-3)
    #[arg(long, global = true, default_value = "1")]
    channel: u8,

    /// Use the in-memory simulated backend instead of real hardware
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query position, status flags, and the velocity profile
    Query,

    /// Home the axis
    Home,

    /// Move to an absolute position or by a relative distance
    Move {
        /// Absolute target position in mm
        #[arg(short, long)]
        position: Option<f64>,

        /// Relative distance in mm (negative moves backward)
        #[arg(short, long)]
        relative: Option<f64>,
    },

    /// Set the velocity profile
    Velocity {
        /// Maximum velocity in mm/s
        #[arg(long)]
        max: f64,

        /// Acceleration in mm/s^2 (unchanged if omitted)
        #[arg(long)]
        acceleration: Option<f64>,

        /// Minimum velocity in mm/s (unchanged if omitted)
        #[arg(long)]
        min: Option<f64>,
    },

    /// Walk the axis in fixed increments and record positions to CSV
    Scan {
        /// Start position in mm
        #[arg(long, default_value = "150")]
        start: f64,

        /// End position in mm
        #[arg(long, default_value = "180")]
        end: f64,

        /// Increment per step in mm
        #[arg(long, default_value = "0.001")]
        step: f64,

        /// Samples per stuck-detector window
        #[arg(long, default_value = "100")]
        window: usize,

        /// Output CSV file
        #[arg(short, long, default_value = "scan.csv")]
        output: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Query => cmd_query(&args),
        Command::Home => cmd_home(&args),
        Command::Move { position, relative } => cmd_move(&args, position, relative),
        Command::Velocity { max, acceleration, min } => cmd_velocity(&args, max, acceleration, min),
        Command::Scan { start, end, step, window, ref output } => {
            cmd_scan(&args, start, end, step, window, output)
        }
    }
}

fn open_axis(args: &Args) -> Result<Bbd> {
    let manager: Box<dyn DeviceManager> = if args.simulate {
        Box::new(SimDeviceManager::new())
    } else {
        bail!("no hardware backend is linked into this build; rerun with --simulate");
    };

    info!("Opening controller channel {}...", args.channel);
    let bbd = Bbd::open(manager, args.serial.as_deref(), args.channel)?;
    info!("Connected to {}", bbd.serial());
    Ok(bbd)
}

fn cmd_query(args: &Args) -> Result<()> {
    let bbd = open_axis(args)?;

    info!("Device: {}", bbd.device_info()?);
    info!("Position: {:.4} mm", bbd.position()?);
    info!(
        "Connected: {}, channel connected: {}, enabled: {}, homed: {}",
        bbd.is_connected(),
        bbd.is_channel_connected(),
        bbd.is_channel_enabled(),
        bbd.is_homed()
    );
    let params = bbd.velocity()?;
    info!(
        "Velocity: min={} mm/s, max={} mm/s, acceleration={} mm/s^2",
        params.min_velocity, params.max_velocity, params.acceleration
    );
    Ok(())
}

fn cmd_home(args: &Args) -> Result<()> {
    let mut bbd = open_axis(args)?;
    info!("Homing...");
    bbd.home()?;
    info!("Homed: {}, position: {:.4} mm", bbd.is_homed(), bbd.position()?);
    Ok(())
}

fn cmd_move(args: &Args, position: Option<f64>, relative: Option<f64>) -> Result<()> {
    if position.is_none() && relative.is_none() {
        bail!("Must specify --position or --relative");
    }

    let mut bbd = open_axis(args)?;

    if let Some(position) = position {
        info!("Moving to {:.4} mm...", position);
        bbd.move_to(position)?;
    }
    if let Some(distance) = relative {
        info!("Moving by {:.4} mm...", distance);
        bbd.move_relative(distance)?;
    }

    info!("Position: {:.4} mm", bbd.position()?);
    Ok(())
}

fn cmd_velocity(args: &Args, max: f64, acceleration: Option<f64>, min: Option<f64>) -> Result<()> {
    let mut bbd = open_axis(args)?;
    bbd.set_velocity(max, acceleration, min)?;
    let params = bbd.velocity()?;
    info!(
        "Velocity: min={} mm/s, max={} mm/s, acceleration={} mm/s^2",
        params.min_velocity, params.max_velocity, params.acceleration
    );
    Ok(())
}

fn cmd_scan(
    args: &Args,
    start: f64,
    end: f64,
    step: f64,
    window: usize,
    output: &str,
) -> Result<()> {
    if window == 0 {
        bail!("--window must be at least 1");
    }
    if step <= 0.0 {
        bail!("--step must be positive");
    }

    let mut bbd = open_axis(args)?;

    info!("Scanning {:.4} -> {:.4} mm in {} mm steps", start, end, step);
    bbd.move_to(start)?;

    let mut file = std::fs::File::create(output)?;
    writeln!(file, "sample,position_mm")?;

    let mut data: Vec<f64> = Vec::new();
    while bbd.position()? < end {
        let position = bbd.position()?;
        data.push(position);
        writeln!(file, "{},{:.4}", data.len(), position)?;

        if data.len() % window == 0 {
            let tail = &data[data.len() - window..];
            if bbd.reset_if_stuck(tail)? {
                warn!("Axis stuck at {:.4} mm, connection recycled", position);
                bbd.move_to(position)?;
            }
        }

        bbd.move_relative(step)?;
    }

    info!("Scan complete: {} samples written to {}", data.len(), output);
    Ok(())
}
