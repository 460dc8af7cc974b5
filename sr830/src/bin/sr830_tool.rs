//! Command-line tool for the SR830 lock-in amplifier.
//!
//! Subcommands:
//! - `status` - identity, settings, and a measurement snapshot
//! - `snap` - read X/Y/R/theta snapshots, optionally to CSV
//! - `set` - change time constant, sensitivity, frequency, amplitude, phase
//! - `auto` - run the instrument's auto functions
//! - `codes` - list the legal time-constant and sensitivity wire codes
//! - `repl` - interactive raw command mode
//!
//! Built only with the `visa` feature:
//! `cargo run --features visa --bin sr830_tool -- status`

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use sr830::bus::GPIB_SEARCH;
use sr830::{Bus, Sensitivity, Sr830, TimeConstant, VisaBus};
use strum::IntoEnumIterator;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sr830_tool")]
#[command(about = "Control tool for the SR830 lock-in amplifier")]
#[command(version)]
struct Args {
    /// VISA resource address (first GPIB instrument if omitted)
    #[arg(long, global = true)]
    resource: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show identity, settings, and current readings
    Status,

    /// Read X, Y, R, theta snapshots
    Snap {
        /// Number of snapshots
        #[arg(short, long, default_value = "1")]
        count: u32,

        /// Delay between snapshots in milliseconds
        #[arg(long, default_value = "100")]
        interval_ms: u64,

        /// Write snapshots to a CSV file instead of logging them
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Change instrument settings
    Set {
        /// Time constant wire code (0-19)
        #[arg(long)]
        tau: Option<u8>,

        /// Sensitivity wire code (0-26)
        #[arg(long)]
        sensitivity: Option<u8>,

        /// Internal reference frequency in Hz
        #[arg(long)]
        frequency: Option<f64>,

        /// Sine output amplitude in V rms
        #[arg(long)]
        amplitude: Option<f64>,

        /// Reference phase shift in degrees
        #[arg(long)]
        phase: Option<f64>,
    },

    /// Run the instrument's auto functions
    Auto {
        /// Auto-phase
        #[arg(long)]
        phase: bool,

        /// Auto-gain
        #[arg(long)]
        gain: bool,

        /// Auto-reserve
        #[arg(long)]
        reserve: bool,
    },

    /// List the legal time-constant and sensitivity wire codes
    Codes,

    /// Interactive raw command REPL
    Repl,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Status => cmd_status(args.resource.as_deref()),
        Command::Snap { count, interval_ms, ref output } => {
            cmd_snap(args.resource.as_deref(), count, interval_ms, output.as_deref())
        }
        Command::Set { tau, sensitivity, frequency, amplitude, phase } => {
            cmd_set(args.resource.as_deref(), tau, sensitivity, frequency, amplitude, phase)
        }
        Command::Auto { phase, gain, reserve } => {
            cmd_auto(args.resource.as_deref(), phase, gain, reserve)
        }
        Command::Codes => cmd_codes(),
        Command::Repl => cmd_repl(args.resource.as_deref()),
    }
}

fn open_lockin(resource: Option<&str>) -> Result<Sr830<VisaBus>> {
    match resource {
        Some(resource) => {
            info!("Opening {}...", resource);
            Ok(Sr830::open(resource)?)
        }
        None => {
            info!("Searching for a GPIB instrument...");
            Ok(Sr830::open_first()?)
        }
    }
}

fn cmd_status(resource: Option<&str>) -> Result<()> {
    let mut lockin = open_lockin(resource)?;

    info!("IDN: {}", lockin.idn()?);
    let tau = lockin.time_constant()?;
    info!("Time constant: {} (code {})", tau, tau.code());
    let sensitivity = lockin.sensitivity()?;
    info!("Sensitivity: {} (code {})", sensitivity, sensitivity.code());
    info!(
        "Reference: source={}, trigger={}, harmonic={}",
        lockin.reference_source()?,
        lockin.reference_trigger()?,
        lockin.harmonic()?
    );
    info!(
        "Frequency: {} Hz, amplitude: {} V rms, phase: {} deg",
        lockin.frequency()?,
        lockin.amplitude()?,
        lockin.phase()?
    );
    info!(
        "Input: source={}, ground={}, coupling={}, line filter={}",
        lockin.input_source()?,
        lockin.input_ground()?,
        lockin.input_coupling()?,
        lockin.line_filter()?
    );
    info!(
        "Reserve: {}, filter slope: {}, sync filter: {}",
        lockin.reserve_mode()?,
        lockin.filter_slope()?,
        lockin.sync_filter()?
    );
    let snap = lockin.snapshot()?;
    info!(
        "X={:.6e} V, Y={:.6e} V, R={:.6e} V, theta={:.3} deg",
        snap.x, snap.y, snap.r, snap.theta
    );
    Ok(())
}

fn cmd_snap(
    resource: Option<&str>,
    count: u32,
    interval_ms: u64,
    output: Option<&str>,
) -> Result<()> {
    let mut lockin = open_lockin(resource)?;

    let mut file = match output {
        Some(path) => {
            let mut file = std::fs::File::create(path)?;
            writeln!(file, "sample,x_v,y_v,r_v,theta_deg")?;
            Some(file)
        }
        None => None,
    };

    for i in 0..count {
        let snap = lockin.snapshot()?;
        match file.as_mut() {
            Some(file) => writeln!(
                file,
                "{},{:.6e},{:.6e},{:.6e},{:.3}",
                i, snap.x, snap.y, snap.r, snap.theta
            )?,
            None => info!(
                "X={:.6e} V, Y={:.6e} V, R={:.6e} V, theta={:.3} deg",
                snap.x, snap.y, snap.r, snap.theta
            ),
        }
        if i + 1 < count {
            std::thread::sleep(Duration::from_millis(interval_ms));
        }
    }

    if let Some(path) = output {
        info!("{} snapshots written to {}", count, path);
    }
    Ok(())
}

fn cmd_set(
    resource: Option<&str>,
    tau: Option<u8>,
    sensitivity: Option<u8>,
    frequency: Option<f64>,
    amplitude: Option<f64>,
    phase: Option<f64>,
) -> Result<()> {
    if tau.is_none()
        && sensitivity.is_none()
        && frequency.is_none()
        && amplitude.is_none()
        && phase.is_none()
    {
        bail!("Nothing to set; pass --tau, --sensitivity, --frequency, --amplitude, or --phase");
    }

    let mut lockin = open_lockin(resource)?;

    if let Some(code) = tau {
        let tau = TimeConstant::from_code(code)?;
        lockin.set_time_constant(tau)?;
        info!("Time constant set to {}", tau);
    }
    if let Some(code) = sensitivity {
        let sensitivity = Sensitivity::from_code(code)?;
        lockin.set_sensitivity(sensitivity)?;
        info!("Sensitivity set to {}", sensitivity);
    }
    if let Some(hz) = frequency {
        lockin.set_frequency(hz)?;
        info!("Frequency set to {} Hz", hz);
    }
    if let Some(volts) = amplitude {
        lockin.set_amplitude(volts)?;
        info!("Amplitude set to {} V rms", volts);
    }
    if let Some(degrees) = phase {
        lockin.set_phase(degrees)?;
        info!("Phase set to {} deg", degrees);
    }
    Ok(())
}

fn cmd_auto(resource: Option<&str>, phase: bool, gain: bool, reserve: bool) -> Result<()> {
    if !phase && !gain && !reserve {
        bail!("Nothing to run; pass at least one of --phase, --gain, --reserve");
    }

    let mut lockin = open_lockin(resource)?;

    if phase {
        info!("Running auto-phase...");
        lockin.auto_phase()?;
    }
    if gain {
        info!("Running auto-gain...");
        lockin.auto_gain()?;
    }
    if reserve {
        info!("Running auto-reserve...");
        lockin.auto_reserve()?;
    }
    Ok(())
}

fn cmd_codes() -> Result<()> {
    println!("time constants (OFLT):");
    for tau in TimeConstant::iter() {
        println!("  {:2}  {}", tau.code(), tau);
    }
    println!("sensitivities (SENS):");
    for sensitivity in Sensitivity::iter() {
        println!("  {:2}  {}", sensitivity.code(), sensitivity);
    }
    Ok(())
}

fn cmd_repl(resource: Option<&str>) -> Result<()> {
    let mut bus = match resource {
        Some(resource) => VisaBus::open(resource)?,
        None => VisaBus::find_first(GPIB_SEARCH)?
            .ok_or_else(|| anyhow!("no GPIB resources available"))?,
    };

    println!("SR830 REPL - enter raw commands, 'quit' to exit");
    println!("Examples: *IDN?, OUTP? 3, OFLT 9, SNAP?1,2,3,4");
    println!();

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break; // EOF
        }

        let cmd = input.trim();
        if cmd.is_empty() {
            continue;
        }
        if cmd.eq_ignore_ascii_case("quit") || cmd.eq_ignore_ascii_case("exit") {
            break;
        }

        // Queries carry '?' anywhere in the command (SNAP?1,2,3,4 ends
        // with its channel list).
        if cmd.contains('?') {
            match bus.query(cmd) {
                Ok(response) => println!("{}", response.trim_end()),
                Err(e) => println!("Error: {e}"),
            }
        } else {
            match bus.write(cmd) {
                Ok(()) => {}
                Err(e) => println!("Error: {e}"),
            }
        }
    }

    Ok(())
}
