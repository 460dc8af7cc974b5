//! SR830 lock-in amplifier session.
//!
//! # Overview
//!
//! [`Sr830`] wraps a [`Bus`] and exposes the instrument's remote command
//! set as typed methods. Commands are plain ASCII: setters write a command
//! and expect no reply, getters send the `?` form and parse a single
//! response line. The instrument does not echo or acknowledge setters, so
//! every method documents the exact command it emits.
//!
//! Settings drawn from the instrument's closed sets ([`TimeConstant`],
//! [`Sensitivity`]) are validated before any bus traffic; everything else
//! (input configuration, reserve, filters) is passed through as the raw
//! integer code from the manual.

#[cfg(feature = "visa")]
use crate::bus::{VisaBus, GPIB_SEARCH};
use crate::bus::{Bus, BusError};
use crate::settings::{Sensitivity, TimeConstant};

use thiserror::Error;
#[cfg(feature = "visa")]
use tracing::info;
use tracing::{debug, trace};

/// Errors from lock-in operations.
#[derive(Error, Debug)]
pub enum Sr830Error {
    /// Discovery did not yield a usable instrument.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// A setting code outside the instrument's fixed set. Nothing was
    /// written to the bus.
    #[error("invalid {setting} code {code}")]
    InvalidParameter { setting: &'static str, code: u8 },

    /// The transport could not be opened.
    #[error("failed to open bus: {0}")]
    Open(#[source] BusError),

    /// The transport failed while a command was in flight.
    #[error("bus error during {command:?}: {source}")]
    Bus {
        command: String,
        #[source]
        source: BusError,
    },

    /// The instrument's reply did not parse.
    #[error("unparseable response {response:?} to {query:?}")]
    Parse { query: String, response: String },
}

/// Result type for lock-in operations.
pub type Sr830Result<T> = Result<T, Sr830Error>;

/// One simultaneous reading of X, Y, R, and theta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    /// In-phase component, in V.
    pub x: f64,
    /// Quadrature component, in V.
    pub y: f64,
    /// Magnitude, in V.
    pub r: f64,
    /// Phase relative to the reference, in degrees.
    pub theta: f64,
}

/// Session with one SR830 over a [`Bus`].
pub struct Sr830<B: Bus> {
    bus: B,
}

#[cfg(feature = "visa")]
impl Sr830<VisaBus> {
    /// Open the instrument at an explicit VISA resource address.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sr830::Sr830;
    ///
    /// let mut lockin = Sr830::open("GPIB0::8::INSTR")?;
    /// println!("{}", lockin.idn()?);
    /// # Ok::<(), sr830::Sr830Error>(())
    /// ```
    pub fn open(resource: &str) -> Sr830Result<Self> {
        let bus = VisaBus::open(resource).map_err(Sr830Error::Open)?;
        info!("opened SR830 at {}", resource);
        Ok(Self::with_bus(bus))
    }

    /// Open the first GPIB instrument found on the bus.
    ///
    /// Fails with [`Sr830Error::DeviceNotFound`] when the search comes back
    /// empty, before any session is opened.
    pub fn open_first() -> Sr830Result<Self> {
        match VisaBus::find_first(GPIB_SEARCH).map_err(Sr830Error::Open)? {
            Some(bus) => {
                info!("opened first GPIB instrument");
                Ok(Self::with_bus(bus))
            }
            None => Err(Sr830Error::DeviceNotFound("no GPIB resources available".to_string())),
        }
    }
}

impl<B: Bus> Sr830<B> {
    /// Wrap an already-open bus.
    pub fn with_bus(bus: B) -> Self {
        Self { bus }
    }

    fn write(&mut self, command: &str) -> Sr830Result<()> {
        debug!("SR830 send: {:?}", command);
        self.bus
            .write(command)
            .map_err(|source| Sr830Error::Bus { command: command.to_string(), source })
    }

    fn query(&mut self, query: &str) -> Sr830Result<String> {
        debug!("SR830 send: {:?}", query);
        let response = self
            .bus
            .query(query)
            .map_err(|source| Sr830Error::Bus { command: query.to_string(), source })?;
        trace!("SR830 recv: {:?}", response);
        Ok(response)
    }

    fn query_parsed<T: std::str::FromStr>(&mut self, query: &str) -> Sr830Result<T> {
        let response = self.query(query)?;
        parse_one(query, &response)
    }

    // ==================== Instrument-Wide Actions ====================

    /// Identification string (`*IDN?`).
    pub fn idn(&mut self) -> Sr830Result<String> {
        Ok(self.query("*IDN?")?.trim().to_string())
    }

    /// Reset to the factory power-on state (`*RST`).
    pub fn reset(&mut self) -> Sr830Result<()> {
        self.write("*RST")
    }

    /// Clear the status registers (`*CLS`).
    pub fn clear_status(&mut self) -> Sr830Result<()> {
        self.write("*CLS")
    }

    /// Lock or release the front panel.
    ///
    /// `OVRM 0` blocks the panel keys during remote control; `OVRM 1`
    /// leaves them live.
    pub fn set_front_panel_lock(&mut self, locked: bool) -> Sr830Result<()> {
        if locked {
            self.write("OVRM 0")
        } else {
            self.write("OVRM 1")
        }
    }

    // ==================== Auto Functions ====================

    /// Run auto-phase (`APHS`).
    pub fn auto_phase(&mut self) -> Sr830Result<()> {
        self.write("APHS")
    }

    /// Run auto-gain (`AGAN`).
    pub fn auto_gain(&mut self) -> Sr830Result<()> {
        self.write("AGAN")
    }

    /// Run auto-reserve (`ARSV`).
    pub fn auto_reserve(&mut self) -> Sr830Result<()> {
        self.write("ARSV")
    }

    /// Auto-offset X (1), Y (2), or R (3) (`AOFF`).
    pub fn auto_offset(&mut self, channel: u8) -> Sr830Result<()> {
        self.write(&format!("AOFF {channel}"))
    }

    // ==================== Gain and Time Constant ====================

    /// Current time constant (`OFLT?`).
    pub fn time_constant(&mut self) -> Sr830Result<TimeConstant> {
        let code: u8 = self.query_parsed("OFLT?")?;
        TimeConstant::from_code(code)
    }

    /// Set the time constant (`OFLT`).
    pub fn set_time_constant(&mut self, tau: TimeConstant) -> Sr830Result<()> {
        self.write(&format!("OFLT {}", tau.code()))
    }

    /// Set the time constant by wire code, validating it first.
    pub fn set_time_constant_code(&mut self, code: u8) -> Sr830Result<()> {
        self.set_time_constant(TimeConstant::from_code(code)?)
    }

    /// Current full-scale sensitivity (`SENS?`).
    pub fn sensitivity(&mut self) -> Sr830Result<Sensitivity> {
        let code: u8 = self.query_parsed("SENS?")?;
        Sensitivity::from_code(code)
    }

    /// Set the full-scale sensitivity (`SENS`).
    pub fn set_sensitivity(&mut self, sensitivity: Sensitivity) -> Sr830Result<()> {
        self.write(&format!("SENS {}", sensitivity.code()))
    }

    /// Set the sensitivity by wire code, validating it first.
    pub fn set_sensitivity_code(&mut self, code: u8) -> Sr830Result<()> {
        self.set_sensitivity(Sensitivity::from_code(code)?)
    }

    /// Dynamic reserve mode code (`RMOD?`): 0 high reserve, 1 normal,
    /// 2 low noise.
    pub fn reserve_mode(&mut self) -> Sr830Result<u8> {
        self.query_parsed("RMOD?")
    }

    /// Set the dynamic reserve mode (`RMOD`).
    pub fn set_reserve_mode(&mut self, mode: u8) -> Sr830Result<()> {
        self.write(&format!("RMOD {mode}"))
    }

    /// Low-pass filter slope code (`OFSL?`): 0-3 for 6/12/18/24 dB/oct.
    pub fn filter_slope(&mut self) -> Sr830Result<u8> {
        self.query_parsed("OFSL?")
    }

    /// Set the low-pass filter slope (`OFSL`).
    pub fn set_filter_slope(&mut self, slope: u8) -> Sr830Result<()> {
        self.write(&format!("OFSL {slope}"))
    }

    /// Synchronous filter state (`SYNC?`): 0 off, 1 on below 200 Hz.
    pub fn sync_filter(&mut self) -> Sr830Result<u8> {
        self.query_parsed("SYNC?")
    }

    /// Set the synchronous filter (`SYNC`).
    pub fn set_sync_filter(&mut self, state: u8) -> Sr830Result<()> {
        self.write(&format!("SYNC {state}"))
    }

    // ==================== Reference ====================

    /// Reference source code (`FMOD?`): 0 external, 1 internal.
    pub fn reference_source(&mut self) -> Sr830Result<u8> {
        self.query_parsed("FMOD?")
    }

    /// Set the reference source (`FMOD`): 0 external, 1 internal.
    pub fn set_reference_source(&mut self, source: u8) -> Sr830Result<()> {
        self.write(&format!("FMOD {source}"))
    }

    /// External reference trigger code (`RSLP?`): 0 sine zero crossing,
    /// 1 TTL rising edge, 2 TTL falling edge.
    pub fn reference_trigger(&mut self) -> Sr830Result<u8> {
        self.query_parsed("RSLP?")
    }

    /// Set the external reference trigger (`RSLP`).
    pub fn set_reference_trigger(&mut self, slope: u8) -> Sr830Result<()> {
        self.write(&format!("RSLP {slope}"))
    }

    /// Detection harmonic (`HARM?`).
    pub fn harmonic(&mut self) -> Sr830Result<u16> {
        self.query_parsed("HARM?")
    }

    /// Set the detection harmonic (`HARM`), 1 to 19999.
    pub fn set_harmonic(&mut self, harmonic: u16) -> Sr830Result<()> {
        self.write(&format!("HARM {harmonic}"))
    }

    /// Reference frequency in Hz (`FREQ?`).
    pub fn frequency(&mut self) -> Sr830Result<f64> {
        self.query_parsed("FREQ?")
    }

    /// Set the internal reference frequency in Hz (`FREQ`).
    pub fn set_frequency(&mut self, hz: f64) -> Sr830Result<()> {
        self.write(&format!("FREQ {hz:.6}"))
    }

    /// Sine output amplitude in V rms (`SLVL?`).
    pub fn amplitude(&mut self) -> Sr830Result<f64> {
        self.query_parsed("SLVL?")
    }

    /// Set the sine output amplitude in V rms (`SLVL`), 0.004 to 5.0.
    pub fn set_amplitude(&mut self, volts: f64) -> Sr830Result<()> {
        self.write(&format!("SLVL {volts:.6}"))
    }

    /// Reference phase shift in degrees (`PHAS?`).
    pub fn phase(&mut self) -> Sr830Result<f64> {
        self.query_parsed("PHAS?")
    }

    /// Set the reference phase shift in degrees (`PHAS`).
    pub fn set_phase(&mut self, degrees: f64) -> Sr830Result<()> {
        self.write(&format!("PHAS {degrees:.6}"))
    }

    // ==================== Signal Input ====================

    /// Input configuration code (`ISRC?`): 0 A, 1 A-B, 2 I (1 Mohm),
    /// 3 I (100 Mohm).
    pub fn input_source(&mut self) -> Sr830Result<u8> {
        self.query_parsed("ISRC?")
    }

    /// Set the input configuration (`ISRC`).
    pub fn set_input_source(&mut self, source: u8) -> Sr830Result<()> {
        self.write(&format!("ISRC {source}"))
    }

    /// Input shield grounding code (`IGND?`): 0 float, 1 ground.
    pub fn input_ground(&mut self) -> Sr830Result<u8> {
        self.query_parsed("IGND?")
    }

    /// Set the input shield grounding (`IGND`).
    pub fn set_input_ground(&mut self, grounding: u8) -> Sr830Result<()> {
        self.write(&format!("IGND {grounding}"))
    }

    /// Input coupling code (`ICPL?`): 0 AC, 1 DC.
    pub fn input_coupling(&mut self) -> Sr830Result<u8> {
        self.query_parsed("ICPL?")
    }

    /// Set the input coupling (`ICPL`).
    pub fn set_input_coupling(&mut self, coupling: u8) -> Sr830Result<()> {
        self.write(&format!("ICPL {coupling}"))
    }

    /// Line notch filter code (`ILIN?`): 0 none, 1 line, 2 2x line, 3 both.
    pub fn line_filter(&mut self) -> Sr830Result<u8> {
        self.query_parsed("ILIN?")
    }

    /// Set the line notch filters (`ILIN`).
    pub fn set_line_filter(&mut self, filters: u8) -> Sr830Result<()> {
        self.write(&format!("ILIN {filters}"))
    }

    // ==================== Display, Offset, Aux ====================

    /// Display and ratio codes for channel 1 or 2 (`DDEF?`).
    pub fn display(&mut self, channel: u8) -> Sr830Result<(u8, u8)> {
        let query = format!("DDEF? {channel}");
        let response = self.query(&query)?;
        let values = parse_list(&query, &response, 2)?;
        Ok((values[0] as u8, values[1] as u8))
    }

    /// Set the display and ratio for channel 1 or 2 (`DDEF`).
    pub fn set_display(&mut self, channel: u8, display: u8, ratio: u8) -> Sr830Result<()> {
        self.write(&format!("DDEF {channel}, {display}, {ratio}"))
    }

    /// Output offset in percent and expand code for X (1), Y (2), or
    /// R (3) (`OEXP?`).
    pub fn offset_expand(&mut self, channel: u8) -> Sr830Result<(f64, u8)> {
        let query = format!("OEXP? {channel}");
        let response = self.query(&query)?;
        let values = parse_list(&query, &response, 2)?;
        Ok((values[0], values[1] as u8))
    }

    /// Set the output offset in percent and the expand code (`OEXP`).
    pub fn set_offset_expand(&mut self, channel: u8, offset: f64, expand: u8) -> Sr830Result<()> {
        self.write(&format!("OEXP {channel}, {offset:.6}, {expand}"))
    }

    /// Aux output voltage (`AUXV?`), outputs 1-4.
    pub fn aux_output(&mut self, output: u8) -> Sr830Result<f64> {
        self.query_parsed(&format!("AUXV? {output}"))
    }

    /// Set an aux output voltage (`AUXV`), -10.5 V to 10.5 V.
    pub fn set_aux_output(&mut self, output: u8, volts: f64) -> Sr830Result<()> {
        self.write(&format!("AUXV {output}, {volts:.3}"))
    }

    /// Read an aux input voltage (`OAUX?`), inputs 1-4.
    pub fn aux_input(&mut self, input: u8) -> Sr830Result<f64> {
        self.query_parsed(&format!("OAUX? {input}"))
    }

    // ==================== Measurements ====================

    /// In-phase component X in V (`OUTP? 1`).
    pub fn x(&mut self) -> Sr830Result<f64> {
        self.query_parsed("OUTP? 1")
    }

    /// Quadrature component Y in V (`OUTP? 2`).
    pub fn y(&mut self) -> Sr830Result<f64> {
        self.query_parsed("OUTP? 2")
    }

    /// Magnitude R in V (`OUTP? 3`).
    pub fn r(&mut self) -> Sr830Result<f64> {
        self.query_parsed("OUTP? 3")
    }

    /// Signal phase in degrees (`OUTP? 4`).
    pub fn theta(&mut self) -> Sr830Result<f64> {
        self.query_parsed("OUTP? 4")
    }

    /// Read X, Y, R, and theta in one transfer (`SNAP?`).
    ///
    /// The four values are sampled at the same instant, which chaining the
    /// individual [`x`](Self::x)/[`y`](Self::y) queries cannot guarantee.
    pub fn snapshot(&mut self) -> Sr830Result<Snapshot> {
        const QUERY: &str = "SNAP?1,2,3,4";
        let response = self.query(QUERY)?;
        let values = parse_list(QUERY, &response, 4)?;
        Ok(Snapshot { x: values[0], y: values[1], r: values[2], theta: values[3] })
    }
}

fn parse_one<T: std::str::FromStr>(query: &str, response: &str) -> Sr830Result<T> {
    response.trim().parse().map_err(|_| parse_err(query, response))
}

fn parse_list(query: &str, response: &str, expected: usize) -> Sr830Result<Vec<f64>> {
    let values: Vec<f64> = response
        .trim()
        .split(',')
        .map(|field| field.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| parse_err(query, response))?;
    if values.len() != expected {
        return Err(parse_err(query, response));
    }
    Ok(values)
}

fn parse_err(query: &str, response: &str) -> Sr830Error {
    Sr830Error::Parse { query: query.to_string(), response: response.to_string() }
}
