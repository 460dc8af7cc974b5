//! Instrument bus boundary.
//!
//! The amplifier speaks newline-terminated ASCII over GPIB. [`Bus`] is the
//! seam between the command layer and the transport, which keeps the
//! command layer testable against a scripted bus. [`VisaBus`] (behind the
//! `visa` feature) is the real transport over the system VISA library.

use thiserror::Error;

/// Search expression matching any GPIB instrument resource.
pub const GPIB_SEARCH: &str = "GPIB?*INSTR";

/// Errors surfaced by a bus transport.
#[derive(Error, Debug)]
pub enum BusError {
    /// Low-level I/O error on the transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by the VISA library.
    #[cfg(feature = "visa")]
    #[error("VISA error: {0}")]
    Visa(#[from] visa_rs::Error),
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Synchronous request/response transport to one instrument.
///
/// `write` sends a command that expects no reply; `query` sends one and
/// blocks for a single response line. Termination characters are the
/// transport's concern, so implementations take bare command text.
pub trait Bus {
    fn write(&mut self, command: &str) -> BusResult<()>;
    fn query(&mut self, command: &str) -> BusResult<String>;
}

#[cfg(feature = "visa")]
pub use visa::VisaBus;

#[cfg(feature = "visa")]
mod visa {
    use std::ffi::CString;
    use std::io::{BufRead, BufReader, Write};
    use std::time::Duration;

    use tracing::debug;
    use visa_rs::prelude::*;

    use super::{Bus, BusError, BusResult};

    /// Wait bound for opening a VISA session.
    const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

    /// GPIB instrument session over the system VISA library.
    pub struct VisaBus {
        // Closing the resource manager tears down every session opened
        // through it, so it has to outlive the instrument handle.
        _rm: DefaultRM,
        instr: Instrument,
        resource: String,
    }

    impl VisaBus {
        /// Open the instrument at the given VISA resource address, e.g.
        /// `GPIB0::8::INSTR`.
        pub fn open(resource: &str) -> BusResult<Self> {
            let rm = DefaultRM::new()?;
            let name = resource_name(resource)?.into();
            let instr = rm.open(&name, AccessMode::NO_LOCK, OPEN_TIMEOUT)?;
            debug!("opened VISA resource {}", resource);
            Ok(Self { _rm: rm, instr, resource: resource.to_string() })
        }

        /// Open the first resource matching a search expression such as
        /// [`super::GPIB_SEARCH`]. Returns `Ok(None)` when nothing matches.
        pub fn find_first(expr: &str) -> BusResult<Option<Self>> {
            let rm = DefaultRM::new()?;
            let pattern = resource_name(expr)?.into();
            // The VISA library reports an empty match set as an error
            // status, not an empty list.
            let found = match rm.find_res(&pattern) {
                Ok(found) => found,
                Err(_) => return Ok(None),
            };
            let instr = rm.open(&found, AccessMode::NO_LOCK, OPEN_TIMEOUT)?;
            debug!("opened first VISA resource matching {}", expr);
            Ok(Some(Self { _rm: rm, instr, resource: expr.to_string() }))
        }

        /// The address or search expression this bus was opened with.
        pub fn resource(&self) -> &str {
            &self.resource
        }
    }

    fn resource_name(resource: &str) -> BusResult<CString> {
        CString::new(resource).map_err(|e| {
            BusError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })
    }

    impl Bus for VisaBus {
        fn write(&mut self, command: &str) -> BusResult<()> {
            let mut message = command.to_string();
            if !message.ends_with('\n') {
                message.push('\n');
            }
            self.instr.write_all(message.as_bytes()).map_err(io_to_vs_err)?;
            Ok(())
        }

        fn query(&mut self, command: &str) -> BusResult<String> {
            self.write(command)?;
            let mut response = String::new();
            let mut reader = BufReader::new(&self.instr);
            reader.read_line(&mut response).map_err(io_to_vs_err)?;
            Ok(response)
        }
    }
}
