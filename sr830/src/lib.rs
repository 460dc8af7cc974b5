//! Driver for the Stanford Research Systems SR830 lock-in amplifier.
//!
//! The instrument speaks newline-terminated ASCII over GPIB. [`Sr830`]
//! maps that command set onto typed methods and is generic over the
//! [`Bus`] transport, so the command layer tests against a scripted bus.
//!
//! ## Features
//!
//! - `visa`: [`VisaBus`], a real GPIB transport over the system VISA
//!   library, plus the `sr830_tool` binary. Off by default so the crate
//!   builds on machines without VISA installed.

pub mod bus;
pub mod lockin;
pub mod settings;

#[cfg(feature = "visa")]
pub use bus::VisaBus;
pub use bus::{Bus, BusError, BusResult};
pub use lockin::{Snapshot, Sr830, Sr830Error, Sr830Result};
pub use settings::{Sensitivity, TimeConstant};
