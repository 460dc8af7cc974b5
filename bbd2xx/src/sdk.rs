//! Vendor SDK boundary.
//!
//! The Thorlabs motion SDK lives outside this crate; the traits here model
//! the narrow slice of it that the [`Bbd`](crate::Bbd) session actually
//! touches. A backend for real hardware implements them against the vendor
//! runtime, and [`SimDeviceManager`](crate::SimDeviceManager) implements
//! them in memory so the session logic runs on any desk.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by an SDK backend.
#[derive(Error, Debug)]
pub enum SdkError {
    /// A blocking operation did not complete within its wait bound.
    ///
    /// Kept separate from [`Fault`](SdkError::Fault): the session applies a
    /// recovery policy to timed-out homing and move waits.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The device or channel is not in a connected state.
    #[error("device not connected")]
    NotConnected,

    /// The controller has no channel at the requested index.
    #[error("no channel at index {0}")]
    NoSuchChannel(u8),

    /// Any other fault reported by the SDK.
    #[error("device fault: {0}")]
    Fault(String),
}

/// Result type for SDK operations.
pub type SdkResult<T> = Result<T, SdkError>;

/// Direction of a relative move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Velocity profile of a motor channel, in mm/s and mm/s^2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityParams {
    pub min_velocity: f64,
    pub max_velocity: f64,
    pub acceleration: f64,
}

/// Identity of the hardware behind a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub name: String,
    pub firmware_version: String,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (s/n {}, fw {})", self.name, self.serial, self.firmware_version)
    }
}

/// Device discovery and construction.
pub trait DeviceManager {
    /// Rebuild the device list and return the serial number of every
    /// benchtop brushless controller currently attached.
    fn device_list(&self) -> SdkResult<Vec<String>>;

    /// Create a handle for the controller with the given serial number.
    ///
    /// The handle starts out disconnected; call
    /// [`MotorDevice::connect`] before using its channels.
    fn open_device(&self, serial: &str) -> SdkResult<Box<dyn MotorDevice>>;
}

/// A benchtop controller holding up to three motor channels.
pub trait MotorDevice {
    fn connect(&mut self, serial: &str) -> SdkResult<()>;
    fn disconnect(&mut self) -> SdkResult<()>;
    /// Release SDK resources held by this handle.
    fn shutdown(&mut self);
    fn is_connected(&self) -> bool;
    /// Handle to the channel at the given 1-based index.
    fn channel(&self, index: u8) -> SdkResult<Box<dyn MotorChannel>>;
}

/// One motor channel of a controller.
///
/// Position units are millimetres throughout. The blocking calls (`home`,
/// `move_to`, `move_relative`) return once motion completes or the wait
/// bound expires with [`SdkError::Timeout`].
pub trait MotorChannel {
    /// Start background status polling at the given interval.
    fn start_polling(&mut self, interval: Duration) -> SdkResult<()>;
    fn stop_polling(&mut self);
    /// Energize the motor.
    fn enable(&mut self) -> SdkResult<()>;
    fn is_enabled(&self) -> bool;
    fn is_connected(&self) -> bool;
    fn is_homed(&self) -> bool;
    /// Block until the channel's settings are initialized.
    fn wait_for_settings(&mut self, timeout: Duration) -> SdkResult<()>;
    /// Load the persisted motor configuration so unit conversions apply.
    fn load_motor_config(&mut self) -> SdkResult<()>;
    fn home(&mut self, timeout: Duration) -> SdkResult<()>;
    fn move_to(&mut self, position_mm: f64, timeout: Duration) -> SdkResult<()>;
    fn move_relative(
        &mut self,
        direction: Direction,
        distance_mm: f64,
        timeout: Duration,
    ) -> SdkResult<()>;
    /// Current position at the controller's full reported precision.
    fn position(&self) -> f64;
    fn velocity_params(&self) -> SdkResult<VelocityParams>;
    fn set_velocity_params(&mut self, params: VelocityParams) -> SdkResult<()>;
    fn device_info(&self) -> SdkResult<DeviceInfo>;
    fn disconnect(&mut self) -> SdkResult<()>;
    /// Release SDK resources held by this handle.
    fn shutdown(&mut self);
}
