//! Session driver for one channel of a BBD2xx benchtop controller.
//!
//! # Overview
//!
//! [`Bbd`] owns a controller channel through the [`crate::sdk`] traits and
//! carries the lifecycle the bench depends on:
//!
//! - Opening a session discovers the controller, connects it, enables and
//!   homes the channel, and parks it at a reference position.
//! - Homing and move timeouts that strand the carriage below 17 mm are
//!   recovered by re-enabling the channel instead of failing. The stage on
//!   this bench has a defective travel region under that coordinate which
//!   stalls the completion wait even though the carriage is fine.
//! - [`Bbd::reset_if_stuck`] recycles the whole connection when a window of
//!   position samples shows no forward motion, which is what a wedged
//!   controller looks like from software after many hours of stepping.
//!
//! All waits are bounded by the durations in [`BbdConfig`].
//!
//! # Example
//!
//! ```no_run
//! use bbd2xx::{Bbd, SimDeviceManager};
//!
//! // With no hardware attached, drive the simulated backend.
//! let mut axis = Bbd::open(Box::new(SimDeviceManager::new()), None, 1)?;
//! axis.move_to(150.0)?;
//! println!("at {:.4} mm", axis.position()?);
//! # Ok::<(), bbd2xx::BbdError>(())
//! ```

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::sdk::{
    DeviceInfo, DeviceManager, Direction, MotorChannel, MotorDevice, SdkError, VelocityParams,
};

/// Errors from session operations.
#[derive(Error, Debug)]
pub enum BbdError {
    /// Discovery did not yield a usable controller.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Connecting the device or bringing up its channel failed.
    #[error("failed to connect to controller {serial}: {source}")]
    Connection {
        serial: String,
        #[source]
        source: SdkError,
    },

    /// Homing failed for a reason other than a tolerated timeout.
    #[error("failed to home axis: {0}")]
    Homing(#[source] SdkError),

    /// A homing or move wait timed out at or beyond the defect zone.
    #[error("move timed out at {position_mm} mm")]
    MoveTimeout {
        position_mm: f64,
        #[source]
        source: SdkError,
    },

    /// A move failed for a reason other than a tolerated timeout.
    #[error("failed to move axis: {0}")]
    Move(#[source] SdkError),

    /// Any other SDK failure, annotated with the operation in flight.
    #[error("{op} failed: {source}")]
    Sdk {
        op: &'static str,
        #[source]
        source: SdkError,
    },
}

/// Result type for session operations.
pub type BbdResult<T> = Result<T, BbdError>;

/// Tunable constants of the session lifecycle.
///
/// The defaults match the bench this driver was written for; override them
/// with [`Bbd::open_with`] when the setup differs.
#[derive(Debug, Clone)]
pub struct BbdConfig {
    /// Park position commanded after every successful home, in mm.
    pub reference_position_mm: f64,
    /// Upper edge of the stage's defective travel region, in mm. A homing
    /// or move timeout below this position is recovered, not reported.
    pub defect_zone_mm: f64,
    /// Wait bound for channel settings to initialize after connecting.
    pub settings_init_timeout: Duration,
    /// Background status polling period.
    pub poll_interval: Duration,
    /// Settle delay after starting polling and again after enabling.
    pub enable_settle: Duration,
    /// Wait bound for homing.
    pub home_timeout: Duration,
    /// Wait bound for absolute and relative moves.
    pub move_timeout: Duration,
}

impl Default for BbdConfig {
    fn default() -> Self {
        Self {
            reference_position_mm: 20.0,
            defect_zone_mm: 17.0,
            settings_init_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
            enable_settle: Duration::from_millis(500),
            home_timeout: Duration::from_secs(30),
            move_timeout: Duration::from_secs(60),
        }
    }
}

/// Session with one channel of a benchtop brushless motor controller.
pub struct Bbd {
    manager: Box<dyn DeviceManager>,
    serial: String,
    channel_index: u8,
    config: BbdConfig,
    device: Option<Box<dyn MotorDevice>>,
    channel: Option<Box<dyn MotorChannel>>,
}

// The backend handles are trait objects without `Debug`, so report their
// presence instead of their contents.
impl std::fmt::Debug for Bbd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bbd")
            .field("serial", &self.serial)
            .field("channel_index", &self.channel_index)
            .field("config", &self.config)
            .field("device", &self.device.is_some())
            .field("channel", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}

impl Bbd {
    // ==================== Session Lifecycle ====================

    /// Open a session with the default configuration.
    ///
    /// Discovers attached controllers through `manager`, picks the one with
    /// the given serial number (or the first discovered when `serial` is
    /// `None`), and runs the full bring-up: connect, enable, home, park.
    ///
    /// # Errors
    ///
    /// [`BbdError::DeviceNotFound`] when discovery comes back empty or the
    /// requested serial is not attached; connection and homing errors
    /// otherwise.
    pub fn open(
        manager: Box<dyn DeviceManager>,
        serial: Option<&str>,
        channel: u8,
    ) -> BbdResult<Self> {
        Self::open_with(manager, serial, channel, BbdConfig::default())
    }

    /// Open a session with an explicit configuration.
    pub fn open_with(
        manager: Box<dyn DeviceManager>,
        serial: Option<&str>,
        channel: u8,
        config: BbdConfig,
    ) -> BbdResult<Self> {
        let serials = manager
            .device_list()
            .map_err(|e| BbdError::Sdk { op: "device discovery", source: e })?;
        let serial = match serial {
            Some(serial) => {
                if !serials.iter().any(|s| s == serial) {
                    return Err(BbdError::DeviceNotFound(format!(
                        "{serial} is not an attached controller"
                    )));
                }
                serial.to_string()
            }
            None => match serials.first() {
                Some(serial) => serial.clone(),
                None => {
                    return Err(BbdError::DeviceNotFound("no controllers attached".to_string()))
                }
            },
        };

        let mut bbd = Self {
            manager,
            serial,
            channel_index: channel,
            config,
            device: None,
            channel: None,
        };
        bbd.connect()?;
        Ok(bbd)
    }

    /// Connect the controller and bring the axis to its parked state.
    ///
    /// Always starts from a clean slate: any existing connection is torn
    /// down first and the controller must still appear in a fresh device
    /// list. On success the channel is enabled, homed, and parked at
    /// [`BbdConfig::reference_position_mm`].
    pub fn connect(&mut self) -> BbdResult<()> {
        self.disconnect();

        debug!("connecting to controller {} channel {}", self.serial, self.channel_index);
        let serials = self
            .manager
            .device_list()
            .map_err(|e| BbdError::Sdk { op: "device discovery", source: e })?;
        if !serials.iter().any(|s| s == &self.serial) {
            return Err(BbdError::DeviceNotFound(format!(
                "{} is not an attached controller",
                self.serial
            )));
        }

        let mut device = self
            .manager
            .open_device(&self.serial)
            .map_err(|e| self.connection_err(e))?;
        device.connect(&self.serial).map_err(|e| self.connection_err(e))?;

        let mut channel = device.channel(self.channel_index).map_err(|e| self.connection_err(e))?;
        channel
            .wait_for_settings(self.config.settings_init_timeout)
            .map_err(|e| self.connection_err(e))?;

        self.device = Some(device);
        self.channel = Some(channel);

        self.enable_channel()?;
        self.home()?;
        self.move_to(self.config.reference_position_mm)?;

        let position_mm = self.position()?;
        info!(
            "controller {} channel {} ready at {:.4} mm",
            self.serial, self.channel_index, position_mm
        );
        Ok(())
    }

    fn connection_err(&self, source: SdkError) -> BbdError {
        BbdError::Connection { serial: self.serial.clone(), source }
    }

    /// Tear down the channel and device handles.
    ///
    /// Best effort: sub-step failures are logged and swallowed so teardown
    /// always completes, and both handles end up released. Safe to call at
    /// any time, including repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if channel.is_connected() {
                channel.stop_polling();
                if let Err(e) = channel.disconnect() {
                    warn!("channel disconnect failed: {}", e);
                }
            }
            channel.shutdown();
        }
        if let Some(mut device) = self.device.take() {
            if device.is_connected() {
                if let Err(e) = device.disconnect() {
                    warn!("device disconnect failed: {}", e);
                }
            }
            device.shutdown();
        }
    }

    /// Start polling, energize the motor, and load its configuration.
    ///
    /// Does nothing unless the device is connected. The bring-up order is
    /// the one the vendor documents: poll, settle, enable, settle, then
    /// load the motor configuration so unit conversions are in place.
    pub fn enable_channel(&mut self) -> BbdResult<()> {
        if !self.is_connected() {
            return Ok(());
        }
        let channel = match self.channel.as_mut() {
            Some(channel) => channel,
            None => return Ok(()),
        };
        channel
            .start_polling(self.config.poll_interval)
            .map_err(|e| BbdError::Sdk { op: "start polling", source: e })?;
        std::thread::sleep(self.config.enable_settle);
        channel.enable().map_err(|e| BbdError::Sdk { op: "enable motor", source: e })?;
        std::thread::sleep(self.config.enable_settle);
        channel
            .load_motor_config()
            .map_err(|e| BbdError::Sdk { op: "load motor configuration", source: e })?;
        Ok(())
    }

    // ==================== Motion ====================

    /// Home the axis.
    ///
    /// Does nothing if no channel handle is held. A timeout that leaves the
    /// carriage below the defect zone is recovered silently; see
    /// [`BbdConfig::defect_zone_mm`].
    pub fn home(&mut self) -> BbdResult<()> {
        let timeout = self.config.home_timeout;
        let channel = match self.channel.as_mut() {
            Some(channel) => channel,
            None => return Ok(()),
        };
        match channel.home(timeout) {
            Ok(()) => Ok(()),
            Err(e @ SdkError::Timeout(_)) => self.tolerate_timeout(e),
            Err(e) => Err(BbdError::Homing(e)),
        }
    }

    /// Move to an absolute position in mm.
    ///
    /// Does nothing unless the channel is enabled. Timeouts follow the same
    /// defect-zone recovery as [`home`](Self::home).
    pub fn move_to(&mut self, position_mm: f64) -> BbdResult<()> {
        if !self.is_channel_enabled() {
            return Ok(());
        }
        let timeout = self.config.move_timeout;
        let channel = match self.channel.as_mut() {
            Some(channel) => channel,
            None => return Ok(()),
        };
        match channel.move_to(position_mm, timeout) {
            Ok(()) => Ok(()),
            Err(e @ SdkError::Timeout(_)) => self.tolerate_timeout(e),
            Err(e) => Err(BbdError::Move(e)),
        }
    }

    /// Move by a signed distance in mm. Negative distances move backward.
    ///
    /// Does nothing unless the channel is enabled.
    pub fn move_relative(&mut self, distance_mm: f64) -> BbdResult<()> {
        if !self.is_channel_enabled() {
            return Ok(());
        }
        let timeout = self.config.move_timeout;
        let channel = match self.channel.as_mut() {
            Some(channel) => channel,
            None => return Ok(()),
        };
        let direction = if distance_mm < 0.0 { Direction::Backward } else { Direction::Forward };
        match channel.move_relative(direction, distance_mm.abs(), timeout) {
            Ok(()) => Ok(()),
            Err(e @ SdkError::Timeout(_)) => self.tolerate_timeout(e),
            Err(e) => Err(BbdError::Move(e)),
        }
    }

    // The travel under `defect_zone_mm` is a known bad region of this
    // stage: the carriage arrives but the completion wait still times out.
    // Re-enabling the channel clears the condition. A timeout anywhere
    // else is a real fault.
    fn tolerate_timeout(&mut self, source: SdkError) -> BbdResult<()> {
        let position_mm = self.position()?;
        if position_mm < self.config.defect_zone_mm {
            warn!(
                "wait timed out at {:.4} mm, inside the defect zone; re-enabling channel",
                position_mm
            );
            self.enable_channel()
        } else {
            Err(BbdError::MoveTimeout { position_mm, source })
        }
    }

    /// Detect a wedged axis from a window of position samples and recycle
    /// the connection if needed.
    ///
    /// The window counts as stuck when no successive difference, rounded to
    /// 5 decimals, exceeds 1e-5 mm. The comparison is signed, so an axis
    /// drifting backward also counts. Returns `true` after the reconnect,
    /// `false` when the samples show motion.
    pub fn reset_if_stuck(&mut self, positions: &[f64]) -> BbdResult<bool> {
        if !is_stuck(positions) {
            return Ok(false);
        }
        warn!("axis shows no forward motion, recycling the connection");
        self.disconnect();
        self.connect()?;
        Ok(true)
    }

    // ==================== Status Queries ====================

    /// Whether the controller connection is open.
    pub fn is_connected(&self) -> bool {
        match &self.device {
            Some(device) => device.is_connected(),
            None => false,
        }
    }

    /// Whether the channel handle exists and reports connected.
    pub fn is_channel_connected(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        match &self.channel {
            Some(channel) => channel.is_connected(),
            None => false,
        }
    }

    /// Whether the motor is energized.
    pub fn is_channel_enabled(&self) -> bool {
        if !self.is_channel_connected() {
            return false;
        }
        match &self.channel {
            Some(channel) => channel.is_enabled(),
            None => false,
        }
    }

    /// Whether the axis has been homed since power-up.
    pub fn is_homed(&self) -> bool {
        if !self.is_channel_enabled() {
            return false;
        }
        match &self.channel {
            Some(channel) => channel.is_homed(),
            None => false,
        }
    }

    /// Current position in mm, rounded to 4 decimal places.
    ///
    /// The stage resolves 200 nm at best, so digits past the fourth
    /// decimal are noise.
    pub fn position(&self) -> BbdResult<f64> {
        let channel = self
            .channel
            .as_ref()
            .ok_or(BbdError::Sdk { op: "read position", source: SdkError::NotConnected })?;
        Ok(round_mm(channel.position()))
    }

    /// Serial number of the controller this session is bound to.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Identity of the hardware behind the channel.
    pub fn device_info(&self) -> BbdResult<DeviceInfo> {
        let channel = self
            .channel
            .as_ref()
            .ok_or(BbdError::Sdk { op: "read device info", source: SdkError::NotConnected })?;
        channel
            .device_info()
            .map_err(|e| BbdError::Sdk { op: "read device info", source: e })
    }

    // ==================== Velocity ====================

    /// Current velocity profile of the channel.
    pub fn velocity(&self) -> BbdResult<VelocityParams> {
        let channel = self.channel.as_ref().ok_or(BbdError::Sdk {
            op: "read velocity parameters",
            source: SdkError::NotConnected,
        })?;
        channel
            .velocity_params()
            .map_err(|e| BbdError::Sdk { op: "read velocity parameters", source: e })
    }

    /// Update the velocity profile, overwriting only the supplied fields.
    ///
    /// Fields passed as `None` keep the values read back from the
    /// controller. Does nothing if no channel handle is held.
    pub fn set_velocity(
        &mut self,
        max_velocity: f64,
        acceleration: Option<f64>,
        min_velocity: Option<f64>,
    ) -> BbdResult<()> {
        let channel = match self.channel.as_mut() {
            Some(channel) => channel,
            None => return Ok(()),
        };
        let mut params = channel
            .velocity_params()
            .map_err(|e| BbdError::Sdk { op: "read velocity parameters", source: e })?;
        params.max_velocity = max_velocity;
        if let Some(acceleration) = acceleration {
            params.acceleration = acceleration;
        }
        if let Some(min_velocity) = min_velocity {
            params.min_velocity = min_velocity;
        }
        channel
            .set_velocity_params(params)
            .map_err(|e| BbdError::Sdk { op: "write velocity parameters", source: e })
    }
}

impl Drop for Bbd {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Round a position to the 4 decimal places the hardware can resolve.
fn round_mm(position_mm: f64) -> f64 {
    (position_mm * 1e4).round() / 1e4
}

// An empty or single-sample window has no differences and counts as stuck.
fn is_stuck(positions: &[f64]) -> bool {
    positions.windows(2).all(|pair| {
        let diff = ((pair[1] - pair[0]) * 1e5).round() / 1e5;
        diff <= 1.0e-5
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        OpenDevice,
        Connect,
        StartPolling,
        Enable,
        LoadConfig,
        Home,
        MoveTo(f64),
        MoveRelative(Direction, f64),
        StopPolling,
        ChannelDisconnect,
        DeviceDisconnect,
    }

    /// Shared state of the scripted backend. Tests queue a one-shot error
    /// for a specific call and inspect the recorded calls afterwards.
    struct ScriptState {
        serials: Vec<String>,
        calls: Vec<Call>,
        position: f64,
        device_connected: bool,
        channel_connected: bool,
        enabled: bool,
        homed: bool,
        velocity: VelocityParams,
        home_result: Option<SdkError>,
        move_result: Option<SdkError>,
        settings_result: Option<SdkError>,
        disconnect_result: Option<SdkError>,
    }

    fn make_state(serials: &[&str]) -> Arc<Mutex<ScriptState>> {
        Arc::new(Mutex::new(ScriptState {
            serials: serials.iter().map(|s| s.to_string()).collect(),
            calls: Vec::new(),
            position: 0.0,
            device_connected: false,
            channel_connected: false,
            enabled: false,
            homed: false,
            velocity: VelocityParams { min_velocity: 0.0, max_velocity: 2.0, acceleration: 10.0 },
            home_result: None,
            move_result: None,
            settings_result: None,
            disconnect_result: None,
        }))
    }

    struct FakeManager {
        state: Arc<Mutex<ScriptState>>,
    }

    impl DeviceManager for FakeManager {
        fn device_list(&self) -> Result<Vec<String>, SdkError> {
            Ok(self.state.lock().unwrap().serials.clone())
        }

        fn open_device(&self, _serial: &str) -> Result<Box<dyn MotorDevice>, SdkError> {
            self.state.lock().unwrap().calls.push(Call::OpenDevice);
            Ok(Box::new(FakeDevice { state: self.state.clone() }))
        }
    }

    struct FakeDevice {
        state: Arc<Mutex<ScriptState>>,
    }

    impl MotorDevice for FakeDevice {
        fn connect(&mut self, _serial: &str) -> Result<(), SdkError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Connect);
            state.device_connected = true;
            state.channel_connected = true;
            Ok(())
        }

        fn disconnect(&mut self) -> Result<(), SdkError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::DeviceDisconnect);
            if let Some(err) = state.disconnect_result.take() {
                return Err(err);
            }
            state.device_connected = false;
            Ok(())
        }

        fn shutdown(&mut self) {}

        fn is_connected(&self) -> bool {
            self.state.lock().unwrap().device_connected
        }

        fn channel(&self, _index: u8) -> Result<Box<dyn MotorChannel>, SdkError> {
            Ok(Box::new(FakeChannel { state: self.state.clone() }))
        }
    }

    struct FakeChannel {
        state: Arc<Mutex<ScriptState>>,
    }

    impl MotorChannel for FakeChannel {
        fn start_polling(&mut self, _interval: Duration) -> Result<(), SdkError> {
            self.state.lock().unwrap().calls.push(Call::StartPolling);
            Ok(())
        }

        fn stop_polling(&mut self) {
            self.state.lock().unwrap().calls.push(Call::StopPolling);
        }

        fn enable(&mut self) -> Result<(), SdkError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Enable);
            state.enabled = true;
            Ok(())
        }

        fn is_enabled(&self) -> bool {
            self.state.lock().unwrap().enabled
        }

        fn is_connected(&self) -> bool {
            self.state.lock().unwrap().channel_connected
        }

        fn is_homed(&self) -> bool {
            self.state.lock().unwrap().homed
        }

        fn wait_for_settings(&mut self, _timeout: Duration) -> Result<(), SdkError> {
            if let Some(err) = self.state.lock().unwrap().settings_result.take() {
                return Err(err);
            }
            Ok(())
        }

        fn load_motor_config(&mut self) -> Result<(), SdkError> {
            self.state.lock().unwrap().calls.push(Call::LoadConfig);
            Ok(())
        }

        fn home(&mut self, _timeout: Duration) -> Result<(), SdkError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Home);
            if let Some(err) = state.home_result.take() {
                return Err(err);
            }
            state.position = 0.0;
            state.homed = true;
            Ok(())
        }

        fn move_to(&mut self, position_mm: f64, _timeout: Duration) -> Result<(), SdkError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::MoveTo(position_mm));
            if let Some(err) = state.move_result.take() {
                return Err(err);
            }
            state.position = position_mm;
            Ok(())
        }

        fn move_relative(
            &mut self,
            direction: Direction,
            distance_mm: f64,
            _timeout: Duration,
        ) -> Result<(), SdkError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::MoveRelative(direction, distance_mm));
            if let Some(err) = state.move_result.take() {
                return Err(err);
            }
            let signed = match direction {
                Direction::Forward => distance_mm,
                Direction::Backward => -distance_mm,
            };
            state.position += signed;
            Ok(())
        }

        fn position(&self) -> f64 {
            self.state.lock().unwrap().position
        }

        fn velocity_params(&self) -> Result<VelocityParams, SdkError> {
            Ok(self.state.lock().unwrap().velocity)
        }

        fn set_velocity_params(&mut self, params: VelocityParams) -> Result<(), SdkError> {
            self.state.lock().unwrap().velocity = params;
            Ok(())
        }

        fn device_info(&self) -> Result<DeviceInfo, SdkError> {
            Ok(DeviceInfo {
                serial: "73000001".to_string(),
                name: "scripted".to_string(),
                firmware_version: "0.0.0".to_string(),
            })
        }

        fn disconnect(&mut self) -> Result<(), SdkError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::ChannelDisconnect);
            if let Some(err) = state.disconnect_result.take() {
                return Err(err);
            }
            state.channel_connected = false;
            state.enabled = false;
            Ok(())
        }

        fn shutdown(&mut self) {}
    }

    fn test_config() -> BbdConfig {
        BbdConfig { enable_settle: Duration::ZERO, ..BbdConfig::default() }
    }

    fn open_session(state: &Arc<Mutex<ScriptState>>) -> Bbd {
        Bbd::open_with(Box::new(FakeManager { state: state.clone() }), None, 1, test_config())
            .unwrap()
    }

    fn count_calls(state: &Arc<Mutex<ScriptState>>, wanted: &Call) -> usize {
        state.lock().unwrap().calls.iter().filter(|call| *call == wanted).count()
    }

    #[test]
    fn test_open_connects_homes_and_parks() {
        let state = make_state(&["73000001"]);
        let bbd = open_session(&state);
        assert!(bbd.is_connected());
        assert!(bbd.is_channel_enabled());
        assert!(bbd.is_homed());
        assert_relative_eq!(bbd.position().unwrap(), 20.0);
        assert_eq!(count_calls(&state, &Call::Home), 1);
        assert_eq!(count_calls(&state, &Call::MoveTo(20.0)), 1);
    }

    #[test]
    fn test_open_fails_fast_with_no_devices() {
        let state = make_state(&[]);
        let manager = Box::new(FakeManager { state: state.clone() });
        let err = Bbd::open_with(manager, None, 1, test_config()).unwrap_err();
        assert!(matches!(err, BbdError::DeviceNotFound(_)));
        assert!(state.lock().unwrap().calls.is_empty());
    }

    #[test]
    fn test_open_rejects_unknown_serial() {
        let state = make_state(&["73000001"]);
        let err = Bbd::open_with(
            Box::new(FakeManager { state: state.clone() }),
            Some("73009999"),
            1,
            test_config(),
        )
        .unwrap_err();
        assert!(matches!(err, BbdError::DeviceNotFound(_)));
        assert!(state.lock().unwrap().calls.is_empty());
    }

    #[test]
    fn test_settings_wait_timeout_is_a_connection_error() {
        let state = make_state(&["73000001"]);
        state.lock().unwrap().settings_result = Some(SdkError::Timeout(Duration::from_secs(5)));
        let manager = Box::new(FakeManager { state: state.clone() });
        let err = Bbd::open_with(manager, None, 1, test_config()).unwrap_err();
        assert!(matches!(err, BbdError::Connection { .. }));
        assert!(err.to_string().contains("73000001"));
        assert_eq!(count_calls(&state, &Call::Enable), 0);
    }

    #[test]
    fn test_position_is_rounded_to_four_decimals() {
        let state = make_state(&["73000001"]);
        let bbd = open_session(&state);
        state.lock().unwrap().position = 12.345678;
        assert_relative_eq!(bbd.position().unwrap(), 12.3457);
        state.lock().unwrap().position = 3.00004999;
        assert_relative_eq!(bbd.position().unwrap(), 3.0);
    }

    #[test]
    fn test_homing_timeout_inside_defect_zone_reenables() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        {
            let mut st = state.lock().unwrap();
            st.position = 10.0;
            st.home_result = Some(SdkError::Timeout(Duration::from_secs(30)));
        }
        let enables_before = count_calls(&state, &Call::Enable);
        bbd.home().unwrap();
        assert_eq!(count_calls(&state, &Call::Enable), enables_before + 1);
    }

    #[test]
    fn test_homing_timeout_outside_defect_zone_fails() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        {
            let mut st = state.lock().unwrap();
            st.position = 18.0;
            st.home_result = Some(SdkError::Timeout(Duration::from_secs(30)));
        }
        let err = bbd.home().unwrap_err();
        assert!(matches!(err, BbdError::MoveTimeout { .. }));
        assert!(err.to_string().contains("18"));
    }

    #[test]
    fn test_move_timeout_follows_defect_zone_rule() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        {
            let mut st = state.lock().unwrap();
            st.position = 10.0;
            st.move_result = Some(SdkError::Timeout(Duration::from_secs(60)));
        }
        bbd.move_to(16.0).unwrap();

        {
            let mut st = state.lock().unwrap();
            st.position = 18.0;
            st.move_result = Some(SdkError::Timeout(Duration::from_secs(60)));
        }
        let err = bbd.move_to(19.0).unwrap_err();
        assert!(matches!(err, BbdError::MoveTimeout { .. }));
    }

    #[test]
    fn test_move_fault_escalates_without_recovery() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        state.lock().unwrap().move_result = Some(SdkError::Fault("motion error".to_string()));
        let err = bbd.move_to(19.0).unwrap_err();
        assert!(matches!(err, BbdError::Move(_)));
    }

    #[test]
    fn test_relative_moves_split_direction_and_magnitude() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        bbd.move_relative(-2.5).unwrap();
        bbd.move_relative(2.5).unwrap();
        let calls = state.lock().unwrap().calls.clone();
        assert!(calls.contains(&Call::MoveRelative(Direction::Backward, 2.5)));
        assert!(calls.contains(&Call::MoveRelative(Direction::Forward, 2.5)));
    }

    #[test]
    fn test_moves_are_ignored_while_disabled() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        state.lock().unwrap().enabled = false;
        bbd.move_to(150.0).unwrap();
        assert_eq!(count_calls(&state, &Call::MoveTo(150.0)), 0);
    }

    #[test]
    fn test_flat_window_recycles_the_connection() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        let connects_before = count_calls(&state, &Call::Connect);
        let window = vec![5.0; 100];
        assert!(bbd.reset_if_stuck(&window).unwrap());
        assert_eq!(count_calls(&state, &Call::Connect), connects_before + 1);
        assert!(bbd.is_channel_enabled());
    }

    #[test]
    fn test_retreating_window_counts_as_stuck() {
        // Signed comparison: a window drifting backward has no positive
        // differences at all.
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        let window: Vec<f64> = (0..50).map(|i| 10.0 - f64::from(i) * 0.01).collect();
        assert!(bbd.reset_if_stuck(&window).unwrap());
    }

    #[test]
    fn test_advancing_window_is_not_stuck() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        let connects_before = count_calls(&state, &Call::Connect);
        let window: Vec<f64> = (0..50).map(|i| 10.0 + f64::from(i) * 0.001).collect();
        assert!(!bbd.reset_if_stuck(&window).unwrap());
        assert_eq!(count_calls(&state, &Call::Connect), connects_before);
    }

    #[test]
    fn test_sub_resolution_jitter_counts_as_stuck() {
        // Steps of 1e-5 round to exactly the threshold, which is not
        // considered motion.
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        let window: Vec<f64> = (0..50).map(|i| 5.0 + f64::from(i) * 1.0e-5).collect();
        assert!(bbd.reset_if_stuck(&window).unwrap());
    }

    #[test]
    fn test_reconnect_fails_when_the_controller_vanishes() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        state.lock().unwrap().serials.clear();
        let err = bbd.reset_if_stuck(&[5.0; 100]).unwrap_err();
        assert!(matches!(err, BbdError::DeviceNotFound(_)));
        assert!(!bbd.is_connected());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        bbd.disconnect();
        assert!(!bbd.is_connected());
        assert!(!bbd.is_channel_enabled());
        bbd.disconnect();
        assert_eq!(count_calls(&state, &Call::DeviceDisconnect), 1);
        assert_eq!(count_calls(&state, &Call::ChannelDisconnect), 1);
    }

    #[test]
    fn test_teardown_continues_past_a_failing_channel_disconnect() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);
        state.lock().unwrap().disconnect_result =
            Some(SdkError::Fault("disconnect rejected".to_string()));

        bbd.disconnect();
        assert!(!bbd.is_connected());
        assert!(!bbd.is_channel_connected());
        assert_eq!(count_calls(&state, &Call::ChannelDisconnect), 1);
        assert_eq!(count_calls(&state, &Call::DeviceDisconnect), 1);
    }

    #[test]
    fn test_set_velocity_overwrites_only_supplied_fields() {
        let state = make_state(&["73000001"]);
        let mut bbd = open_session(&state);

        bbd.set_velocity(5.0, None, None).unwrap();
        {
            let st = state.lock().unwrap();
            assert_relative_eq!(st.velocity.max_velocity, 5.0);
            assert_relative_eq!(st.velocity.acceleration, 10.0);
            assert_relative_eq!(st.velocity.min_velocity, 0.0);
        }

        bbd.set_velocity(5.0, Some(25.0), Some(0.5)).unwrap();
        let st = state.lock().unwrap();
        assert_relative_eq!(st.velocity.acceleration, 25.0);
        assert_relative_eq!(st.velocity.min_velocity, 0.5);
    }
}
