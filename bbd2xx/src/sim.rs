//! In-memory SDK backend.
//!
//! Moves complete instantly and homing lands on zero, which is enough to
//! exercise the whole session lifecycle with no hardware attached. The
//! `--simulate` flag of `bbd_tool` selects this backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::sdk::{
    DeviceInfo, DeviceManager, Direction, MotorChannel, MotorDevice, SdkError, SdkResult,
    VelocityParams,
};

const CHANNELS: u8 = 3;

/// Simulated benchtop controller backend.
pub struct SimDeviceManager {
    controllers: Vec<Arc<Mutex<SimController>>>,
}

struct SimController {
    serial: String,
    connected: bool,
    channels: [SimChannelState; CHANNELS as usize],
}

#[derive(Debug, Clone)]
struct SimChannelState {
    polling: bool,
    enabled: bool,
    homed: bool,
    position_mm: f64,
    velocity: VelocityParams,
}

impl SimDeviceManager {
    /// One simulated controller with a default serial number.
    pub fn new() -> Self {
        Self::with_serials(&["73000001"])
    }

    /// Simulated controllers with the given serial numbers.
    pub fn with_serials(serials: &[&str]) -> Self {
        Self {
            controllers: serials
                .iter()
                .map(|serial| Arc::new(Mutex::new(SimController::new(serial))))
                .collect(),
        }
    }

    /// A backend with nothing attached, for exercising discovery failures.
    pub fn empty() -> Self {
        Self { controllers: Vec::new() }
    }
}

impl Default for SimDeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SimController {
    fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            connected: false,
            channels: std::array::from_fn(|_| SimChannelState::default()),
        }
    }
}

impl Default for SimChannelState {
    fn default() -> Self {
        Self {
            polling: false,
            enabled: false,
            homed: false,
            position_mm: 0.0,
            velocity: VelocityParams {
                min_velocity: 0.0,
                max_velocity: 100.0,
                acceleration: 1000.0,
            },
        }
    }
}

// A poisoned lock only means some test panicked mid-update; the state is
// still usable.
fn lock(controller: &Arc<Mutex<SimController>>) -> MutexGuard<'_, SimController> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeviceManager for SimDeviceManager {
    fn device_list(&self) -> SdkResult<Vec<String>> {
        Ok(self.controllers.iter().map(|c| lock(c).serial.clone()).collect())
    }

    fn open_device(&self, serial: &str) -> SdkResult<Box<dyn MotorDevice>> {
        let controller = self
            .controllers
            .iter()
            .find(|c| lock(c).serial == serial)
            .ok_or_else(|| SdkError::Fault(format!("unknown serial {serial}")))?;
        Ok(Box::new(SimDevice { controller: controller.clone() }))
    }
}

struct SimDevice {
    controller: Arc<Mutex<SimController>>,
}

impl MotorDevice for SimDevice {
    fn connect(&mut self, serial: &str) -> SdkResult<()> {
        let mut controller = lock(&self.controller);
        if controller.serial != serial {
            return Err(SdkError::Fault(format!("serial mismatch: {serial}")));
        }
        controller.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> SdkResult<()> {
        let mut controller = lock(&self.controller);
        controller.connected = false;
        for channel in &mut controller.channels {
            channel.polling = false;
            channel.enabled = false;
        }
        Ok(())
    }

    fn shutdown(&mut self) {}

    fn is_connected(&self) -> bool {
        lock(&self.controller).connected
    }

    fn channel(&self, index: u8) -> SdkResult<Box<dyn MotorChannel>> {
        if index == 0 || index > CHANNELS {
            return Err(SdkError::NoSuchChannel(index));
        }
        Ok(Box::new(SimChannel {
            controller: self.controller.clone(),
            index: (index - 1) as usize,
        }))
    }
}

struct SimChannel {
    controller: Arc<Mutex<SimController>>,
    index: usize,
}

impl SimChannel {
    fn with_state<T>(&self, f: impl FnOnce(&mut SimChannelState) -> T) -> T {
        let mut controller = lock(&self.controller);
        f(&mut controller.channels[self.index])
    }

    fn ensure_connected(&self) -> SdkResult<()> {
        if lock(&self.controller).connected {
            Ok(())
        } else {
            Err(SdkError::NotConnected)
        }
    }
}

impl MotorChannel for SimChannel {
    fn start_polling(&mut self, _interval: Duration) -> SdkResult<()> {
        self.ensure_connected()?;
        self.with_state(|channel| channel.polling = true);
        Ok(())
    }

    fn stop_polling(&mut self) {
        self.with_state(|channel| channel.polling = false);
    }

    fn enable(&mut self) -> SdkResult<()> {
        self.ensure_connected()?;
        self.with_state(|channel| channel.enabled = true);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.with_state(|channel| channel.enabled)
    }

    fn is_connected(&self) -> bool {
        lock(&self.controller).connected
    }

    fn is_homed(&self) -> bool {
        self.with_state(|channel| channel.homed)
    }

    fn wait_for_settings(&mut self, _timeout: Duration) -> SdkResult<()> {
        self.ensure_connected()
    }

    fn load_motor_config(&mut self) -> SdkResult<()> {
        self.ensure_connected()
    }

    fn home(&mut self, _timeout: Duration) -> SdkResult<()> {
        self.ensure_connected()?;
        if !self.with_state(|channel| channel.enabled) {
            return Err(SdkError::Fault("channel not enabled".to_string()));
        }
        self.with_state(|channel| {
            channel.position_mm = 0.0;
            channel.homed = true;
        });
        Ok(())
    }

    fn move_to(&mut self, position_mm: f64, _timeout: Duration) -> SdkResult<()> {
        self.ensure_connected()?;
        self.with_state(|channel| channel.position_mm = position_mm);
        Ok(())
    }

    fn move_relative(
        &mut self,
        direction: Direction,
        distance_mm: f64,
        _timeout: Duration,
    ) -> SdkResult<()> {
        self.ensure_connected()?;
        let signed = match direction {
            Direction::Forward => distance_mm,
            Direction::Backward => -distance_mm,
        };
        self.with_state(|channel| channel.position_mm += signed);
        Ok(())
    }

    fn position(&self) -> f64 {
        self.with_state(|channel| channel.position_mm)
    }

    fn velocity_params(&self) -> SdkResult<VelocityParams> {
        Ok(self.with_state(|channel| channel.velocity))
    }

    fn set_velocity_params(&mut self, params: VelocityParams) -> SdkResult<()> {
        self.with_state(|channel| channel.velocity = params);
        Ok(())
    }

    fn device_info(&self) -> SdkResult<DeviceInfo> {
        let controller = lock(&self.controller);
        Ok(DeviceInfo {
            serial: controller.serial.clone(),
            name: "Benchtop Brushless Motor (simulated)".to_string(),
            firmware_version: "0.0.0".to_string(),
        })
    }

    fn disconnect(&mut self) -> SdkResult<()> {
        self.with_state(|channel| {
            channel.polling = false;
            channel.enabled = false;
        });
        Ok(())
    }

    fn shutdown(&mut self) {}
}
