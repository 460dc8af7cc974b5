//! Driver for Thorlabs BBD2xx benchtop brushless motor controllers.
//!
//! The vendor motion SDK sits behind the traits in [`sdk`]; the [`Bbd`]
//! session owns one controller channel through them and carries the bench's
//! lifecycle rules: connect-enable-home-park bring-up, recovery from
//! timeouts inside the stage's defective travel region, and a stuck-axis
//! detector that recycles the connection.
//!
//! [`SimDeviceManager`] provides the same traits in memory, so everything
//! here runs without hardware:
//!
//! ```
//! use bbd2xx::{Bbd, SimDeviceManager};
//!
//! let mut axis = Bbd::open(Box::new(SimDeviceManager::new()), None, 1)?;
//! axis.move_to(25.0)?;
//! assert_eq!(axis.position()?, 25.0);
//! # Ok::<(), bbd2xx::BbdError>(())
//! ```

pub mod bbd;
pub mod sdk;
pub mod sim;

pub use bbd::{Bbd, BbdConfig, BbdError, BbdResult};
pub use sdk::{
    DeviceInfo, DeviceManager, Direction, MotorChannel, MotorDevice, SdkError, SdkResult,
    VelocityParams,
};
pub use sim::SimDeviceManager;
