//! `belfry-hal` – hardware abstraction for the clock-motor controller.
//!
//! The rest of the daemon only ever talks to the [`MotorDriver`] and
//! [`StopButton`] traits, so backends can be swapped without touching the
//! Safety Gate or the scheduler:
//!
//! - [`sim`] – in-process simulation backend for tests and hardware-free
//!   development; records every actuator write.
//! - [`wiring`] – wiringOP CLI backend for the Orange Pi 5 deployment,
//!   driving an L298N motor driver through the `gpio` binary.

pub mod driver;
pub mod pins;
pub mod sim;
pub mod wiring;

pub use driver::{MotorDriver, StopButton};
pub use pins::PinMap;
pub use sim::{MotorWrite, SimButtonHandle, SimMotorDriver, SimMotorLog, SimStopButton};
pub use wiring::{WiringOpButton, WiringOpDriver};
