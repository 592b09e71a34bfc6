//! In-process simulation backend for tests and hardware-free development.
//!
//! [`SimMotorDriver`] records every actuator write into a shared
//! [`SimMotorLog`] so tests can assert on the exact command traffic the
//! Safety Gate produced. [`SimStopButton`] is a button that tests (or a
//! developer at a REPL) can press programmatically.
//!
//! # Example
//!
//! ```rust
//! use belfry_hal::{MotorDriver, SimMotorDriver};
//! use belfry_types::ClockId;
//!
//! let (mut driver, log) = SimMotorDriver::new();
//! driver.set_channel(ClockId::One, true, 80).unwrap();
//! assert_eq!(log.writes().last().unwrap().duty, 80);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use belfry_types::{BelfryError, ClockId};

use crate::driver::{MotorDriver, StopButton};

/// One recorded actuator write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorWrite {
    pub channel: ClockId,
    pub enabled: bool,
    pub duty: u8,
}

/// Cloneable view onto a [`SimMotorDriver`]'s write log.
#[derive(Clone, Default)]
pub struct SimMotorLog {
    writes: Arc<Mutex<Vec<MotorWrite>>>,
}

impl SimMotorLog {
    /// Snapshot of every write issued so far, oldest first.
    pub fn writes(&self) -> Vec<MotorWrite> {
        self.writes.lock().expect("sim log lock poisoned").clone()
    }

    /// The most recent write for `channel`, if any.
    pub fn last_for(&self, channel: ClockId) -> Option<MotorWrite> {
        self.writes()
            .into_iter()
            .rev()
            .find(|w| w.channel == channel)
    }

    /// Discard the recorded history.
    pub fn clear(&self) {
        self.writes.lock().expect("sim log lock poisoned").clear();
    }
}

/// A simulated two-channel motor driver. Always succeeds.
#[derive(Default)]
pub struct SimMotorDriver {
    log: SimMotorLog,
}

impl SimMotorDriver {
    /// Create a driver together with a handle onto its write log. The
    /// driver is typically boxed and handed to the Safety Gate; the log
    /// handle stays with the test.
    pub fn new() -> (Self, SimMotorLog) {
        let driver = Self::default();
        let log = driver.log.clone();
        (driver, log)
    }
}

impl MotorDriver for SimMotorDriver {
    fn set_channel(&mut self, channel: ClockId, enabled: bool, duty: u8) -> Result<(), BelfryError> {
        self.log
            .writes
            .lock()
            .expect("sim log lock poisoned")
            .push(MotorWrite {
                channel,
                enabled,
                duty,
            });
        Ok(())
    }
}

/// A simulated STOP button driven by a shared flag.
#[derive(Default)]
pub struct SimStopButton {
    pressed: Arc<AtomicBool>,
}

/// Cloneable handle that presses and releases a [`SimStopButton`].
#[derive(Clone, Default)]
pub struct SimButtonHandle {
    pressed: Arc<AtomicBool>,
}

impl SimButtonHandle {
    pub fn press(&self) {
        self.pressed.store(true, Ordering::Release);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::Release);
    }
}

impl SimStopButton {
    /// Create a button together with the handle that operates it.
    pub fn new() -> (Self, SimButtonHandle) {
        let pressed = Arc::new(AtomicBool::new(false));
        (
            Self {
                pressed: pressed.clone(),
            },
            SimButtonHandle { pressed },
        )
    }
}

impl StopButton for SimStopButton {
    fn is_pressed(&mut self) -> Result<bool, BelfryError> {
        Ok(self.pressed.load(Ordering::Acquire))
    }
}
