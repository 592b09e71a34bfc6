//! `MotorDriver` and `StopButton` traits – the seam between the Safety Gate
//! and whatever electrically drives the clock motors.

use belfry_types::{BelfryError, ClockId};

/// One motor-driver circuit with two independently switched channels.
///
/// Implementations translate an (enabled, duty) pair into the electrical
/// signals for the channel. Writes are expected to be fast and synchronous;
/// the Safety Gate calls them while holding its lock.
pub trait MotorDriver: Send {
    /// Drive `channel` to the given state. `duty` is a 0..=100 percentage;
    /// a channel with `enabled == false` must end up de-energised no matter
    /// what duty is carried.
    ///
    /// # Errors
    ///
    /// Returns [`BelfryError::Hardware`] when the write cannot be applied.
    /// Callers treat this as an operational fault, not a state change: the
    /// gate's in-memory state is the source of truth for status consumers.
    fn set_channel(&mut self, channel: ClockId, enabled: bool, duty: u8) -> Result<(), BelfryError>;
}

/// The physical emergency-stop button.
///
/// Wired active-low with a pull-up: `true` means the operator is pressing
/// the button right now. Latching is not the button's job; the monitor task
/// edge-detects presses and trips the Safety Gate.
pub trait StopButton: Send {
    /// Sample the button.
    ///
    /// # Errors
    ///
    /// Returns [`BelfryError::Hardware`] when the pin cannot be read. The
    /// monitor task backs off and retries; a flaky button never takes the
    /// controller down.
    fn is_pressed(&mut self) -> Result<bool, BelfryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal in-process driver used only for trait-shape tests.
    struct NullDriver;

    impl MotorDriver for NullDriver {
        fn set_channel(&mut self, _: ClockId, _: bool, _: u8) -> Result<(), BelfryError> {
            Ok(())
        }
    }

    #[test]
    fn driver_trait_is_object_safe() {
        let mut boxed: Box<dyn MotorDriver> = Box::new(NullDriver);
        assert!(boxed.set_channel(ClockId::One, true, 100).is_ok());
    }
}
