//! `belfry-kernel` – the Safety Gate.
//!
//! The central interlock of the controller. It does not decide when alarms
//! ring; it enforces the rules under which motors may run at all.
//!
//! # Modules
//!
//! - [`gate`] – [`ClockController`][gate::ClockController]: the single
//!   interception point between every motor-enable request (scheduler tick,
//!   API adapter, timer callback, STOP button) and the
//!   [`MotorDriver`][belfry_hal::MotorDriver]. Owns both channel states,
//!   the STOP latch, and the per-channel auto-off timer slots inside one
//!   exclusion domain.

pub mod gate;

pub use gate::ClockController;
