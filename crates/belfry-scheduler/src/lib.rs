//! `belfry-scheduler` – the alarm evaluation loop and its supporting tasks.
//!
//! Three long-running pieces live here:
//!
//! - [`matcher`] – the pure predicate deciding whether an alarm fires at a
//!   given wall-clock second.
//! - [`Scheduler`] – the 1 Hz tick loop that reads enabled alarms from the
//!   store, runs the matcher, and drives the Safety Gate.
//! - [`button`] – the physical STOP-button monitor that trips the latch.
//!
//! [`telemetry`] carries the `tracing` / OpenTelemetry pipeline setup shared
//! by every Belfry binary.

pub mod button;
pub mod matcher;
pub mod scheduler;
pub mod telemetry;

pub use button::StopButtonMonitor;
pub use scheduler::Scheduler;
