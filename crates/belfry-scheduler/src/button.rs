//! Physical STOP-button monitor.
//!
//! Polls the [`StopButton`] line at a short fixed interval and trips the
//! Safety Gate on a release-to-press edge. Edge detection means holding the
//! button trips the latch exactly once; releasing and pressing again
//! re-asserts the (idempotent) trip.

use std::time::Duration;

use belfry_hal::StopButton;
use belfry_kernel::ClockController;
use tracing::{error, info, warn};

/// Poll cadence; doubles as the debounce window.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to back off after a failed line read before polling again.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Background task watching the emergency-stop line.
pub struct StopButtonMonitor {
    button: Box<dyn StopButton>,
    gate: ClockController,
    poll_interval: Duration,
}

impl StopButtonMonitor {
    pub fn new(button: Box<dyn StopButton>, gate: ClockController) -> Self {
        Self {
            button,
            gate,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Override the poll cadence (mostly useful in tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll the line forever, tripping the gate on each press edge.
    ///
    /// Read failures are logged and retried after a backoff; a flaky line
    /// must never take the monitor down, since the latch can still be
    /// tripped through the API.
    pub async fn run(mut self) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "stop-button monitor starting");
        let mut was_pressed = false;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            match self.button.is_pressed() {
                Ok(pressed) => {
                    if pressed && !was_pressed {
                        warn!("STOP button pressed; tripping latch");
                        self.gate.trigger("button");
                    }
                    was_pressed = pressed;
                }
                Err(e) => {
                    error!(error = %e, "stop-button read failed; backing off");
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
