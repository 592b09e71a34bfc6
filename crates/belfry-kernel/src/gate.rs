//! [`ClockController`] – the STOP-latch Safety Gate.
//!
//! Every mutation of motor state goes through this type: the scheduler
//! loop's alarm firings, the API adapter's manual commands, the STOP-button
//! monitor, and the auto-off timer callbacks all serialize through one
//! mutex. A latch trip is therefore observed atomically by any in-flight
//! enable request; no enable can win a race against a concurrently
//! arriving trigger.
//!
//! # Latch semantics
//!
//! Once [`trigger`][ClockController::trigger] runs, every enable request is
//! vetoed with [`BelfryError::Latched`] until
//! [`clear`][ClockController::clear] is called. Clearing never re-enables
//! anything; channels stay off until a fresh enable arrives.
//!
//! # Auto-off timers
//!
//! Each channel owns at most one generation-counted timer slot. Disabling
//! a channel, tripping the latch, or enabling it for a new reason bumps
//! the generation and aborts the outstanding timer task, so a stale
//! auto-off can never turn off a channel that a later alarm re-enabled or
//! that was already stopped for a different reason.
//!
//! # Example
//!
//! ```rust
//! use belfry_bus::EventBus;
//! use belfry_hal::SimMotorDriver;
//! use belfry_kernel::ClockController;
//! use belfry_types::ClockId;
//!
//! let (driver, _log) = SimMotorDriver::new();
//! let gate = ClockController::new(Box::new(driver), EventBus::default());
//!
//! gate.request_enable(ClockId::One, 100).unwrap();
//! gate.trigger("doctest");
//! assert!(gate.request_enable(ClockId::One, 100).is_err());
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use belfry_bus::{EventBus, Topic};
use belfry_hal::MotorDriver;
use belfry_types::{BelfryError, ClockChannel, ClockId, ControllerStatus, Event, EventPayload};
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

const SOURCE: &str = "belfry-kernel::gate";

// ────────────────────────────────────────────────────────────────────────────
// Internal state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct TimerSlot {
    /// Bumped whenever the slot's owner changes; a timer task only fires
    /// if its captured generation still matches.
    generation: u64,
    handle: Option<AbortHandle>,
}

impl TimerSlot {
    /// Invalidate whatever timer currently owns this slot.
    fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

struct GateState {
    channels: [ClockChannel; 2],
    latched: bool,
    driver: Box<dyn MotorDriver>,
    timers: [TimerSlot; 2],
}

impl GateState {
    /// Push a channel's in-memory state to the hardware. A write failure is
    /// an operational fault, not a state rollback: status consumers keep
    /// seeing the requested value.
    fn write_channel(&mut self, channel: ClockId, bus: &EventBus) {
        let ch = self.channels[channel.index()];
        if let Err(e) = self.driver.set_channel(channel, ch.enabled, ch.duty) {
            error!(%channel, error = %e, "motor driver write failed");
            let _ = bus.publish_to(
                Topic::SystemAlerts,
                Event::new(
                    SOURCE,
                    EventPayload::Fault {
                        component: channel.to_string(),
                        message: e.to_string(),
                    },
                ),
            );
        } else {
            let _ = bus.publish_to(
                Topic::Motors,
                Event::new(
                    SOURCE,
                    EventPayload::MotorCommand {
                        clock_id: channel,
                        enabled: ch.enabled,
                        duty: ch.duty,
                    },
                ),
            );
        }
    }

    fn force_off(&mut self, channel: ClockId, bus: &EventBus) {
        self.timers[channel.index()].cancel();
        self.channels[channel.index()].enabled = false;
        self.write_channel(channel, bus);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ClockController
// ────────────────────────────────────────────────────────────────────────────

/// Shared handle onto the Safety Gate. Clone it freely; all clones share
/// the same exclusion domain.
#[derive(Clone)]
pub struct ClockController {
    inner: Arc<Mutex<GateState>>,
    bus: EventBus,
}

impl ClockController {
    /// Construct the gate around a motor driver.
    ///
    /// Boot-safe by construction: both channels are initialised to
    /// disabled/duty-0 and the corresponding driver writes are issued
    /// before the returned handle can accept any request. No previously
    /// persisted "enabled" state is trusted across a restart.
    pub fn new(driver: Box<dyn MotorDriver>, bus: EventBus) -> Self {
        let mut state = GateState {
            channels: [ClockChannel::off(ClockId::One), ClockChannel::off(ClockId::Two)],
            latched: false,
            driver,
            timers: [TimerSlot::default(), TimerSlot::default()],
        };
        for channel in ClockId::ALL {
            state.write_channel(channel, &bus);
        }
        info!("safety gate initialised, both motors off");
        Self {
            inner: Arc::new(Mutex::new(state)),
            bus,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.inner.lock().expect("safety gate lock poisoned")
    }

    /// Enable a motor channel at the given duty.
    ///
    /// Clamps `duty` to 0..=100, supersedes any outstanding auto-off timer
    /// for the channel, and issues the actuator write.
    ///
    /// # Errors
    ///
    /// [`BelfryError::Latched`] when the STOP latch is engaged; the request
    /// has no effect.
    pub fn request_enable(&self, channel: ClockId, duty: u8) -> Result<(), BelfryError> {
        let mut state = self.lock();
        if state.latched {
            warn!(%channel, "enable blocked: STOP is latched");
            return Err(BelfryError::Latched);
        }
        // A new owner takes the channel: the previous firing's timer must
        // not be allowed to turn it off later.
        state.timers[channel.index()].cancel();
        let ch = &mut state.channels[channel.index()];
        ch.enabled = true;
        ch.duty = duty.min(100);
        state.write_channel(channel, &self.bus);
        info!(%channel, duty = state.channels[channel.index()].duty, "channel enabled");
        Ok(())
    }

    /// Disable a motor channel. Always succeeds and is idempotent; also
    /// cancels the channel's auto-off timer.
    pub fn request_disable(&self, channel: ClockId) {
        let mut state = self.lock();
        state.force_off(channel, &self.bus);
        info!(%channel, "channel disabled");
    }

    /// Adjust a channel's duty without changing its enabled state.
    ///
    /// Clamps to 0..=100. Duty writes on an idle channel are harmless and
    /// always applied.
    ///
    /// # Errors
    ///
    /// [`BelfryError::Latched`] when the latch is engaged and `duty > 0`:
    /// raising drive intensity is treated the same as an enable attempt.
    pub fn request_duty(&self, channel: ClockId, duty: u8) -> Result<(), BelfryError> {
        let mut state = self.lock();
        if state.latched && duty > 0 {
            warn!(%channel, duty, "duty change blocked: STOP is latched");
            return Err(BelfryError::Latched);
        }
        let ch = &mut state.channels[channel.index()];
        ch.duty = duty.min(100);
        let enabled = ch.enabled;
        if enabled {
            state.write_channel(channel, &self.bus);
        }
        Ok(())
    }

    /// Trip the emergency-stop latch: force-disable both channels, cancel
    /// every auto-off timer, and veto all future enables until
    /// [`clear`][Self::clear].
    ///
    /// Idempotent: re-triggering an already-latched gate only re-asserts
    /// the disables.
    pub fn trigger(&self, source: &str) {
        let mut state = self.lock();
        let already = state.latched;
        state.latched = true;
        for channel in ClockId::ALL {
            state.force_off(channel, &self.bus);
        }
        drop(state);
        if !already {
            warn!(source, "STOP triggered: all motors off, latch engaged");
            let _ = self.bus.publish_to(
                Topic::SystemAlerts,
                Event::new(
                    SOURCE,
                    EventPayload::StopLatched {
                        source: source.to_string(),
                    },
                ),
            );
        }
    }

    /// Clear the STOP latch. Channels remain off until explicitly
    /// re-enabled.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.latched = false;
        drop(state);
        info!("STOP latch cleared");
        let _ = self
            .bus
            .publish_to(Topic::SystemAlerts, Event::new(SOURCE, EventPayload::StopCleared));
    }

    /// Non-emergency "stop everything": force-disable both channels without
    /// touching the latch.
    pub fn all_off(&self) {
        let mut state = self.lock();
        for channel in ClockId::ALL {
            state.force_off(channel, &self.bus);
        }
        info!("all channels off");
    }

    /// Snapshot of both channels and the latch.
    pub fn status(&self) -> ControllerStatus {
        let state = self.lock();
        ControllerStatus {
            clock1: state.channels[0],
            clock2: state.channels[1],
            latched: state.latched,
        }
    }

    /// `true` while the STOP latch is engaged.
    pub fn is_latched(&self) -> bool {
        self.lock().latched
    }

    /// Arm the channel's auto-off timer: after `duration` the channel is
    /// disabled, unless something else (a manual stop, a latch trip, or a
    /// later alarm's enable) claimed the channel first.
    ///
    /// Must be called from within a tokio runtime; the timer task re-enters
    /// the gate's exclusion domain when it elapses and verifies that its
    /// generation still owns the slot before acting.
    pub fn schedule_auto_off(&self, channel: ClockId, duration: Duration) {
        let generation = {
            let mut state = self.lock();
            let slot = &mut state.timers[channel.index()];
            slot.cancel();
            slot.generation
        };
        let gate = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            gate.auto_off_elapsed(channel, generation);
        })
        .abort_handle();
        // Re-check ownership: another actor may have claimed the slot
        // between dropping the lock and spawning.
        let mut state = self.lock();
        let slot = &mut state.timers[channel.index()];
        if slot.generation == generation {
            slot.handle = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Timer callback: disable the channel if the timer still owns it.
    fn auto_off_elapsed(&self, channel: ClockId, generation: u64) {
        let mut state = self.lock();
        if state.timers[channel.index()].generation != generation {
            // Superseded while we slept; the channel has a new owner.
            return;
        }
        state.timers[channel.index()].handle = None;
        state.channels[channel.index()].enabled = false;
        state.write_channel(channel, &self.bus);
        drop(state);
        info!(%channel, "auto-off elapsed, channel disabled");
        let _ = self.bus.publish_to(
            Topic::Alarms,
            Event::new(SOURCE, EventPayload::AutoOff { clock_id: channel }),
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use belfry_hal::{SimMotorDriver, SimMotorLog};

    fn gate() -> (ClockController, SimMotorLog) {
        let (driver, log) = SimMotorDriver::new();
        let gate = ClockController::new(Box::new(driver), EventBus::default());
        (gate, log)
    }

    async fn settle() {
        // Let spawned timer tasks run on the current-thread test runtime.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn boot_forces_both_channels_off() {
        let (gate, log) = gate();
        let writes = log.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| !w.enabled && w.duty == 0));
        let status = gate.status();
        assert!(!status.clock1.enabled);
        assert!(!status.clock2.enabled);
        assert!(!status.latched);
    }

    #[test]
    fn enable_sets_state_and_writes_driver() {
        let (gate, log) = gate();
        gate.request_enable(ClockId::One, 80).unwrap();

        let status = gate.status();
        assert!(status.clock1.enabled);
        assert_eq!(status.clock1.duty, 80);
        assert!(!status.clock2.enabled);

        let last = log.last_for(ClockId::One).unwrap();
        assert!(last.enabled);
        assert_eq!(last.duty, 80);
    }

    #[test]
    fn enable_clamps_duty() {
        let (gate, _log) = gate();
        gate.request_enable(ClockId::One, 255).unwrap();
        assert_eq!(gate.status().clock1.duty, 100);
    }

    #[test]
    fn enable_rejected_while_latched() {
        let (gate, log) = gate();
        gate.trigger("test");
        log.clear();

        assert!(matches!(
            gate.request_enable(ClockId::One, 100),
            Err(BelfryError::Latched)
        ));
        // No actuator write happened for the rejected request.
        assert!(log.writes().is_empty());
        assert!(!gate.status().clock1.enabled);
    }

    #[test]
    fn disable_is_idempotent() {
        let (gate, _log) = gate();
        gate.request_enable(ClockId::Two, 100).unwrap();
        gate.request_disable(ClockId::Two);
        gate.request_disable(ClockId::Two);
        assert!(!gate.status().clock2.enabled);
    }

    #[test]
    fn duty_clamped_under_arbitrary_inputs() {
        let (gate, _log) = gate();
        for duty in [0u8, 1, 50, 100, 101, 200, 255] {
            gate.request_duty(ClockId::One, duty).unwrap();
            assert!(gate.status().clock1.duty <= 100);
        }
    }

    #[test]
    fn duty_raise_rejected_while_latched_but_zero_allowed() {
        let (gate, _log) = gate();
        gate.trigger("test");
        assert!(matches!(
            gate.request_duty(ClockId::One, 50),
            Err(BelfryError::Latched)
        ));
        // Dropping duty to zero is harmless even under the latch.
        assert!(gate.request_duty(ClockId::One, 0).is_ok());
    }

    #[test]
    fn duty_change_does_not_flip_enabled() {
        let (gate, _log) = gate();
        gate.request_duty(ClockId::One, 60).unwrap();
        assert!(!gate.status().clock1.enabled);
        assert_eq!(gate.status().clock1.duty, 60);

        gate.request_enable(ClockId::One, 60).unwrap();
        gate.request_duty(ClockId::One, 0).unwrap();
        // Still logically enabled; only the drive intensity changed.
        assert!(gate.status().clock1.enabled);
    }

    #[test]
    fn trigger_forces_both_channels_off() {
        let (gate, _log) = gate();
        gate.request_enable(ClockId::One, 100).unwrap();
        gate.request_enable(ClockId::Two, 100).unwrap();
        gate.trigger("test");

        let status = gate.status();
        assert!(status.latched);
        assert!(!status.clock1.enabled);
        assert!(!status.clock2.enabled);
    }

    #[test]
    fn trigger_is_idempotent() {
        let (gate, _log) = gate();
        gate.request_enable(ClockId::One, 100).unwrap();
        gate.trigger("first");
        let after_first = gate.status();
        gate.trigger("second");
        assert_eq!(gate.status(), after_first);
    }

    #[test]
    fn latched_implies_both_disabled_across_operations() {
        let (gate, _log) = gate();
        gate.request_enable(ClockId::One, 100).unwrap();
        gate.trigger("test");
        let _ = gate.request_enable(ClockId::Two, 100);
        let _ = gate.request_duty(ClockId::One, 100);
        gate.request_disable(ClockId::One);

        let status = gate.status();
        assert!(status.latched);
        assert!(!status.clock1.enabled && !status.clock2.enabled);
    }

    #[test]
    fn clear_does_not_re_enable() {
        let (gate, _log) = gate();
        gate.request_enable(ClockId::One, 100).unwrap();
        gate.trigger("test");
        gate.clear();

        let status = gate.status();
        assert!(!status.latched);
        assert!(!status.clock1.enabled);
        // A fresh enable now succeeds.
        assert!(gate.request_enable(ClockId::One, 100).is_ok());
    }

    #[test]
    fn all_off_leaves_latch_untouched() {
        let (gate, _log) = gate();
        gate.request_enable(ClockId::One, 100).unwrap();
        gate.request_enable(ClockId::Two, 100).unwrap();
        gate.all_off();

        let status = gate.status();
        assert!(!status.latched);
        assert!(!status.clock1.enabled && !status.clock2.enabled);
        // Scenario D: a subsequent enable succeeds immediately.
        assert!(gate.request_enable(ClockId::One, 100).is_ok());
        assert!(gate.status().clock1.enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_off_disables_after_duration() {
        let (gate, _log) = gate();
        gate.request_enable(ClockId::One, 100).unwrap();
        gate.schedule_auto_off(ClockId::One, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;

        assert!(!gate.status().clock1.enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn later_enable_supersedes_pending_auto_off() {
        let (gate, _log) = gate();
        // First firing: 30 s auto-off.
        gate.request_enable(ClockId::Two, 100).unwrap();
        gate.schedule_auto_off(ClockId::Two, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(10)).await;

        // Second firing: indefinite duration, no new timer.
        gate.request_enable(ClockId::Two, 100).unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;

        // The first firing's timer must not have turned the channel off.
        assert!(gate.status().clock2.enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_disable_cancels_timer() {
        let (gate, log) = gate();
        gate.request_enable(ClockId::One, 100).unwrap();
        gate.schedule_auto_off(ClockId::One, Duration::from_secs(30));

        gate.request_disable(ClockId::One);
        gate.request_enable(ClockId::One, 100).unwrap();
        log.clear();

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;

        // The stale timer may not fire against the re-enabled channel.
        assert!(gate.status().clock1.enabled);
        assert!(log.writes().iter().all(|w| w.enabled || w.channel != ClockId::One));
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_cancels_all_timers() {
        let (gate, log) = gate();
        gate.request_enable(ClockId::One, 100).unwrap();
        gate.schedule_auto_off(ClockId::One, Duration::from_secs(30));
        gate.request_enable(ClockId::Two, 100).unwrap();
        gate.schedule_auto_off(ClockId::Two, Duration::from_secs(30));

        gate.trigger("test");
        gate.clear();
        gate.request_enable(ClockId::One, 100).unwrap();
        log.clear();

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;

        // Neither pre-trigger timer survived into the new ownership.
        assert!(gate.status().clock1.enabled);
        assert!(log.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_previous_timer() {
        let (gate, _log) = gate();
        gate.request_enable(ClockId::One, 100).unwrap();
        gate.schedule_auto_off(ClockId::One, Duration::from_secs(10));
        gate.schedule_auto_off(ClockId::One, Duration::from_secs(100));

        tokio::time::sleep(Duration::from_secs(50)).await;
        settle().await;
        // The 10 s timer was replaced; channel still on at t=50.
        assert!(gate.status().clock1.enabled);

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert!(!gate.status().clock1.enabled);
    }

    #[test]
    fn gate_publishes_latch_events() {
        let (driver, _log) = SimMotorDriver::new();
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::SystemAlerts);
        let gate = ClockController::new(Box::new(driver), bus);

        gate.trigger("button");
        let event = rx.try_recv().expect("latch event");
        assert!(matches!(
            event.payload,
            EventPayload::StopLatched { ref source } if source == "button"
        ));

        gate.clear();
        let event = rx.try_recv().expect("clear event");
        assert!(matches!(event.payload, EventPayload::StopCleared));
    }
}
