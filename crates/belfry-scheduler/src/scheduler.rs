//! The 1 Hz alarm-evaluation loop.
//!
//! Each tick the [`Scheduler`] takes a fresh snapshot of enabled alarms from
//! the store, runs the [`matcher`](crate::matcher) against the current
//! wall-clock second, and pushes matches through the Safety Gate:
//!
//! - on a successful enable the alarm's `last_triggered` marker is written
//!   back and, for `duration > 0`, an auto-off timer is armed on the gate;
//! - a rejection while the STOP latch is engaged is a *skip*, not an error:
//!   the alarm is logged, an [`EventPayload::AlarmSkipped`] is published, and
//!   `last_triggered` is deliberately left untouched so a `once` alarm can
//!   still ring after the latch clears.
//!
//! A per-alarm "last fired second" map guards against double-firing when the
//! loop evaluates the same wall-clock second twice. It is held here, in
//! memory, separate from the persisted `last_triggered`.

use std::collections::HashMap;
use std::time::Duration;

use belfry_bus::{EventBus, Topic};
use belfry_kernel::ClockController;
use belfry_store::AlarmStore;
use belfry_types::{AlarmDefinition, BelfryError, Event, EventPayload};
use chrono::{Local, NaiveDateTime, Timelike, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Source tag stamped on every event this loop publishes.
const SOURCE: &str = "belfry-scheduler::tick";

/// The periodic alarm evaluator. Owns the store handle and the per-alarm
/// de-duplication markers; shares the Safety Gate with the API layer and
/// the STOP-button monitor.
pub struct Scheduler {
    store: Box<dyn AlarmStore>,
    gate: ClockController,
    bus: EventBus,
    /// Duty forwarded with every alarm-driven enable.
    default_duty: u8,
    /// Last wall-clock second each alarm fired at, keyed by alarm id.
    last_fired: HashMap<i64, NaiveDateTime>,
}

impl Scheduler {
    pub fn new(
        store: Box<dyn AlarmStore>,
        gate: ClockController,
        bus: EventBus,
        default_duty: u8,
    ) -> Self {
        Self {
            store,
            gate,
            bus,
            default_duty: default_duty.min(100),
            last_fired: HashMap::new(),
        }
    }

    /// Run the tick loop forever at a fixed 1 s cadence.
    ///
    /// Missed ticks under load are skipped rather than burst-replayed; the
    /// de-duplication map makes a replayed second harmless anyway.
    pub async fn run(mut self) {
        info!(default_duty = self.default_duty, "scheduler loop starting");
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.evaluate(Local::now().naive_local());
        }
    }

    /// Evaluate one tick at the given wall-clock instant.
    ///
    /// Separated from [`run`](Self::run) so tests can drive the loop with
    /// constructed timestamps instead of the real clock.
    pub fn evaluate(&mut self, now: NaiveDateTime) {
        // Real clock reads carry nanoseconds; the de-duplication keys must
        // compare at second granularity or two ticks landing in the same
        // wall-clock second would never match.
        let now = now.with_nanosecond(0).unwrap_or(now);
        let alarms = match self.store.list_enabled() {
            Ok(alarms) => alarms,
            Err(e) => {
                error!(error = %e, "failed to read enabled alarms; skipping tick");
                let _ = self.bus.publish_to(
                    Topic::SystemAlerts,
                    Event::new(
                        SOURCE,
                        EventPayload::Fault {
                            component: "alarm-store".to_string(),
                            message: e.to_string(),
                        },
                    ),
                );
                return;
            }
        };

        // Deleted alarms must not pin their markers for the process lifetime.
        self.last_fired
            .retain(|id, _| alarms.iter().any(|a| a.id == *id));

        for alarm in &alarms {
            match crate::matcher::matches(alarm, now) {
                Ok(true) => self.fire(alarm, now),
                Ok(false) => {}
                Err(e) => {
                    // A bad row is skipped, never fatal to the loop.
                    warn!(alarm_id = alarm.id, error = %e, "skipping misconfigured alarm");
                }
            }
        }
    }

    /// An alarm matched: push it through the gate and do the bookkeeping.
    fn fire(&mut self, alarm: &AlarmDefinition, now: NaiveDateTime) {
        if self.last_fired.get(&alarm.id) == Some(&now) {
            // Same wall-clock second re-evaluated; already handled.
            debug!(alarm_id = alarm.id, "duplicate tick for fired second");
            return;
        }

        match self.gate.request_enable(alarm.clock_id, self.default_duty) {
            Ok(()) => {}
            Err(BelfryError::Latched) => {
                // Skipped, not failed. last_triggered stays unset so a
                // `once` alarm can still ring after the latch clears.
                warn!(
                    alarm_id = alarm.id,
                    name = %alarm.name,
                    "alarm skipped: STOP latch engaged"
                );
                let _ = self.bus.publish_to(
                    Topic::Alarms,
                    Event::new(
                        SOURCE,
                        EventPayload::AlarmSkipped {
                            alarm_id: alarm.id,
                            reason: "STOP latch engaged".to_string(),
                        },
                    ),
                );
                return;
            }
            Err(e) => {
                error!(alarm_id = alarm.id, error = %e, "enable request failed");
                return;
            }
        }

        self.last_fired.insert(alarm.id, now);
        info!(
            alarm_id = alarm.id,
            name = %alarm.name,
            clock = %alarm.clock_id,
            duration = alarm.duration,
            "alarm fired"
        );

        if let Err(e) = self.store.mark_triggered(alarm.id, Utc::now()) {
            // The motor is already on; a failed marker write must not undo that.
            error!(alarm_id = alarm.id, error = %e, "failed to persist last_triggered");
        }

        if alarm.duration > 0 {
            self.gate
                .schedule_auto_off(alarm.clock_id, Duration::from_secs(u64::from(alarm.duration)));
        }

        let _ = self.bus.publish_to(
            Topic::Alarms,
            Event::new(
                SOURCE,
                EventPayload::AlarmFired {
                    alarm_id: alarm.id,
                    name: alarm.name.clone(),
                    clock_id: alarm.clock_id,
                    duration: alarm.duration,
                },
            ),
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
