use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Duty percentage used when an alarm firing enables a motor and the
/// configuration does not override it.
pub const DEFAULT_DUTY: u8 = 100;

/// Upper bound on alarm ring duration, in seconds.
pub const MAX_DURATION_SECS: u32 = 3600;

/// Identifier of one of the two motor channels driven by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ClockId {
    One,
    Two,
}

impl ClockId {
    /// Both channels, in fixed order. Used wherever an operation must touch
    /// every channel (boot init, emergency stop, all-off).
    pub const ALL: [ClockId; 2] = [ClockId::One, ClockId::Two];

    /// Zero-based index for array-backed channel state.
    pub fn index(self) -> usize {
        match self {
            ClockId::One => 0,
            ClockId::Two => 1,
        }
    }
}

impl From<ClockId> for u8 {
    fn from(id: ClockId) -> u8 {
        match id {
            ClockId::One => 1,
            ClockId::Two => 2,
        }
    }
}

impl TryFrom<u8> for ClockId {
    type Error = BelfryError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ClockId::One),
            2 => Ok(ClockId::Two),
            other => Err(BelfryError::InvalidAlarm {
                alarm_id: None,
                reason: format!("clock_id {other} is not 1 or 2"),
            }),
        }
    }
}

impl std::fmt::Display for ClockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "clock{}", u8::from(*self))
    }
}

/// In-memory state of one motor channel. Owned exclusively by the Safety
/// Gate; everything else observes it through a status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockChannel {
    pub id: ClockId,
    pub enabled: bool,
    /// Drive intensity percentage, clamped to 0..=100 on every write.
    pub duty: u8,
}

impl ClockChannel {
    /// Boot-safe initial state: disabled, duty 0.
    pub fn off(id: ClockId) -> Self {
        Self {
            id,
            enabled: false,
            duty: 0,
        }
    }
}

/// Snapshot of the whole controller, served to status consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub clock1: ClockChannel,
    pub clock2: ClockChannel,
    pub latched: bool,
}

/// Day-of-week repetition rule parsed from an alarm's `days` string.
///
/// The persisted form is an opaque string; only `daily`, `once`, and
/// comma-joined subsets of `mon,tue,wed,thu,fri,sat,sun` are recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    /// Fires every day at the configured time.
    Daily,
    /// Fires at most once; consumed by setting `last_triggered`.
    Once,
    /// Fires on an explicit set of weekdays.
    Days(HashSet<Weekday>),
}

impl Recurrence {
    /// `true` when `weekday` is covered by this rule. `Once` behaves like
    /// `Daily` here; its one-shot semantics live in the matcher, which also
    /// consults `last_triggered`.
    pub fn covers(&self, weekday: Weekday) -> bool {
        match self {
            Recurrence::Daily | Recurrence::Once => true,
            Recurrence::Days(days) => days.contains(&weekday),
        }
    }
}

fn weekday_from_token(token: &str) -> Option<Weekday> {
    match token {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

impl FromStr for Recurrence {
    type Err = BelfryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim().to_ascii_lowercase();
        match spec.as_str() {
            "daily" => return Ok(Recurrence::Daily),
            "once" => return Ok(Recurrence::Once),
            "" => {
                return Err(BelfryError::InvalidAlarm {
                    alarm_id: None,
                    reason: "empty recurrence spec".to_string(),
                });
            }
            _ => {}
        }
        let mut days = HashSet::new();
        for token in spec.split(',') {
            let token = token.trim();
            match weekday_from_token(token) {
                Some(day) => {
                    days.insert(day);
                }
                None => {
                    return Err(BelfryError::InvalidAlarm {
                        alarm_id: None,
                        reason: format!("unknown recurrence token '{token}'"),
                    });
                }
            }
        }
        if days.is_empty() {
            return Err(BelfryError::InvalidAlarm {
                alarm_id: None,
                reason: "recurrence spec has no weekdays".to_string(),
            });
        }
        Ok(Recurrence::Days(days))
    }
}

/// A persisted alarm definition. Owned by the alarm store; the scheduler
/// reads snapshots and only ever writes back the `last_triggered` marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmDefinition {
    pub id: i64,
    pub name: String,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub clock_id: ClockId,
    pub enabled: bool,
    /// Opaque recurrence string, interpreted via [`Recurrence`].
    pub days: String,
    /// Ring duration in seconds; 0 means ring until manually stopped.
    pub duration: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub last_triggered: Option<DateTime<Utc>>,
}

impl AlarmDefinition {
    /// Validate the field ranges of a persisted alarm. The store enforces
    /// these with CHECK constraints, but rows written by other tools (or a
    /// hand-edited database) must not be able to crash the scheduler.
    pub fn validate(&self) -> Result<(), BelfryError> {
        let fail = |reason: String| {
            Err(BelfryError::InvalidAlarm {
                alarm_id: Some(self.id),
                reason,
            })
        };
        if self.hour > 23 {
            return fail(format!("hour {} out of 0..=23", self.hour));
        }
        if self.minute > 59 {
            return fail(format!("minute {} out of 0..=59", self.minute));
        }
        if self.second > 59 {
            return fail(format!("second {} out of 0..=59", self.second));
        }
        if self.duration > MAX_DURATION_SECS {
            return fail(format!(
                "duration {}s exceeds {}s",
                self.duration, MAX_DURATION_SECS
            ));
        }
        Ok(())
    }

    /// Parse this alarm's `days` string, attributing errors to the alarm id.
    pub fn recurrence(&self) -> Result<Recurrence, BelfryError> {
        self.days
            .parse::<Recurrence>()
            .map_err(|e| match e {
                BelfryError::InvalidAlarm { reason, .. } => BelfryError::InvalidAlarm {
                    alarm_id: Some(self.id),
                    reason,
                },
                other => other,
            })
    }
}

/// Unified event wrapper published on the internal broadcast bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"belfry-scheduler::tick"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// An alarm matched and its motor was enabled.
    AlarmFired {
        alarm_id: i64,
        name: String,
        clock_id: ClockId,
        duration: u32,
    },
    /// An alarm matched while the STOP latch was engaged.
    AlarmSkipped { alarm_id: i64, reason: String },
    /// An auto-off timer elapsed and disabled its channel.
    AutoOff { clock_id: ClockId },
    /// A motor channel changed state.
    MotorCommand {
        clock_id: ClockId,
        enabled: bool,
        duty: u8,
    },
    /// The STOP latch was tripped (button press or API request).
    StopLatched { source: String },
    /// The STOP latch was cleared.
    StopCleared,
    /// An operational fault that did not halt the controller.
    Fault { component: String, message: String },
}

/// Global error type spanning the safety interlock, alarm configuration,
/// persistence, and hardware faults.
#[derive(Error, Debug)]
pub enum BelfryError {
    /// The STOP latch is engaged; the motor-enable request was vetoed.
    #[error("STOP is latched; clear the latch before enabling motors")]
    Latched,

    /// A persisted alarm carries values the controller cannot act on.
    #[error("invalid alarm {alarm_id:?}: {reason}")]
    InvalidAlarm {
        alarm_id: Option<i64>,
        reason: String,
    },

    #[error("alarm store error: {0}")]
    Store(String),

    #[error("hardware fault on {component}: {details}")]
    Hardware { component: String, details: String },

    #[error("event bus error: {0}")]
    Channel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm(days: &str) -> AlarmDefinition {
        AlarmDefinition {
            id: 7,
            name: "wake".to_string(),
            hour: 7,
            minute: 0,
            second: 0,
            clock_id: ClockId::One,
            enabled: true,
            days: days.to_string(),
            duration: 60,
            created_at: None,
            last_triggered: None,
        }
    }

    #[test]
    fn clock_id_roundtrips_through_u8() {
        assert_eq!(u8::from(ClockId::One), 1);
        assert_eq!(u8::from(ClockId::Two), 2);
        assert_eq!(ClockId::try_from(2).unwrap(), ClockId::Two);
        assert!(ClockId::try_from(3).is_err());
    }

    #[test]
    fn clock_id_serializes_as_number() {
        let json = serde_json::to_string(&ClockId::Two).unwrap();
        assert_eq!(json, "2");
        let back: ClockId = serde_json::from_str("1").unwrap();
        assert_eq!(back, ClockId::One);
    }

    #[test]
    fn recurrence_parses_daily_and_once() {
        assert_eq!("daily".parse::<Recurrence>().unwrap(), Recurrence::Daily);
        assert_eq!("Once".parse::<Recurrence>().unwrap(), Recurrence::Once);
    }

    #[test]
    fn recurrence_parses_weekday_set() {
        let rec = "mon,tue, wed".parse::<Recurrence>().unwrap();
        assert!(rec.covers(Weekday::Mon));
        assert!(rec.covers(Weekday::Wed));
        assert!(!rec.covers(Weekday::Sat));
    }

    #[test]
    fn recurrence_rejects_garbage() {
        assert!("".parse::<Recurrence>().is_err());
        assert!("mon,funday".parse::<Recurrence>().is_err());
        assert!(",".parse::<Recurrence>().is_err());
    }

    #[test]
    fn daily_covers_every_weekday() {
        for day in [Weekday::Mon, Weekday::Sun] {
            assert!(Recurrence::Daily.covers(day));
            assert!(Recurrence::Once.covers(day));
        }
    }

    #[test]
    fn alarm_validate_accepts_in_range_fields() {
        assert!(alarm("daily").validate().is_ok());
    }

    #[test]
    fn alarm_validate_rejects_out_of_range_time() {
        let mut a = alarm("daily");
        a.hour = 24;
        assert!(matches!(
            a.validate(),
            Err(BelfryError::InvalidAlarm {
                alarm_id: Some(7),
                ..
            })
        ));
        let mut b = alarm("daily");
        b.minute = 60;
        assert!(b.validate().is_err());
        let mut c = alarm("daily");
        c.duration = MAX_DURATION_SECS + 1;
        assert!(c.validate().is_err());
    }

    #[test]
    fn alarm_recurrence_errors_carry_alarm_id() {
        let a = alarm("blursday");
        match a.recurrence() {
            Err(BelfryError::InvalidAlarm { alarm_id, .. }) => {
                assert_eq!(alarm_id, Some(7));
            }
            other => panic!("expected InvalidAlarm, got {other:?}"),
        }
    }

    #[test]
    fn alarm_definition_serde_roundtrip() {
        let a = alarm("mon,fri");
        let json = serde_json::to_string(&a).unwrap();
        let back: AlarmDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "belfry-scheduler::tick",
            EventPayload::AlarmFired {
                alarm_id: 3,
                name: "wake".to_string(),
                clock_id: ClockId::One,
                duration: 60,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
    }

    #[test]
    fn belfry_error_display() {
        assert!(BelfryError::Latched.to_string().contains("latched"));
        let err = BelfryError::Hardware {
            component: "clock1".to_string(),
            details: "gpio write failed".to_string(),
        };
        assert!(err.to_string().contains("clock1"));
    }
}
