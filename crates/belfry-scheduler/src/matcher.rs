//! Pure alarm-matching predicate.
//!
//! [`matches`] answers one question: should this alarm fire at this
//! wall-clock second? It owns the time comparison and the recurrence
//! semantics but nothing else — no de-duplication (the scheduler keeps a
//! per-alarm "last fired second" guard) and no side effects, so the whole
//! decision table is testable with plain constructed timestamps.

use belfry_types::{AlarmDefinition, BelfryError, Recurrence};
use chrono::{Datelike, NaiveDateTime, Timelike};

/// Whether `alarm` fires at the wall-clock instant `now`.
///
/// Matching is second-granular: the tick loop runs at 1 Hz, so an alarm's
/// configured `hour:minute:second` is compared against `now` exactly.
///
/// # Errors
///
/// Returns [`BelfryError::InvalidAlarm`] when the alarm carries out-of-range
/// fields or an unparseable recurrence spec. The caller logs and skips the
/// alarm for the tick; a bad row must never halt evaluation of the others.
pub fn matches(alarm: &AlarmDefinition, now: NaiveDateTime) -> Result<bool, BelfryError> {
    if !alarm.enabled {
        return Ok(false);
    }
    alarm.validate()?;
    let recurrence = alarm.recurrence()?;

    let time_match = now.hour() == u32::from(alarm.hour)
        && now.minute() == u32::from(alarm.minute)
        && now.second() == u32::from(alarm.second);
    if !time_match {
        return Ok(false);
    }

    Ok(match recurrence {
        // A once-alarm is consumed by a successful firing; the persisted
        // marker is what un-matches it from then on.
        Recurrence::Once => alarm.last_triggered.is_none(),
        rule => rule.covers(now.weekday()),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use belfry_types::ClockId;
    use chrono::{NaiveDate, Utc};

    fn alarm(days: &str) -> AlarmDefinition {
        AlarmDefinition {
            id: 1,
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

    /// 2026-08-24 is a Monday.
    fn monday_at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 24)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    #[test]
    fn daily_alarm_matches_at_its_second() {
        assert!(matches(&alarm("daily"), monday_at(7, 0, 0)).unwrap());
    }

    #[test]
    fn daily_alarm_rejects_one_second_off() {
        assert!(!matches(&alarm("daily"), monday_at(7, 0, 1)).unwrap());
        assert!(!matches(&alarm("daily"), monday_at(6, 59, 59)).unwrap());
    }

    #[test]
    fn disabled_alarm_never_matches() {
        let mut a = alarm("daily");
        a.enabled = false;
        assert!(!matches(&a, monday_at(7, 0, 0)).unwrap());
    }

    #[test]
    fn weekday_set_matches_member_day() {
        assert!(matches(&alarm("mon,wed,fri"), monday_at(7, 0, 0)).unwrap());
    }

    #[test]
    fn weekday_set_rejects_non_member_day() {
        // Tuesday the 25th.
        let tuesday = NaiveDate::from_ymd_opt(2026, 8, 25)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap();
        assert!(!matches(&alarm("mon,wed,fri"), tuesday).unwrap());
    }

    #[test]
    fn once_alarm_matches_only_until_triggered() {
        let mut a = alarm("once");
        assert!(matches(&a, monday_at(7, 0, 0)).unwrap());
        a.last_triggered = Some(Utc::now());
        assert!(!matches(&a, monday_at(7, 0, 0)).unwrap());
    }

    #[test]
    fn malformed_recurrence_is_a_config_error() {
        let err = matches(&alarm("every-other-day"), monday_at(7, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            BelfryError::InvalidAlarm {
                alarm_id: Some(1),
                ..
            }
        ));
    }

    #[test]
    fn out_of_range_hour_is_a_config_error() {
        let mut a = alarm("daily");
        a.hour = 99;
        assert!(matches(&a, monday_at(7, 0, 0)).is_err());
    }
}
