//! Alarm persistence.
//!
//! The scheduler only needs two operations from durable storage — reading
//! the enabled alarms and writing back the `last_triggered` marker — so
//! those form the [`AlarmStore`] trait. [`SqliteStore`] implements the
//! trait plus the full CRUD surface the API layer drives.
//!
//! # Storage layout
//!
//! A single table `alarms` is created (if it does not already exist):
//!
//! | column         | type    | description                                  |
//! |----------------|---------|----------------------------------------------|
//! | id             | INTEGER | autoincrement primary key                    |
//! | name           | TEXT    | user-facing label                            |
//! | hour           | INTEGER | 0–23                                         |
//! | minute         | INTEGER | 0–59                                         |
//! | second         | INTEGER | 0–59                                         |
//! | clock_id       | INTEGER | 1 or 2                                       |
//! | enabled        | INTEGER | boolean                                      |
//! | days           | TEXT    | recurrence spec (`daily`, `once`, weekdays)  |
//! | duration       | INTEGER | ring time in seconds, 0 = until stopped      |
//! | created_at     | TEXT    | RFC-3339 creation time (UTC)                 |
//! | last_triggered | TEXT    | RFC-3339 time of the last successful firing  |
//!
//! # Example
//!
//! ```rust
//! use belfry_store::{AlarmDraft, AlarmStore, SqliteStore};
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! let alarm = store.create(AlarmDraft::at("wake", 7, 0, 0)).unwrap();
//! assert_eq!(store.list_enabled().unwrap().len(), 1);
//! assert_eq!(alarm.hour, 7);
//! ```

use std::path::Path;
use std::sync::Mutex;

use belfry_types::{AlarmDefinition, BelfryError, ClockId};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{info, warn};

// Re-exported so the scheduler crate's callers see one coherent surface.
pub use belfry_types::MAX_DURATION_SECS;

/// What the scheduler core requires from durable alarm storage.
pub trait AlarmStore: Send {
    /// All alarms with `enabled == true`, ordered by firing time.
    fn list_enabled(&self) -> Result<Vec<AlarmDefinition>, BelfryError>;

    /// Record that `alarm_id` successfully fired at `at`.
    fn mark_triggered(&self, alarm_id: i64, at: DateTime<Utc>) -> Result<(), BelfryError>;
}

/// Fields of an alarm that the caller supplies; the store assigns `id`,
/// `created_at`, and `last_triggered`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AlarmDraft {
    pub name: String,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub clock_id: ClockId,
    pub enabled: bool,
    pub days: String,
    pub duration: u32,
}

impl AlarmDraft {
    /// A daily alarm on clock 1 with the default 30 s ring, at the given
    /// time. Convenient for tests and seeding.
    pub fn at(name: &str, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            name: name.to_string(),
            hour,
            minute,
            second,
            clock_id: ClockId::One,
            enabled: true,
            days: "daily".to_string(),
            duration: 30,
        }
    }

    fn validate(&self) -> Result<(), BelfryError> {
        // Piggyback on the shared range checks with a placeholder id.
        AlarmDefinition {
            id: 0,
            name: self.name.clone(),
            hour: self.hour,
            minute: self.minute,
            second: self.second,
            clock_id: self.clock_id,
            enabled: self.enabled,
            days: self.days.clone(),
            duration: self.duration,
            created_at: None,
            last_triggered: None,
        }
        .validate()
    }
}

fn db_err(e: rusqlite::Error) -> BelfryError {
    BelfryError::Store(e.to_string())
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// SQLite-backed alarm store.
///
/// The connection sits behind a mutex: the scheduler tick and API-layer
/// CRUD arrive from different tasks, and rusqlite connections are not
/// `Sync`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BelfryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BelfryError::Store(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!(path = %path.display(), "alarm store opened");
        Ok(store)
    }

    /// Open a fresh in-memory database. Used by tests and the simulated
    /// backend; data is lost on drop.
    pub fn open_in_memory() -> Result<Self, BelfryError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), BelfryError> {
        self.conn
            .lock()
            .expect("store lock poisoned")
            .execute(
                "CREATE TABLE IF NOT EXISTS alarms (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT,
                    name           TEXT NOT NULL,
                    hour           INTEGER NOT NULL CHECK(hour BETWEEN 0 AND 23),
                    minute         INTEGER NOT NULL CHECK(minute BETWEEN 0 AND 59),
                    second         INTEGER NOT NULL DEFAULT 0 CHECK(second BETWEEN 0 AND 59),
                    clock_id       INTEGER NOT NULL DEFAULT 1 CHECK(clock_id IN (1, 2)),
                    enabled        INTEGER NOT NULL DEFAULT 1,
                    days           TEXT NOT NULL DEFAULT 'daily',
                    duration       INTEGER NOT NULL DEFAULT 30,
                    created_at     TEXT NOT NULL,
                    last_triggered TEXT
                )",
                [],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn row_to_alarm(row: &Row<'_>) -> rusqlite::Result<AlarmDefinition> {
        let clock_raw: u8 = row.get("clock_id")?;
        // A corrupt clock_id must never be silently remapped to clock 1:
        // that would ring the wrong motor. Surface it as a conversion
        // failure and let the list readers skip the row.
        let clock_id = ClockId::try_from(clock_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Integer,
                Box::new(e),
            )
        })?;
        Ok(AlarmDefinition {
            id: row.get("id")?,
            name: row.get("name")?,
            hour: row.get("hour")?,
            minute: row.get("minute")?,
            second: row.get("second")?,
            clock_id,
            enabled: row.get("enabled")?,
            days: row.get("days")?,
            duration: row.get("duration")?,
            created_at: parse_ts(row.get("created_at").ok()),
            last_triggered: parse_ts(row.get("last_triggered")?),
        })
    }

    /// Insert a new alarm and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// [`BelfryError::InvalidAlarm`] for out-of-range fields,
    /// [`BelfryError::Store`] for database failures.
    pub fn create(&self, draft: AlarmDraft) -> Result<AlarmDefinition, BelfryError> {
        draft.validate()?;
        let created_at = Utc::now();
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT INTO alarms (name, hour, minute, second, clock_id, enabled, days, duration, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                draft.name,
                draft.hour,
                draft.minute,
                draft.second,
                u8::from(draft.clock_id),
                draft.enabled,
                draft.days,
                draft.duration,
                to_rfc3339(created_at),
            ],
        )
        .map_err(db_err)?;
        let id = conn.last_insert_rowid();
        drop(conn);
        info!(
            id,
            name = %draft.name,
            "created alarm at {:02}:{:02}:{:02}",
            draft.hour,
            draft.minute,
            draft.second
        );
        self.get(id)?.ok_or_else(|| {
            BelfryError::Store(format!("alarm {id} vanished after insert"))
        })
    }

    /// Fetch one alarm by id.
    pub fn get(&self, id: i64) -> Result<Option<AlarmDefinition>, BelfryError> {
        self.conn
            .lock()
            .expect("store lock poisoned")
            .query_row("SELECT * FROM alarms WHERE id = ?1", params![id], |row| {
                Self::row_to_alarm(row)
            })
            .optional()
            .map_err(db_err)
    }

    /// All alarms, ordered by firing time.
    pub fn all(&self) -> Result<Vec<AlarmDefinition>, BelfryError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn
            .prepare("SELECT * FROM alarms ORDER BY hour, minute, second")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Self::row_to_alarm(row))
            .map_err(db_err)?;
        Ok(Self::readable_rows(rows))
    }

    /// Collect the rows that decode cleanly; an unreadable row is logged
    /// and dropped rather than poisoning the whole listing.
    fn readable_rows(
        rows: impl Iterator<Item = rusqlite::Result<AlarmDefinition>>,
    ) -> Vec<AlarmDefinition> {
        let mut alarms = Vec::new();
        for row in rows {
            match row {
                Ok(alarm) => alarms.push(alarm),
                Err(e) => warn!(error = %e, "skipping unreadable alarm row"),
            }
        }
        alarms
    }

    /// Overwrite an alarm's user-editable fields. Returns the updated row,
    /// or `None` when the id does not exist. `created_at` and
    /// `last_triggered` are preserved.
    pub fn update(&self, alarm: &AlarmDefinition) -> Result<Option<AlarmDefinition>, BelfryError> {
        alarm.validate()?;
        let changed = self
            .conn
            .lock()
            .expect("store lock poisoned")
            .execute(
                "UPDATE alarms SET name = ?1, hour = ?2, minute = ?3, second = ?4,
                        clock_id = ?5, enabled = ?6, days = ?7, duration = ?8
                 WHERE id = ?9",
                params![
                    alarm.name,
                    alarm.hour,
                    alarm.minute,
                    alarm.second,
                    u8::from(alarm.clock_id),
                    alarm.enabled,
                    alarm.days,
                    alarm.duration,
                    alarm.id,
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Ok(None);
        }
        info!(id = alarm.id, name = %alarm.name, "updated alarm");
        self.get(alarm.id)
    }

    /// Delete an alarm. Returns `true` when a row was removed.
    pub fn delete(&self, id: i64) -> Result<bool, BelfryError> {
        let deleted = self
            .conn
            .lock()
            .expect("store lock poisoned")
            .execute("DELETE FROM alarms WHERE id = ?1", params![id])
            .map_err(db_err)?;
        if deleted > 0 {
            info!(id, "deleted alarm");
        }
        Ok(deleted > 0)
    }

    /// Enable or disable an alarm without touching its other fields.
    pub fn set_enabled(&self, id: i64, enabled: bool) -> Result<Option<AlarmDefinition>, BelfryError> {
        self.conn
            .lock()
            .expect("store lock poisoned")
            .execute(
                "UPDATE alarms SET enabled = ?1 WHERE id = ?2",
                params![enabled, id],
            )
            .map_err(db_err)?;
        self.get(id)
    }

    /// Reset the `last_triggered` marker, re-arming a `once` alarm.
    pub fn clear_last_triggered(&self, id: i64) -> Result<(), BelfryError> {
        self.conn
            .lock()
            .expect("store lock poisoned")
            .execute(
                "UPDATE alarms SET last_triggered = NULL WHERE id = ?1",
                params![id],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

impl AlarmStore for SqliteStore {
    fn list_enabled(&self) -> Result<Vec<AlarmDefinition>, BelfryError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn
            .prepare("SELECT * FROM alarms WHERE enabled = 1 ORDER BY hour, minute, second")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Self::row_to_alarm(row))
            .map_err(db_err)?;
        Ok(Self::readable_rows(rows))
    }

    fn mark_triggered(&self, alarm_id: i64, at: DateTime<Utc>) -> Result<(), BelfryError> {
        self.conn
            .lock()
            .expect("store lock poisoned")
            .execute(
                "UPDATE alarms SET last_triggered = ?1 WHERE id = ?2",
                params![to_rfc3339(at), alarm_id],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

// The daemon shares one store between the scheduler and the API layer, so
// a shared handle must also satisfy the trait.
impl<S> AlarmStore for std::sync::Arc<S>
where
    S: AlarmStore + Send + Sync,
{
    fn list_enabled(&self) -> Result<Vec<AlarmDefinition>, BelfryError> {
        (**self).list_enabled()
    }

    fn mark_triggered(&self, alarm_id: i64, at: DateTime<Utc>) -> Result<(), BelfryError> {
        (**self).mark_triggered(alarm_id, at)
    }
}
