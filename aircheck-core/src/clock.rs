use chrono::{DateTime, FixedOffset, NaiveTime, Utc};

use crate::error::{ConfigError, Result};

/// Wall-clock in the station's fixed-offset time zone, plus the daily
/// capture cutoff. All schedule decisions go through this type so the
/// cutoff comparison itself stays a pure function of a timestamp.
#[derive(Debug, Clone, Copy)]
pub struct StationClock {
    offset: FixedOffset,
    cutoff: NaiveTime,
}

impl StationClock {
    pub fn new(utc_offset_hours: i32, cutoff: &str) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            ConfigError::Invalid {
                field: "station.utc_offset_hours",
                reason: format!("{utc_offset_hours} is out of range"),
            }
        })?;
        let cutoff =
            NaiveTime::parse_from_str(cutoff, "%H:%M").map_err(|err| ConfigError::Invalid {
                field: "station.cutoff",
                reason: format!("{cutoff:?}: {err}"),
            })?;
        Ok(Self { offset, cutoff })
    }

    /// Current time in the station zone.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// True once the local time-of-day has reached the cutoff.
    pub fn is_past_cutoff(&self, at: DateTime<FixedOffset>) -> bool {
        at.time() >= self.cutoff
    }

    /// Date component used in recording base names, e.g. `05-08-26`.
    pub fn date_stamp(&self, at: DateTime<FixedOffset>) -> String {
        at.format("%d-%m-%y").to_string()
    }

    /// Timestamp component used in archive item identifiers,
    /// e.g. `20260805-181505`.
    pub fn item_timestamp(&self, at: DateTime<FixedOffset>) -> String {
        at.format("%Y%m%d-%H%M%S").to_string()
    }
}
