//! Small helpers for mapping TEXT columns back into typed values.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub(crate) fn uuid_field(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn ts_field(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn opt_uuid_field(idx: usize, s: Option<String>) -> rusqlite::Result<Option<Uuid>> {
    s.map(|v| uuid_field(idx, &v)).transpose()
}

pub(crate) fn opt_ts_field(
    idx: usize,
    s: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|v| ts_field(idx, &v)).transpose()
}
