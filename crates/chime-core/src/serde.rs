// Module name shadows the `serde` crate; use `::serde` for the external crate.
use ::serde::Serializer;
use chrono::{DateTime, Utc};

/// Serialize `DateTime<Utc>` as integer milliseconds since the Unix epoch.
pub fn to_epoch_ms<S>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_i64(dt.timestamp_millis())
}
