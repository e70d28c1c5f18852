//! Fixed-unit recurrence rules.
//!
//! Calendar units (years, months, weeks, days) are applied to the wall-clock
//! time in the configured zone, so `{days: 1}` keeps the local time of day
//! across DST transitions. Clock units (hours and below) are applied to the
//! absolute instant afterwards.

use chrono::{DateTime, Days, Months, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Interval between two occurrences of a recurring event. Every unit defaults to 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recurrence {
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub milliseconds: u32,
}

impl Recurrence {
    /// `true` when every unit is zero, i.e. the rule would never move `run_at`.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn has_calendar_units(&self) -> bool {
        self.years != 0 || self.months != 0 || self.weeks != 0 || self.days != 0
    }

    /// Next occurrence after `from`, applying units in order: years, months,
    /// weeks, days, hours, minutes, seconds, milliseconds.
    ///
    /// Month arithmetic clamps to the last day of the target month. A local
    /// time that falls into a DST gap is shifted forward by one hour; an
    /// ambiguous local time resolves to the earlier instant.
    ///
    /// Returns `None` on overflow.
    pub fn advance<Z: TimeZone>(&self, from: DateTime<Utc>, zone: &Z) -> Option<DateTime<Utc>> {
        let mut next = from;

        if self.has_calendar_units() {
            let local = from
                .with_timezone(zone)
                .naive_local()
                .checked_add_months(Months::new(self.years.checked_mul(12)?))?
                .checked_add_months(Months::new(self.months))?
                .checked_add_days(Days::new(u64::from(self.weeks) * 7))?
                .checked_add_days(Days::new(u64::from(self.days)))?;
            next = resolve_local(zone, local)?;
        }

        next.checked_add_signed(TimeDelta::hours(i64::from(self.hours)))?
            .checked_add_signed(TimeDelta::minutes(i64::from(self.minutes)))?
            .checked_add_signed(TimeDelta::seconds(i64::from(self.seconds)))?
            .checked_add_signed(TimeDelta::milliseconds(i64::from(self.milliseconds)))
    }
}

fn resolve_local<Z: TimeZone>(zone: &Z, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    let resolved = match zone.from_local_datetime(&local).earliest() {
        Some(dt) => dt,
        None => zone
            .from_local_datetime(&local.checked_add_signed(TimeDelta::hours(1))?)
            .earliest()?,
    };
    Some(resolved.with_timezone(&Utc))
}

/// Recurrence setting of an event: `false` on the wire for one-shot events,
/// the unit object otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Recurring {
    #[default]
    Never,
    Every(Recurrence),
}

impl Recurring {
    pub fn rule(&self) -> Option<&Recurrence> {
        match self {
            Self::Never => None,
            Self::Every(rule) => Some(rule),
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::Every(_))
    }
}

impl From<Recurrence> for Recurring {
    fn from(rule: Recurrence) -> Self {
        Self::Every(rule)
    }
}

impl Serialize for Recurring {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Never => serializer.serialize_bool(false),
            Self::Every(rule) => rule.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecurringRepr {
    Flag(bool),
    Rule(Recurrence),
}

impl<'de> Deserialize<'de> for Recurring {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<RecurringRepr>::deserialize(deserializer)? {
            None | Some(RecurringRepr::Flag(false)) => Ok(Self::Never),
            Some(RecurringRepr::Flag(true)) => Err(serde::de::Error::custom(
                "recurring must be false or an interval object",
            )),
            Some(RecurringRepr::Rule(rule)) => Ok(Self::Every(rule)),
        }
    }
}
