//! Date and date+time wrappers stored with a fixed UTC wire format.
//!
//! Models never hold raw `chrono` values; they use [`Date`] or [`DateTime`], both of which are
//! nullable and always serialize with seven literal zero fractional digits.

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

pub const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.0000000Z";

/// Formats a UTC instant with the wire format. Sub-second precision is dropped.
#[must_use]
pub fn format_wire(value: &chrono::DateTime<Utc>) -> String {
    value.format(WIRE_FORMAT).to_string()
}

/// Parses a wire timestamp. Fractional seconds are accepted and discarded.
pub fn parse_wire(s: &str) -> Result<chrono::DateTime<Utc>, String> {
    let trimmed = s.trim();
    let body = trimmed.strip_suffix('Z').unwrap_or(trimmed);
    let seconds = body.split('.').next().unwrap_or(body);
    if let Ok(naive) = NaiveDateTime::parse_from_str(seconds, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Ok(truncate(dt.with_timezone(&Utc)));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default()));
    }
    Err(format!("invalid timestamp {s:?}"))
}

fn truncate(value: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
    value.with_nanosecond(0).unwrap_or(value)
}

/// Formats a duration as a .NET style time span (`d.hh:mm:ss` or `hh:mm:ss`).
#[must_use]
pub fn format_timespan(d: Duration) -> String {
    let total = d.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{days}.{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// A calendar date without time. `Date::default()` is the empty value and serializes as null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(Option<NaiveDate>);

impl Date {
    #[must_use]
    pub fn new(date: NaiveDate) -> Self {
        Self(Some(date))
    }

    #[must_use]
    pub fn ymd(year: i32, month: u32, day: u32) -> Self {
        Self(NaiveDate::from_ymd_opt(year, month, day))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    #[must_use]
    pub fn get(&self) -> Option<NaiveDate> {
        self.0
    }

    #[must_use]
    pub fn to_wire(&self) -> Option<String> {
        self.0.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|n| format_wire(&Utc.from_utc_datetime(&n)))
    }
}

impl From<NaiveDate> for Date {
    fn from(date: NaiveDate) -> Self {
        Self::new(date)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            None => Ok(()),
        }
    }
}

impl Serialize for Date {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_wire() {
            Some(s) => serializer.serialize_str(&s),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Date {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) if !s.is_empty() => {
                let dt = parse_wire(&s).map_err(serde::de::Error::custom)?;
                Ok(Self(Some(dt.date_naive())))
            }
            _ => Ok(Self(None)),
        }
    }
}

/// A UTC instant with second precision. `DateTime::default()` is the empty value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime(Option<chrono::DateTime<Utc>>);

impl DateTime {
    #[must_use]
    pub fn new(value: chrono::DateTime<Utc>) -> Self {
        Self(Some(truncate(value)))
    }

    #[must_use]
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    #[must_use]
    pub fn get(&self) -> Option<chrono::DateTime<Utc>> {
        self.0
    }

    #[must_use]
    pub fn to_wire(&self) -> Option<String> {
        self.0.as_ref().map(format_wire)
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    fn from(value: chrono::DateTime<Utc>) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_wire() {
            Some(s) => f.write_str(&s),
            None => Ok(()),
        }
    }
}

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_wire() {
            Some(s) => serializer.serialize_str(&s),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) if !s.is_empty() => {
                parse_wire(&s).map(|dt| Self(Some(dt))).map_err(serde::de::Error::custom)
            }
            _ => Ok(Self(None)),
        }
    }
}
