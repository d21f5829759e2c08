use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use time::{format_description::FormatItem, macros::format_description, Date, OffsetDateTime};

const FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// A calendar date without a time component, written as `YYYY-MM-DD`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FullDate(Date);

#[derive(Debug, thiserror::Error)]
#[error("expected a YYYY-MM-DD date, received '{input}': {source}")]
pub struct Error {
    input: String,
    source: time::error::Parse,
}

impl FullDate {
    pub fn new(date: Date) -> Self {
        Self(date)
    }

    /// The UTC calendar date of an instant.
    pub fn of(instant: OffsetDateTime) -> Self {
        Self(instant.to_offset(time::UtcOffset::UTC).date())
    }

    pub fn date(&self) -> Date {
        self.0
    }
}

impl From<Date> for FullDate {
    fn from(d: Date) -> Self {
        Self(d)
    }
}

impl fmt::Display for FullDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = self.0.format(FORMAT).map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}

impl FromStr for FullDate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Date::parse(s, FORMAT).map(FullDate).map_err(|source| Error {
            input: s.to_string(),
            source,
        })
    }
}

impl Serialize for FullDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FullDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
