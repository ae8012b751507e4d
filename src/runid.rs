// WCBT: working copy backup tool.
// Copyright 2024, 2025 WCBT developers.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Runs are identified by a UTC timestamp like `2025-01-01T12-00-00Z`,
//! represented by a [RunId] object.
//!
//! The string doubles as the run's directory name under a destination root,
//! so it uses `-` rather than `:` in the time-of-day part.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::errors::Error;

const RUN_ID_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]Z");

/// Identifier for a run within a destination root, eg `2025-01-01T12-00-00Z`.
///
/// Run ids order chronologically, which for the fixed-width format is the
/// same as string order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(String);

impl RunId {
    /// Make the RunId for a backup starting at `time`.
    pub fn from_time(time: OffsetDateTime) -> RunId {
        let utc = time.to_offset(time::UtcOffset::UTC);
        RunId(
            utc.format(RUN_ID_FORMAT)
                .expect("run id format is infallible for valid datetimes"),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Round-trip through the parser so only canonical forms are accepted.
        let parsed = PrimitiveDateTime::parse(s, RUN_ID_FORMAT)
            .map_err(|_| Error::InvalidRunId { value: s.into() })?;
        let canonical = RunId::from_time(parsed.assume_utc());
        if canonical.0 != s {
            return Err(Error::InvalidRunId { value: s.into() });
        }
        Ok(canonical)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl AsRef<std::path::Path> for RunId {
    fn as_ref(&self) -> &std::path::Path {
        self.0.as_ref()
    }
}

impl Serialize for RunId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RunId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| {
            D::Error::invalid_value(serde::de::Unexpected::Str(&s), &"a run id timestamp")
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn from_time_formats_basic_timestamp() {
        let id = RunId::from_time(datetime!(2025-01-01 12:00:00 UTC));
        assert_eq!(id.as_str(), "2025-01-01T12-00-00Z");
        assert_eq!(format!("{id}"), "2025-01-01T12-00-00Z");
    }

    #[test]
    fn non_utc_times_are_normalized() {
        let id = RunId::from_time(datetime!(2025-01-01 13:30:00 +1:30));
        assert_eq!(id.as_str(), "2025-01-01T12-00-00Z");
    }

    #[test]
    fn parse_round_trip() {
        let id: RunId = "2025-01-01T12-00-00Z".parse().unwrap();
        assert_eq!(id, RunId::from_time(datetime!(2025-01-01 12:00:00 UTC)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<RunId>().is_err());
        assert!("b0001".parse::<RunId>().is_err());
        assert!("2025-01-01T12:00:00Z".parse::<RunId>().is_err());
        assert!("2025-01-01T12-00-00".parse::<RunId>().is_err());
        assert!("2025-13-01T12-00-00Z".parse::<RunId>().is_err());
    }

    #[test]
    fn run_ids_order_chronologically() {
        let a: RunId = "2025-01-01T12-00-00Z".parse().unwrap();
        let b: RunId = "2025-01-01T12-00-01Z".parse().unwrap();
        let c: RunId = "2025-02-01T00-00-00Z".parse().unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn serde_round_trip() {
        let id: RunId = "2025-01-01T12-00-00Z".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"2025-01-01T12-00-00Z\"");
        let back: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
