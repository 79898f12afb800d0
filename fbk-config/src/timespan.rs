//! Interval literals such as `1w`, `2d`, `36h` used by `age(max=INTERVAL)`
//! expiry policies and the CLI's `--full[=INTERVAL]` flag.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

/// A duration expressed as a single `<number><unit>` literal. Unlike a
/// general-purpose calendar duration this never needs to add months or
/// years, so it resolves directly to seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeSpan {
    seconds: u64,
}

impl TimeSpan {
    pub fn from_secs(seconds: u64) -> Self {
        Self { seconds }
    }

    pub fn as_secs(&self) -> u64 {
        self.seconds
    }
}

fn unit_seconds(unit: &str) -> Option<u64> {
    Some(match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        "w" => 60 * 60 * 24 * 7,
        "mon" => 60 * 60 * 24 * 30,
        "y" => 60 * 60 * 24 * 365,
        _ => return None,
    })
}

impl FromStr for TimeSpan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit());
        let Some(split) = split else {
            bail!("time span '{s}' is missing a unit suffix (e.g. '1w')");
        };
        let (number, unit) = s.split_at(split);
        if number.is_empty() {
            bail!("time span '{s}' is missing a number");
        }
        let number: u64 = number.parse()?;
        let Some(unit_secs) = unit_seconds(unit) else {
            bail!("time span '{s}' has unknown unit '{unit}' (expected s/m/h/d/w/mon/y)");
        };
        Ok(TimeSpan {
            seconds: number * unit_secs,
        })
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.seconds)
    }
}

impl Serialize for TimeSpan {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeSpan {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_units() {
        assert_eq!("1w".parse::<TimeSpan>().unwrap().as_secs(), 7 * 86400);
        assert_eq!("2d".parse::<TimeSpan>().unwrap().as_secs(), 2 * 86400);
        assert_eq!("36h".parse::<TimeSpan>().unwrap().as_secs(), 36 * 3600);
    }

    #[test]
    fn rejects_missing_unit() {
        assert!("42".parse::<TimeSpan>().is_err());
    }
}
