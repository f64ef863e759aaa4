//! Backup timestamps and the wall clock they are taken from.
//!
//! Timestamps use the fixed-width shape `YYYY-MM-DD-HH-MM-SS`. Every field is
//! zero-padded, so comparing two timestamps as strings gives the same answer
//! as comparing them chronologically.

use chrono::{Duration, Local, NaiveDateTime};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use crate::utils::SavepointError;

/// chrono format string for the on-disk timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Length of a formatted timestamp
pub const TIMESTAMP_LEN: usize = 19;

/// Byte offsets of the `-` separators within a timestamp
const SEPARATORS: [usize; 5] = [4, 7, 10, 13, 16];

/// A second-resolution backup timestamp in its on-disk form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    pub fn from_datetime(datetime: &NaiveDateTime) -> Self {
        Timestamp(datetime.format(TIMESTAMP_FORMAT).to_string())
    }

    /// Accept `value` only if it has the exact fixed-width timestamp shape
    pub fn parse(value: &str) -> Option<Self> {
        if value.len() != TIMESTAMP_LEN {
            return None;
        }
        let well_formed = value.bytes().enumerate().all(|(i, b)| {
            if SEPARATORS.contains(&i) {
                b == b'-'
            } else {
                b.is_ascii_digit()
            }
        });
        well_formed.then(|| Timestamp(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable form, `YYYY-MM-DD HH:MM:SS`
    pub fn label(&self) -> String {
        let fields: Vec<&str> = self.0.split('-').collect();
        format!(
            "{}-{}-{} {}:{}:{}",
            fields[0], fields[1], fields[2], fields[3], fields[4], fields[5]
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Timestamp {
    type Err = SavepointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timestamp::parse(s).ok_or_else(|| {
            SavepointError::InvalidSource(format!(
                "'{}' is not a timestamp of the form YYYY-MM-DD-HH-MM-SS",
                s
            ))
        })
    }
}

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn timestamp(&self) -> Timestamp {
        Timestamp::from_datetime(&self.now())
    }
}

/// Local wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `seconds`
    pub fn advance(&self, seconds: i64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += Duration::seconds(seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
