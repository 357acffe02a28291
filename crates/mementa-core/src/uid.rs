//! Note identity: timestamp-plus-counter UIDs.
//!
//! A UID has the shape `YYYYMMDD'T'HHMMSS<microseconds>'Z'` — UTC date, time,
//! and a six-digit microsecond field. The generator bumps a process-global
//! microsecond cursor so two calls can never produce the same value even when
//! the clock does not advance between them, which also makes generation
//! strictly monotone within a process.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static UID_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{8}T\d{12}Z$").expect("uid regex is valid"));

/// Microsecond cursor shared by all generators in the process.
static LAST_MICROS: AtomicI64 = AtomicI64::new(0);

/// Unique, immutable note identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    /// Parse and validate a UID from its textual form.
    pub fn parse(s: &str) -> Result<Self> {
        if is_valid_uid(s) {
            Ok(Uid(s.to_string()))
        } else {
            Err(Error::Parse(format!("malformed uid: {s:?}")))
        }
    }

    /// The textual form of the UID.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The creation instant encoded in the UID.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let trimmed = self.0.trim_end_matches('Z');
        NaiveDateTime::parse_from_str(trimmed, "%Y%m%dT%H%M%S%6f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Uid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Uid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uid::parse(s)
    }
}

/// Returns true when `s` has the UID shape.
pub fn is_valid_uid(s: &str) -> bool {
    UID_SHAPE.is_match(s)
}

/// Generate a fresh UID, strictly greater than every UID generated before it
/// in this process.
pub fn generate_uid() -> Uid {
    let now = Utc::now().timestamp_micros();
    let micros = loop {
        let last = LAST_MICROS.load(Ordering::SeqCst);
        let candidate = if now > last { now } else { last + 1 };
        if LAST_MICROS
            .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            break candidate;
        }
    };
    let instant = DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_else(Utc::now);
    Uid(instant.format("%Y%m%dT%H%M%S%6fZ").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_uid_shape() {
        let uid = generate_uid();
        assert!(is_valid_uid(uid.as_str()), "bad shape: {}", uid);
        assert_eq!(uid.as_str().len(), 22);
    }

    #[test]
    fn test_generation_is_strictly_monotone() {
        let mut prev = generate_uid();
        for _ in 0..10_000 {
            let next = generate_uid();
            assert!(next > prev, "{} !> {}", next, prev);
            prev = next;
        }
    }

    #[test]
    fn test_no_collisions_across_a_million_calls() {
        let mut seen = std::collections::HashSet::with_capacity(1_000_000);
        for _ in 0..1_000_000 {
            assert!(seen.insert(generate_uid()));
        }
        assert_eq!(seen.len(), 1_000_000);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Uid::parse("not-a-uid").is_err());
        assert!(Uid::parse("20260101T000000Z").is_err()); // missing micros
        assert!(Uid::parse("20260101T000000000000").is_err()); // missing Z
        assert!(Uid::parse("").is_err());
    }

    #[test]
    fn test_parse_accepts_generated() {
        let uid = generate_uid();
        let parsed = Uid::parse(uid.as_str()).unwrap();
        assert_eq!(parsed, uid);
    }

    #[test]
    fn test_timestamp_round_trip() {
        let uid = Uid::parse("20260415T103000123456Z").unwrap();
        let ts = uid.timestamp().unwrap();
        assert_eq!(ts.format("%Y%m%dT%H%M%S%6fZ").to_string(), uid.to_string());
    }

    #[test]
    fn test_serde_transparent() {
        let uid = Uid::parse("20260415T103000123456Z").unwrap();
        let json = serde_json::to_string(&uid).unwrap();
        assert_eq!(json, "\"20260415T103000123456Z\"");
        let back: Uid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uid);
    }
}
