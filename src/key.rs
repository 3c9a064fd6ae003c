//! Segment identifiers.
//!
//! A segment never builds identifiers itself. It only needs three things
//! from them: a total order, a canonical string form whose **lexicographic
//! order equals that total order**, and a strict parser back from the
//! string. [`SegmentKey`] captures exactly that contract.
//!
//! Two implementations ship with the crate:
//!
//! - [`Timestamp`]: UTC instants at second precision, encoded as
//!   `YYYY-MM-DDTHH:MM:SSZ`. Years are limited to `0000..=9999` so the
//!   string stays fixed-width.
//! - `u64`: encoded as 20 zero-padded decimal digits.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use thiserror::Error;

/// Errors produced when building or parsing an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The string is not the canonical encoding of any identifier.
    #[error("invalid identifier {input:?}: {reason}")]
    Invalid { input: String, reason: &'static str },

    /// The value cannot be given a fixed-width encoding.
    #[error("identifier out of range: {0}")]
    OutOfRange(String),
}

/// An identifier usable as a segment key.
///
/// # Contract
///
/// For all `a`, `b`: `a.cmp(&b) == a.to_key().cmp(&b.to_key())`, and
/// `K::parse_key(&a.to_key()) == Ok(a)`. `parse_key` must reject any string
/// that is not exactly the canonical form of some value; it must never
/// coerce.
pub trait SegmentKey: Ord + Clone + fmt::Debug {
    /// The canonical string encoding.
    fn to_key(&self) -> String;

    /// Parses a canonical string encoding.
    fn parse_key(s: &str) -> Result<Self, KeyError>;
}

// ------------------------------------------------------------------------------------------------
// Timestamp
// ------------------------------------------------------------------------------------------------

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const TIMESTAMP_LEN: usize = 20;

/// A UTC instant with second precision.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current time, truncated to the second.
    pub fn now() -> Self {
        // `now()` is always in 0000..=9999 in practice; fall back to the
        // epoch rather than panic if the clock is wildly wrong.
        Self::from_datetime(Utc::now()).unwrap_or(Self(DateTime::<Utc>::default()))
    }

    /// Builds a timestamp from seconds since the Unix epoch.
    pub fn from_unix_secs(secs: i64) -> Result<Self, KeyError> {
        let dt = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| KeyError::OutOfRange(format!("{secs} seconds since epoch")))?;
        Self::from_datetime(dt)
    }

    /// Builds a timestamp from a `chrono` instant, dropping sub-second
    /// precision.
    pub fn from_datetime(dt: DateTime<Utc>) -> Result<Self, KeyError> {
        if !(0..=9999).contains(&dt.year()) {
            return Err(KeyError::OutOfRange(format!("year {}", dt.year())));
        }
        let secs = dt.timestamp();
        let truncated = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| KeyError::OutOfRange(format!("{secs} seconds since epoch")))?;
        Ok(Self(truncated))
    }

    /// Seconds since the Unix epoch.
    pub fn unix_secs(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl SegmentKey for Timestamp {
    fn to_key(&self) -> String {
        self.0.format(TIMESTAMP_FORMAT).to_string()
    }

    fn parse_key(s: &str) -> Result<Self, KeyError> {
        let invalid = |reason| KeyError::Invalid {
            input: s.to_string(),
            reason,
        };

        if s.len() != TIMESTAMP_LEN {
            return Err(invalid("expected YYYY-MM-DDTHH:MM:SSZ"));
        }
        let naive = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map_err(|_| invalid("not a valid UTC timestamp"))?;
        let ts = Self::from_datetime(naive.and_utc())?;

        // chrono's parser is lenient about field widths and signs.
        if ts.to_key() != s {
            return Err(invalid("not in canonical form"));
        }
        Ok(ts)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({self})")
    }
}

impl FromStr for Timestamp {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_key(s)
    }
}

// ------------------------------------------------------------------------------------------------
// u64
// ------------------------------------------------------------------------------------------------

/// Digits in `u64::MAX`.
const U64_KEY_WIDTH: usize = 20;

impl SegmentKey for u64 {
    fn to_key(&self) -> String {
        format!("{self:0width$}", width = U64_KEY_WIDTH)
    }

    fn parse_key(s: &str) -> Result<Self, KeyError> {
        if s.len() != U64_KEY_WIDTH || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(KeyError::Invalid {
                input: s.to_string(),
                reason: "expected 20 decimal digits",
            });
        }
        s.parse().map_err(|_| KeyError::OutOfRange(s.to_string()))
    }
}
