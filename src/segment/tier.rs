//! Size tiers.
//!
//! A segment's tier is never stored; it is a pure function of how many
//! entries the segment holds.
//!
//! | tier        | name | capacity |
//! |-------------|------|----------|
//! | Small       | `sm` | 100      |
//! | Medium      | `md` | 400      |
//! | Large       | `lg` | 1600     |
//! | ExtraLarge  | `xl` | 6400     |
//!
//! There is nothing above `ExtraLarge`: [`SizeTier::for_count`] returns
//! `None` for more than [`SizeTier::MAX_CAPACITY`] entries, and segments
//! refuse to grow past it.

use std::fmt;
use std::str::FromStr;

/// One of the four fixed-capacity classes of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeTier {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl SizeTier {
    /// Every tier, smallest first.
    pub const ALL: [SizeTier; 4] = [
        SizeTier::Small,
        SizeTier::Medium,
        SizeTier::Large,
        SizeTier::ExtraLarge,
    ];

    /// Capacity of the largest tier.
    pub const MAX_CAPACITY: usize = SizeTier::ExtraLarge.capacity();

    /// Maximum number of entries a segment in this tier may hold.
    pub const fn capacity(self) -> usize {
        match self {
            SizeTier::Small => 100,
            SizeTier::Medium => 400,
            SizeTier::Large => 1600,
            SizeTier::ExtraLarge => 6400,
        }
    }

    /// The smallest tier whose capacity is at least `count`, or `None` if
    /// `count` exceeds [`SizeTier::MAX_CAPACITY`].
    pub fn for_count(count: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| count <= tier.capacity())
    }

    /// The next larger tier.
    pub fn next(self) -> Option<Self> {
        match self {
            SizeTier::Small => Some(SizeTier::Medium),
            SizeTier::Medium => Some(SizeTier::Large),
            SizeTier::Large => Some(SizeTier::ExtraLarge),
            SizeTier::ExtraLarge => None,
        }
    }

    /// Short name: `sm`, `md`, `lg` or `xl`.
    pub const fn name(self) -> &'static str {
        match self {
            SizeTier::Small => "sm",
            SizeTier::Medium => "md",
            SizeTier::Large => "lg",
            SizeTier::ExtraLarge => "xl",
        }
    }
}

impl fmt::Display for SizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown tier name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown size tier {0:?} (expected sm, md, lg or xl)")]
pub struct ParseTierError(pub String);

impl FromStr for SizeTier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.name() == s)
            .ok_or_else(|| ParseTierError(s.to_string()))
    }
}
