//! Shared primitive types used across the engine.

use crate::error::VolumeError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Store-assigned record identifier.
pub type RecordId = i64;

/// A reporting year.
pub type Year = i32;

/// Physical weight range of the raw material, plus the reserved
/// `total_volume` pseudo-bucket that holds the per-period sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SizeBucket {
    #[serde(rename = "100g-below")]
    Below100g,
    #[serde(rename = "100g-260g")]
    From100To260g,
    #[serde(rename = "260g-350g")]
    From260To350g,
    #[serde(rename = "350g-450g")]
    From350To450g,
    #[serde(rename = "450g-600g")]
    From450To600g,
    #[serde(rename = "600g-720g")]
    From600To720g,
    #[serde(rename = "720g-up")]
    Above720g,
    #[serde(rename = "total_volume")]
    TotalVolume,
}

impl SizeBucket {
    /// Every real bucket, in dashboard tab order. Excludes `TotalVolume`.
    pub const REAL: [SizeBucket; 7] = [
        SizeBucket::Below100g,
        SizeBucket::From100To260g,
        SizeBucket::From260To350g,
        SizeBucket::From350To450g,
        SizeBucket::From450To600g,
        SizeBucket::From600To720g,
        SizeBucket::Above720g,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeBucket::Below100g     => "100g-below",
            SizeBucket::From100To260g => "100g-260g",
            SizeBucket::From260To350g => "260g-350g",
            SizeBucket::From350To450g => "350g-450g",
            SizeBucket::From450To600g => "450g-600g",
            SizeBucket::From600To720g => "600g-720g",
            SizeBucket::Above720g     => "720g-up",
            SizeBucket::TotalVolume   => "total_volume",
        }
    }

    pub fn is_total(&self) -> bool {
        matches!(self, SizeBucket::TotalVolume)
    }
}

impl fmt::Display for SizeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeBucket {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SizeBucket::REAL
            .iter()
            .chain(std::iter::once(&SizeBucket::TotalVolume))
            .find(|b| b.as_str() == wanted)
            .copied()
            .ok_or_else(|| VolumeError::validation("size", format!("unknown size category '{s}'")))
    }
}

/// Reporting granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    pub const ALL: [Cadence; 3] = [Cadence::Daily, Cadence::Weekly, Cadence::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily   => "daily",
            Cadence::Weekly  => "weekly",
            Cadence::Monthly => "monthly",
        }
    }

    /// Maximum rows a single size bucket may hold within one year.
    pub fn capacity(&self) -> i64 {
        match self {
            Cadence::Daily   => 366,
            Cadence::Weekly  => 52,
            Cadence::Monthly => 12,
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily"   => Ok(Cadence::Daily),
            "weekly"  => Ok(Cadence::Weekly),
            "monthly" => Ok(Cadence::Monthly),
            other => Err(VolumeError::validation(
                "period_type",
                format!("unrecognized cadence '{other}'"),
            )),
        }
    }
}
