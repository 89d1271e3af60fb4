//! Age-bucket labels.
//!
//! The source publishes age groups as free text ("20-29", "<5", ">80 ani").
//! [`parse_age_range`] turns a label into an [`AgeRange`] keyed on
//! `(lower, upper, unit)`, or `None` for labels that carry no range.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Optional lower bound, one of `<`, `>` or `-`, then the upper bound.
/// Matched anywhere in the label; the first match wins.
static AGE_RANGE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)?[<>-]([0-9]+)").unwrap());

/// Serialized as `years`/`months`. Deserializing goes through
/// [`AgeUnit::from_source_flag`], so any string is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum AgeUnit {
    Years,
    Months,
}

impl AgeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Years => "years",
            Self::Months => "months",
        }
    }

    /// Map the source's own bucket-type flag. Only `ani` means years;
    /// every other flag is a month-based bucket.
    pub fn from_source_flag(flag: &str) -> Self {
        match flag.trim().to_lowercase().as_str() {
            "ani" | "years" => Self::Years,
            _ => Self::Months,
        }
    }
}

impl From<String> for AgeUnit {
    fn from(flag: String) -> Self {
        Self::from_source_flag(&flag)
    }
}

impl fmt::Display for AgeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeUnit {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "years" => Ok(Self::Years),
            "months" => Ok(Self::Months),
            other => Err(CoreError::UnknownAgeUnit(other.to_string())),
        }
    }
}

/// A parsed age bucket. `lower == None` is an open-ended bucket and is a
/// distinct key from any bucket with a concrete lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgeRange {
    pub lower: Option<i32>,
    pub upper: i32,
    pub unit: AgeUnit,
}

impl AgeRange {
    pub fn new(lower: Option<i32>, upper: i32, unit: AgeUnit) -> Self {
        Self { lower, upper, unit }
    }
}

impl fmt::Display for AgeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lower {
            Some(lower) => write!(f, "{}-{} {}", lower, self.upper, self.unit),
            None => write!(f, "open-{} {}", self.upper, self.unit),
        }
    }
}

/// Parse a free-text age label. Returns `None` when the label has no
/// recognisable range (or the bounds overflow `i32`); callers skip those rows.
pub fn parse_age_range(label: &str, unit: AgeUnit) -> Option<AgeRange> {
    let caps = AGE_RANGE_REGEX.captures(label)?;
    let upper = caps.get(2)?.as_str().parse().ok()?;
    let lower = match caps.get(1) {
        Some(m) => Some(m.as_str().parse().ok()?),
        None => None,
    };
    Some(AgeRange { lower, upper, unit })
}
