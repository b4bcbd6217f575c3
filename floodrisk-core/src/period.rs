//! Monthly time periods and financial years
//!
//! Periods are encoded as `YYYY_MM`. A financial year starts in a configured
//! month (April by default) and is rendered as `"2020-2021"`.

use crate::error::{ScoringError, ScoringResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Default first month of the financial year (April)
pub const DEFAULT_FY_START_MONTH: u32 = 4;

/// One monthly period; orders chronologically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePeriod {
    pub year: i32,
    pub month: u32,
}

impl TimePeriod {
    pub fn new(year: i32, month: u32) -> ScoringResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(ScoringError::data(format!(
                "month must be in 1..=12 (got {} in {}_{:02})",
                month, year, month
            )));
        }
        Ok(TimePeriod { year, month })
    }

    /// Financial year this period belongs to
    pub fn financial_year(&self, start_month: u32) -> FinancialYear {
        if self.month >= start_month {
            FinancialYear {
                start_year: self.year,
            }
        } else {
            FinancialYear {
                start_year: self.year - 1,
            }
        }
    }
}

impl FromStr for TimePeriod {
    type Err = ScoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (year, month) = trimmed
            .split_once('_')
            .ok_or_else(|| ScoringError::data(format!("malformed timeperiod '{}'", s)))?;
        let year: i32 = year
            .parse()
            .map_err(|_| ScoringError::data(format!("malformed year in timeperiod '{}'", s)))?;
        let month: u32 = month
            .parse()
            .map_err(|_| ScoringError::data(format!("malformed month in timeperiod '{}'", s)))?;
        TimePeriod::new(year, month)
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:02}", self.year, self.month)
    }
}

impl Serialize for TimePeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimePeriod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Financial year identified by the calendar year it starts in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FinancialYear {
    pub start_year: i32,
}

impl fmt::Display for FinancialYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_year, self.start_year + 1)
    }
}

impl Serialize for FinancialYear {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
