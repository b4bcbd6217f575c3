//! Input data quality check
//!
//! Reports problems in the raw table without modifying or rejecting it, so
//! an analyst can fix the source before scoring.

use crate::period::TimePeriod;
use crate::stats;
use crate::table::Dataset;
use serde::Serialize;

/// Values above this are flagged as suspiciously large
pub const EXTREME_VALUE: f64 = 1e9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnQuality {
    pub column: String,
    pub nan: usize,
    pub infinite: usize,
    pub negative: usize,
    /// Rows without the column at all
    pub absent: usize,
    pub zero_variance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub extreme: usize,
}

impl ColumnQuality {
    pub fn is_clean(&self) -> bool {
        self.nan == 0
            && self.infinite == 0
            && self.negative == 0
            && self.absent == 0
            && !self.zero_variance
            && self.extreme == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SmallPeriod {
    pub timeperiod: TimePeriod,
    pub members: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub rows: usize,
    pub columns: Vec<ColumnQuality>,
    /// Checked columns not present in any row
    pub missing_columns: Vec<String>,
    pub duplicate_keys: usize,
    /// Rows whose checked values are all zero
    pub all_zero_rows: usize,
    pub min_members: usize,
    pub small_periods: Vec<SmallPeriod>,
}

impl QualityReport {
    pub fn is_clean(&self) -> bool {
        self.missing_columns.is_empty()
            && self.duplicate_keys == 0
            && self.all_zero_rows == 0
            && self.small_periods.is_empty()
            && self.columns.iter().all(ColumnQuality::is_clean)
    }
}

/// Check the listed columns of a dataset
pub fn check_dataset(dataset: &Dataset, columns: &[String], min_members: usize) -> QualityReport {
    let present = dataset.column_names();
    let (checked, missing_columns): (Vec<&String>, Vec<&String>) =
        columns.iter().partition(|c| present.contains(*c));

    let column_reports = checked
        .iter()
        .map(|column| {
            let values: Vec<f64> = dataset
                .rows()
                .iter()
                .filter_map(|r| r.values.get(column.as_str()).copied())
                .collect();
            let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
            let max = stats::min_max(&finite).map(|(_, hi)| hi);
            ColumnQuality {
                column: column.to_string(),
                nan: values.iter().filter(|v| v.is_nan()).count(),
                infinite: values.iter().filter(|v| v.is_infinite()).count(),
                negative: finite.iter().filter(|v| **v < 0.0).count(),
                absent: dataset.len() - values.len(),
                zero_variance: finite.len() >= 2 && stats::sample_std(&finite) == 0.0,
                max,
                extreme: finite.iter().filter(|v| **v > EXTREME_VALUE).count(),
            }
        })
        .collect();

    let all_zero_rows = if checked.is_empty() {
        0
    } else {
        dataset
            .rows()
            .iter()
            .filter(|r| {
                checked
                    .iter()
                    .all(|c| r.values.get(c.as_str()).copied() == Some(0.0))
            })
            .count()
    };

    let small_periods = dataset
        .cohorts()
        .iter()
        .filter(|c| c.len() < min_members)
        .map(|c| SmallPeriod {
            timeperiod: c.timeperiod,
            members: c.len(),
        })
        .collect();

    QualityReport {
        rows: dataset.len(),
        columns: column_reports,
        missing_columns: missing_columns.into_iter().cloned().collect(),
        duplicate_keys: dataset.duplicate_keys().len(),
        all_zero_rows,
        min_members,
        small_periods,
    }
}
