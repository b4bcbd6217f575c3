//! Cohort normalizer
//!
//! Rescales indicator columns within a single cohort. Nothing is fitted
//! across cohorts: each call sees only the rows it is given.
//!
//! Global invariants enforced:
//! - Min-max output lies in [0, 1]
//! - Constant columns follow an explicit [`DegeneratePolicy`]

use crate::error::{ScoringError, ScoringResult};
use crate::stats;
use crate::table::Cohort;
use serde::{Deserialize, Serialize};

/// What to do with a column that is constant within a cohort
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegeneratePolicy {
    /// Every value of the column becomes 0.0
    #[default]
    MapToZero,
    /// Drop the column from the factor composite
    Skip,
    /// Abort the cohort with a degenerate-cohort error
    Fail,
}

impl DegeneratePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegeneratePolicy::MapToZero => "map-to-zero",
            DegeneratePolicy::Skip => "skip",
            DegeneratePolicy::Fail => "fail",
        }
    }
}

/// Transform applied to each column before combining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scaling {
    /// `(x - min) / (max - min)`
    MinMax,
    /// `ln(1 + x)` then z-score with sample std
    LogStandardize,
}

/// A scaled column ready to be combined
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledColumn {
    pub name: String,
    pub values: Vec<f64>,
}

/// Result of scaling a set of columns within one cohort
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedColumns {
    pub columns: Vec<ScaledColumn>,
    pub skipped: Vec<String>,
}

fn is_constant(lo: f64, hi: f64) -> bool {
    (hi - lo).abs() <= f64::EPSILON * hi.abs().max(1.0)
}

/// Min-max rescale; None when the column is constant or empty
pub fn min_max_scale(values: &[f64]) -> Option<Vec<f64>> {
    let (lo, hi) = stats::min_max(values)?;
    if is_constant(lo, hi) {
        return None;
    }
    let range = hi - lo;
    Some(values.iter().map(|v| (v - lo) / range).collect())
}

/// `ln(1 + x)` followed by standardization; None when the logged column is constant
pub fn log_standardize(values: &[f64]) -> ScoringResult<Option<Vec<f64>>> {
    if let Some(bad) = values.iter().find(|v| **v <= -1.0) {
        return Err(ScoringError::data(format!(
            "log transform requires values > -1 (got {})",
            bad
        )));
    }
    let logged: Vec<f64> = values.iter().map(|v| v.ln_1p()).collect();
    // rounding in the mean leaves a tiny sd on constant columns
    match stats::min_max(&logged) {
        Some((lo, hi)) if !is_constant(lo, hi) => {}
        _ => return Ok(None),
    }
    let m = stats::mean(&logged);
    let sd = stats::sample_std(&logged);
    if sd == 0.0 || !sd.is_finite() {
        return Ok(None);
    }
    Ok(Some(logged.iter().map(|v| (v - m) / sd).collect()))
}

/// Scale the listed columns of one cohort
pub fn normalize_cohort(
    cohort: &Cohort<'_>,
    columns: &[String],
    scaling: Scaling,
    policy: DegeneratePolicy,
) -> ScoringResult<NormalizedColumns> {
    let mut out = NormalizedColumns::default();

    for name in columns {
        let raw = cohort.column(name)?;
        let scaled = match scaling {
            Scaling::MinMax => min_max_scale(&raw),
            Scaling::LogStandardize => log_standardize(&raw)?,
        };

        match (scaled, policy) {
            (Some(values), _) => out.columns.push(ScaledColumn {
                name: name.clone(),
                values,
            }),
            (None, DegeneratePolicy::MapToZero) => out.columns.push(ScaledColumn {
                name: name.clone(),
                values: vec![0.0; raw.len()],
            }),
            (None, DegeneratePolicy::Skip) => out.skipped.push(name.clone()),
            (None, DegeneratePolicy::Fail) => {
                return Err(ScoringError::degenerate(format!(
                    "column '{}' has zero variance in {} ({} rows)",
                    name,
                    cohort.timeperiod,
                    raw.len()
                )))
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Dataset, Observation};

    fn dataset(rows: &[(&str, f64, f64)]) -> Dataset {
        let period = "2020_04".parse().unwrap();
        Dataset::new(
            rows.iter()
                .map(|(id, a, b)| {
                    Observation::new(*id, period)
                        .with_value("a", *a)
                        .with_value("b", *b)
                })
                .collect(),
        )
        .unwrap()
    }

    fn cols() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn test_min_max_range() {
        let scaled = min_max_scale(&[2.0, 4.0, 6.0]).unwrap();
        assert_eq!(scaled, vec![0.0, 0.5, 1.0]);
        assert!(min_max_scale(&[5.0, 5.0]).is_none());
        assert!(min_max_scale(&[]).is_none());
    }

    #[test]
    fn test_constant_column_map_to_zero() {
        let data = dataset(&[("A", 1.0, 7.0), ("B", 3.0, 7.0)]);
        let cohort = &data.cohorts()[0];
        let out =
            normalize_cohort(cohort, &cols(), Scaling::MinMax, DegeneratePolicy::MapToZero)
                .unwrap();
        assert_eq!(out.columns.len(), 2);
        assert_eq!(out.columns[1].values, vec![0.0, 0.0]);
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn test_constant_column_skip() {
        let data = dataset(&[("A", 1.0, 7.0), ("B", 3.0, 7.0)]);
        let cohort = &data.cohorts()[0];
        let out = normalize_cohort(cohort, &cols(), Scaling::MinMax, DegeneratePolicy::Skip)
            .unwrap();
        assert_eq!(out.columns.len(), 1);
        assert_eq!(out.skipped, vec!["b".to_string()]);
    }

    #[test]
    fn test_constant_column_fail() {
        let data = dataset(&[("A", 1.0, 7.0), ("B", 3.0, 7.0)]);
        let cohort = &data.cohorts()[0];
        let err = normalize_cohort(cohort, &cols(), Scaling::MinMax, DegeneratePolicy::Fail)
            .unwrap_err();
        assert!(matches!(err, ScoringError::DegenerateCohort(_)));
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_log_standardize_is_centered() {
        let out = log_standardize(&[0.0, 9.0, 99.0]).unwrap().unwrap();
        let m: f64 = out.iter().sum::<f64>() / 3.0;
        assert!(m.abs() < 1e-12);
        assert!(out[0] < out[1] && out[1] < out[2]);
    }

    #[test]
    fn test_log_standardize_constant_columns_are_degenerate() {
        for x in [0.0, 0.1, 0.3, 1.1, 12.7, 45.9, 101.3, 1234.56] {
            for n in [2, 3, 5, 6, 7, 10, 13] {
                assert_eq!(log_standardize(&vec![x; n]).unwrap(), None, "x={} n={}", x, n);
            }
        }
    }

    #[test]
    fn test_log_standardize_constant_column_follows_policy() {
        let data = dataset(&[("A", 1.0, 45.9), ("B", 3.0, 45.9), ("C", 8.0, 45.9)]);
        let cohort = &data.cohorts()[0];
        let out = normalize_cohort(
            cohort,
            &cols(),
            Scaling::LogStandardize,
            DegeneratePolicy::MapToZero,
        )
        .unwrap();
        assert_eq!(out.columns[1].values, vec![0.0; 3]);

        let err = normalize_cohort(cohort, &cols(), Scaling::LogStandardize, DegeneratePolicy::Fail)
            .unwrap_err();
        assert!(matches!(err, ScoringError::DegenerateCohort(_)));
    }

    #[test]
    fn test_log_standardize_rejects_values_below_minus_one() {
        assert!(log_standardize(&[-1.0, 2.0]).is_err());
        assert_eq!(log_standardize(&[4.0, 4.0]).unwrap(), None);
    }
}
