//! Factor scorers
//!
//! Each factor runs the same pipeline over one cohort: select its input
//! columns, scale them, combine row-wise into a single scalar and classify.
//!
//! Global invariants enforced:
//! - Scorers are independent: none reads another factor's output
//! - Every member of the cohort receives exactly one class per factor
//! - A factor whose every input column was skipped fails its cohort

use crate::classify::{Classifier, RiskClass};
use crate::cumulate::cumsum_column_name;
use crate::error::{ScoringError, ScoringResult};
use crate::normalize::{normalize_cohort, DegeneratePolicy, Scaling};
use crate::period::TimePeriod;
use crate::table::Cohort;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One of the four risk dimensions, in TOPSIS column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Factor {
    Hazard,
    Exposure,
    Vulnerability,
    GovernmentResponse,
}

impl Factor {
    pub const ALL: [Factor; 4] = [
        Factor::Hazard,
        Factor::Exposure,
        Factor::Vulnerability,
        Factor::GovernmentResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::Hazard => "hazard",
            Factor::Exposure => "exposure",
            Factor::Vulnerability => "vulnerability",
            Factor::GovernmentResponse => "government-response",
        }
    }

    /// Output column carrying the factor class
    pub fn column_name(&self) -> &'static str {
        match self {
            Factor::Hazard => "flood-hazard",
            other => other.as_str(),
        }
    }

    /// Output column carrying the continuous precursor
    pub fn float_column_name(&self) -> String {
        format!("{}-float", self.column_name())
    }
}

impl std::fmt::Display for Factor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-wise combination of the scaled input columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Combine {
    /// Min-max scale, then sum
    Sum,
    /// Min-max scale, then mean
    Mean,
    /// `ln(1 + x)` and z-score, then mean
    LogStandardizedMean,
}

impl Combine {
    pub fn scaling(self) -> Scaling {
        match self {
            Combine::Sum | Combine::Mean => Scaling::MinMax,
            Combine::LogStandardizedMean => Scaling::LogStandardize,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Combine::Sum => "sum",
            Combine::Mean => "mean",
            Combine::LogStandardizedMean => "log-standardized-mean",
        }
    }
}

/// Fully resolved recipe for one factor
#[derive(Debug, Clone, PartialEq)]
pub struct FactorSpec {
    pub factor: Factor,
    pub inputs: Vec<String>,
    pub combine: Combine,
    pub classifier: Classifier,
    /// Read the financial-year running totals instead of the raw inputs
    pub cumulative: bool,
    /// Emit the combined scalar as `<factor>-float`
    pub emit_float: bool,
}

impl FactorSpec {
    /// Columns the scorer actually reads
    pub fn source_columns(&self) -> Vec<String> {
        if self.cumulative {
            self.inputs.iter().map(|c| cumsum_column_name(c)).collect()
        } else {
            self.inputs.clone()
        }
    }
}

/// Scored output of one factor over one cohort, aligned with `Cohort::rows`
#[derive(Debug, Clone, PartialEq)]
pub struct FactorColumn {
    pub factor: Factor,
    pub classes: Vec<RiskClass>,
    pub floats: Option<Vec<f64>>,
    pub skipped: Vec<String>,
}

/// One `(object_id, timeperiod)` row of a per-factor score table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactorScore {
    pub object_id: String,
    pub timeperiod: TimePeriod,
    pub factor: Factor,
    pub class: RiskClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub float: Option<f64>,
}

/// All four factor columns of one cohort
#[derive(Debug, Clone, PartialEq)]
pub struct CohortFactors {
    pub timeperiod: TimePeriod,
    pub object_ids: Vec<String>,
    pub columns: BTreeMap<Factor, FactorColumn>,
}

impl CohortFactors {
    pub fn column(&self, factor: Factor) -> ScoringResult<&FactorColumn> {
        self.columns.get(&factor).ok_or_else(|| {
            ScoringError::config(format!(
                "factor '{}' was not scored for {}",
                factor, self.timeperiod
            ))
        })
    }

    /// Per-factor table rows in cohort order
    pub fn records(&self, factor: Factor) -> ScoringResult<Vec<FactorScore>> {
        let column = self.column(factor)?;
        Ok(self
            .object_ids
            .iter()
            .enumerate()
            .map(|(i, object_id)| FactorScore {
                object_id: object_id.clone(),
                timeperiod: self.timeperiod,
                factor,
                class: column.classes[i],
                float: column.floats.as_ref().map(|f| f[i]),
            })
            .collect())
    }
}

fn combine_rows(columns: &[Vec<f64>], rows: usize, combine: Combine) -> Vec<f64> {
    (0..rows)
        .map(|i| {
            let total: f64 = columns.iter().map(|c| c[i]).sum();
            match combine {
                Combine::Sum => total,
                Combine::Mean | Combine::LogStandardizedMean => total / columns.len() as f64,
            }
        })
        .collect()
}

/// Score one factor over one cohort
pub fn score_factor(
    cohort: &Cohort<'_>,
    spec: &FactorSpec,
    degenerate: DegeneratePolicy,
) -> ScoringResult<FactorColumn> {
    let sources = spec.source_columns();
    let normalized = normalize_cohort(cohort, &sources, spec.combine.scaling(), degenerate)?;

    if normalized.columns.is_empty() {
        return Err(ScoringError::degenerate(format!(
            "factor '{}' has no usable input columns in {} (skipped: {})",
            spec.factor,
            cohort.timeperiod,
            normalized.skipped.join(", ")
        )));
    }

    let scaled: Vec<Vec<f64>> = normalized.columns.into_iter().map(|c| c.values).collect();
    let combined = combine_rows(&scaled, cohort.len(), spec.combine);
    let classes = spec.classifier.classify(&combined)?;

    Ok(FactorColumn {
        factor: spec.factor,
        classes,
        floats: spec.emit_float.then_some(combined),
        skipped: normalized.skipped,
    })
}

/// Score every factor over one cohort
pub fn score_cohort_factors(
    cohort: &Cohort<'_>,
    specs: &[FactorSpec],
    degenerate: DegeneratePolicy,
) -> ScoringResult<CohortFactors> {
    let mut columns = BTreeMap::new();
    for spec in specs {
        let column = score_factor(cohort, spec, degenerate)?;
        if column.classes.len() != cohort.len() {
            return Err(ScoringError::data(format!(
                "factor '{}' produced {} classes for {} members of {}",
                spec.factor,
                column.classes.len(),
                cohort.len(),
                cohort.timeperiod
            )));
        }
        if !column.skipped.is_empty() {
            tracing::debug!(
                factor = spec.factor.as_str(),
                period = %cohort.timeperiod,
                skipped = ?column.skipped,
                "skipped constant input columns"
            );
        }
        if columns.insert(spec.factor, column).is_some() {
            return Err(ScoringError::config(format!(
                "factor '{}' is configured twice",
                spec.factor
            )));
        }
    }

    Ok(CohortFactors {
        timeperiod: cohort.timeperiod,
        object_ids: cohort.rows.iter().map(|r| r.object_id.clone()).collect(),
        columns,
    })
}
