//! District roll-up
//!
//! Aggregates scored objects to `(district, timeperiod)` rows.
//!
//! Global invariants enforced:
//! - District classes are re-binned from the mean of member classes, never
//!   taken as the mode, so district and object rankings may diverge
//! - Every exposed indicator has an explicitly declared aggregation rule
//! - Deterministic ordering: by period, then district name

use crate::classify::{Classifier, RiskClass};
use crate::error::{ScoringError, ScoringResult};
use crate::factors::Factor;
use crate::period::TimePeriod;
use crate::pipeline::ObjectRow;
use crate::stats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-column aggregation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggRule {
    Sum,
    Mean,
    Max,
    Min,
    /// Value of the member with the lowest object id
    First,
}

impl AggRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggRule::Sum => "sum",
            AggRule::Mean => "mean",
            AggRule::Max => "max",
            AggRule::Min => "min",
            AggRule::First => "first",
        }
    }

    /// Apply to values ordered by object id (must be non-empty)
    fn apply(self, values: &[f64]) -> f64 {
        match self {
            AggRule::Sum => values.iter().sum(),
            AggRule::Mean => stats::mean(values),
            AggRule::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggRule::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggRule::First => values[0],
        }
    }
}

/// Population over which district means are re-binned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebinScope {
    /// Bin each period's district means separately
    #[default]
    Period,
    /// Bin all district means of the run together
    Global,
}

impl RebinScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebinScope::Period => "period",
            RebinScope::Global => "global",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RollupConfig {
    pub indicators: Vec<String>,
    pub rules: BTreeMap<String, AggRule>,
    pub rebin_scope: RebinScope,
    pub classifier: Classifier,
}

impl RollupConfig {
    /// Every indicator must carry a rule
    pub fn validate(&self) -> ScoringResult<()> {
        let missing: Vec<&str> = self
            .indicators
            .iter()
            .filter(|c| !self.rules.contains_key(*c))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ScoringError::config(format!(
                "no aggregation rule for district indicator(s): {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistrictRow {
    pub district: String,
    pub timeperiod: TimePeriod,
    pub members: usize,
    pub factor_means: BTreeMap<Factor, f64>,
    pub factors: BTreeMap<Factor, RiskClass>,
    pub risk_class_mean: f64,
    pub risk_class: RiskClass,
    pub topsis_score: f64,
    pub indicators: BTreeMap<String, f64>,
}

/// Aggregate scored objects into district rows
pub fn roll_up(objects: &[ObjectRow], config: &RollupConfig) -> ScoringResult<Vec<DistrictRow>> {
    config.validate()?;

    let mut groups: BTreeMap<(TimePeriod, &str), Vec<&ObjectRow>> = BTreeMap::new();
    for row in objects {
        let district = row.district.as_deref().ok_or_else(|| {
            ScoringError::data(format!(
                "object '{}' has no district for {}",
                row.object_id, row.timeperiod
            ))
        })?;
        groups
            .entry((row.timeperiod, district))
            .or_default()
            .push(row);
    }

    let mut districts = Vec::with_capacity(groups.len());
    for ((timeperiod, district), mut members) in groups {
        members.sort_by(|a, b| a.object_id.cmp(&b.object_id));

        let mut factor_means = BTreeMap::new();
        for factor in Factor::ALL {
            let classes = members
                .iter()
                .map(|m| {
                    m.factors.get(&factor).map(|c| c.as_f64()).ok_or_else(|| {
                        ScoringError::data(format!(
                            "object '{}' has no {} class for {}",
                            m.object_id, factor, timeperiod
                        ))
                    })
                })
                .collect::<ScoringResult<Vec<f64>>>()?;
            factor_means.insert(factor, stats::mean(&classes));
        }

        let risk: Vec<f64> = members.iter().map(|m| m.risk_class.as_f64()).collect();
        let scores: Vec<f64> = members.iter().map(|m| m.topsis_score).collect();

        let mut indicators = BTreeMap::new();
        for column in &config.indicators {
            let values = members
                .iter()
                .map(|m| indicator_value(m, column))
                .collect::<ScoringResult<Vec<f64>>>()?;
            // validated above
            let rule = config.rules.get(column).copied().unwrap_or(AggRule::Sum);
            indicators.insert(column.clone(), rule.apply(&values));
        }

        districts.push(DistrictRow {
            district: district.to_string(),
            timeperiod,
            members: members.len(),
            factor_means,
            factors: BTreeMap::new(),
            risk_class_mean: stats::mean(&risk),
            risk_class: RiskClass::LOWEST,
            topsis_score: stats::mean(&scores),
            indicators,
        });
    }

    rebin(&mut districts, config)?;
    Ok(districts)
}

fn indicator_value(row: &ObjectRow, column: &str) -> ScoringResult<f64> {
    match row.indicators.get(column) {
        Some(v) if v.is_finite() => Ok(*v),
        Some(v) => Err(ScoringError::data(format!(
            "non-finite indicator '{}' = {} for ({}, {})",
            column, v, row.object_id, row.timeperiod
        ))),
        None => Err(ScoringError::data(format!(
            "missing indicator '{}' for ({}, {})",
            column, row.object_id, row.timeperiod
        ))),
    }
}

/// Assign district classes from member-class means within each scope
fn rebin(districts: &mut [DistrictRow], config: &RollupConfig) -> ScoringResult<()> {
    let mut scopes: BTreeMap<Option<TimePeriod>, Vec<usize>> = BTreeMap::new();
    for (i, row) in districts.iter().enumerate() {
        let key = match config.rebin_scope {
            RebinScope::Period => Some(row.timeperiod),
            RebinScope::Global => None,
        };
        scopes.entry(key).or_default().push(i);
    }

    for indices in scopes.values() {
        for factor in Factor::ALL {
            let means: Vec<f64> = indices
                .iter()
                .map(|i| districts[*i].factor_means.get(&factor).copied().unwrap_or(0.0))
                .collect();
            let classes = config.classifier.classify(&means)?;
            for (i, class) in indices.iter().zip(classes) {
                districts[*i].factors.insert(factor, class);
            }
        }

        let means: Vec<f64> = indices
            .iter()
            .map(|i| districts[*i].risk_class_mean)
            .collect();
        let classes = config.classifier.classify(&means)?;
        for (i, class) in indices.iter().zip(classes) {
            districts[*i].risk_class = class;
        }
    }

    Ok(())
}
