//! TOPSIS composite ranking
//!
//! Fuses the four factor classes of each object into one score by distance
//! to an ideal-best and ideal-worst alternative within the cohort.
//!
//! Global invariants enforced:
//! - Scores lie in [0, 1]; an object at both ideals scores exactly 0.5
//! - Scaling every weight by the same positive constant leaves scores unchanged
//! - Risk classes come from equal-width bins over the cohort's scores
//! - Display rank is descending by score, ties broken by object id

use crate::classify::{Classifier, RiskClass};
use crate::error::{ScoringError, ScoringResult};
use crate::factors::{CohortFactors, Factor};
use crate::period::TimePeriod;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Score assigned when an object is at distance zero from both ideals
pub const TIE_SCORE: f64 = 0.5;

/// Polarity of one criterion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criterion {
    /// Larger values are riskier: ideal best is the column minimum
    #[default]
    MoreIsWorse,
    /// Larger values are safer: ideal best is the column maximum
    MoreIsBetter,
}

impl Criterion {
    pub fn reversed(self) -> Criterion {
        match self {
            Criterion::MoreIsWorse => Criterion::MoreIsBetter,
            Criterion::MoreIsBetter => Criterion::MoreIsWorse,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::MoreIsWorse => "more-is-worse",
            Criterion::MoreIsBetter => "more-is-better",
        }
    }
}

/// Distances and score of one alternative
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TopsisScore {
    pub distance_to_best: f64,
    pub distance_to_worst: f64,
    pub score: f64,
}

/// Validated weights and polarities
#[derive(Debug, Clone, PartialEq)]
pub struct Topsis {
    weights: Vec<f64>,
    criteria: Vec<Criterion>,
}

impl Topsis {
    pub fn new(weights: Vec<f64>, criteria: Vec<Criterion>) -> ScoringResult<Self> {
        if weights.is_empty() {
            return Err(ScoringError::config("TOPSIS needs at least one weight"));
        }
        if weights.len() != criteria.len() {
            return Err(ScoringError::config(format!(
                "{} weights but {} criteria",
                weights.len(),
                criteria.len()
            )));
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(ScoringError::config(format!(
                "weights must be finite and non-negative (got {})",
                w
            )));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(ScoringError::config("weights must not all be zero"));
        }
        let weights = weights.iter().map(|w| w / total).collect();
        Ok(Topsis { weights, criteria })
    }

    pub fn width(&self) -> usize {
        self.weights.len()
    }

    /// Normalized weights (summing to 1)
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Score every row of a decision matrix
    pub fn evaluate(&self, matrix: &[Vec<f64>]) -> ScoringResult<Vec<TopsisScore>> {
        let width = self.width();
        for (i, row) in matrix.iter().enumerate() {
            if row.len() != width {
                return Err(ScoringError::config(format!(
                    "row {} has {} criteria, expected {}",
                    i,
                    row.len(),
                    width
                )));
            }
            if let Some(v) = row.iter().find(|v| !v.is_finite()) {
                return Err(ScoringError::data(format!(
                    "non-finite value {} in decision matrix row {}",
                    v, i
                )));
            }
        }
        if matrix.is_empty() {
            return Ok(Vec::new());
        }

        // Vector normalization then weighting
        let norms: Vec<f64> = (0..width)
            .map(|j| matrix.iter().map(|r| r[j] * r[j]).sum::<f64>().sqrt())
            .collect();
        let weighted: Vec<Vec<f64>> = matrix
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, v)| {
                        if norms[j] > 0.0 {
                            v / norms[j] * self.weights[j]
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect();

        let mut best = vec![0.0; width];
        let mut worst = vec![0.0; width];
        for j in 0..width {
            let (lo, hi) = weighted
                .iter()
                .map(|r| r[j])
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            match self.criteria[j] {
                Criterion::MoreIsWorse => {
                    best[j] = lo;
                    worst[j] = hi;
                }
                Criterion::MoreIsBetter => {
                    best[j] = hi;
                    worst[j] = lo;
                }
            }
        }

        Ok(weighted
            .iter()
            .map(|row| {
                let distance_to_best = euclidean(row, &best);
                let distance_to_worst = euclidean(row, &worst);
                let denom = distance_to_best + distance_to_worst;
                let score = if denom > 0.0 {
                    distance_to_best / denom
                } else {
                    TIE_SCORE
                };
                TopsisScore {
                    distance_to_best,
                    distance_to_worst,
                    score,
                }
            })
            .collect())
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Composite score of one object, aligned with the cohort's rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeScore {
    pub object_id: String,
    pub timeperiod: TimePeriod,
    pub topsis_score: f64,
    pub risk_class: RiskClass,
    /// 1 is the riskiest object of the cohort
    pub rank: usize,
}

/// Fuse the factor classes of one cohort, in [`Factor::ALL`] order
pub fn rank_cohort(
    factors: &CohortFactors,
    topsis: &Topsis,
    classifier: &Classifier,
) -> ScoringResult<Vec<CompositeScore>> {
    if topsis.width() != Factor::ALL.len() {
        return Err(ScoringError::config(format!(
            "TOPSIS configured for {} criteria, {} factors are scored",
            topsis.width(),
            Factor::ALL.len()
        )));
    }

    let columns = Factor::ALL
        .iter()
        .map(|f| factors.column(*f))
        .collect::<ScoringResult<Vec<_>>>()?;
    let matrix: Vec<Vec<f64>> = (0..factors.object_ids.len())
        .map(|i| columns.iter().map(|c| c.classes[i].as_f64()).collect())
        .collect();

    let scores = topsis.evaluate(&matrix)?;
    let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
    let classes = classifier.classify(&values)?;

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| {
        values[*b]
            .partial_cmp(&values[*a])
            .unwrap_or(Ordering::Equal)
            .then_with(|| factors.object_ids[*a].cmp(&factors.object_ids[*b]))
    });
    let mut ranks = vec![0; values.len()];
    for (position, idx) in order.into_iter().enumerate() {
        ranks[idx] = position + 1;
    }

    Ok(factors
        .object_ids
        .iter()
        .enumerate()
        .map(|(i, object_id)| CompositeScore {
            object_id: object_id.clone(),
            timeperiod: factors.timeperiod,
            topsis_score: values[i],
            risk_class: classes[i],
            rank: ranks[i],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::FactorColumn;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn default_topsis() -> Topsis {
        Topsis::new(vec![4.0, 1.0, 2.0, 2.0], vec![Criterion::MoreIsWorse; 4]).unwrap()
    }

    fn cohort_factors(rows: &[(&str, [u8; 4])]) -> CohortFactors {
        let mut columns = BTreeMap::new();
        for (j, factor) in Factor::ALL.iter().enumerate() {
            columns.insert(
                *factor,
                FactorColumn {
                    factor: *factor,
                    classes: rows
                        .iter()
                        .map(|(_, c)| RiskClass::new(c[j]).unwrap())
                        .collect(),
                    floats: None,
                    skipped: Vec::new(),
                },
            );
        }
        CohortFactors {
            timeperiod: "2023_07".parse().unwrap(),
            object_ids: rows.iter().map(|(id, _)| id.to_string()).collect(),
            columns,
        }
    }

    #[test]
    fn test_weight_length_mismatch() {
        let err = Topsis::new(vec![4.0, 1.0, 2.0], vec![Criterion::MoreIsWorse; 4]).unwrap_err();
        assert!(matches!(err, ScoringError::Configuration(_)));
        assert!(Topsis::new(vec![0.0, 0.0], vec![Criterion::MoreIsWorse; 2]).is_err());
        assert!(Topsis::new(vec![-1.0, 2.0], vec![Criterion::MoreIsWorse; 2]).is_err());
    }

    #[test]
    fn test_extremes_score_zero_and_one() {
        let t = default_topsis();
        let scores = t
            .evaluate(&[
                vec![1.0, 1.0, 1.0, 1.0],
                vec![3.0, 3.0, 3.0, 3.0],
                vec![5.0, 5.0, 5.0, 5.0],
            ])
            .unwrap();
        assert_eq!(scores[0].score, 0.0);
        assert_eq!(scores[2].score, 1.0);
        assert!(scores[1].score > 0.0 && scores[1].score < 1.0);
    }

    #[test]
    fn test_identical_rows_tie_at_half() {
        let t = default_topsis();
        let scores = t
            .evaluate(&[vec![2.0, 3.0, 1.0, 4.0], vec![2.0, 3.0, 1.0, 4.0]])
            .unwrap();
        assert!(scores.iter().all(|s| s.score == TIE_SCORE));
    }

    #[test]
    fn test_zero_column_contributes_nothing() {
        let t = Topsis::new(vec![1.0, 1.0], vec![Criterion::MoreIsWorse; 2]).unwrap();
        let scores = t.evaluate(&[vec![0.0, 1.0], vec![0.0, 2.0]]).unwrap();
        assert_eq!(scores[0].score, 0.0);
        assert_eq!(scores[1].score, 1.0);
    }

    #[test]
    fn test_rank_cohort_orders_by_score() {
        let factors = cohort_factors(&[
            ("low", [1, 1, 1, 1]),
            ("high", [5, 5, 5, 5]),
            ("mid", [3, 2, 3, 3]),
        ]);
        let composite =
            rank_cohort(&factors, &default_topsis(), &Classifier::equal_width(0.0, 1.0)).unwrap();

        assert_eq!(composite[0].object_id, "low");
        assert_eq!(composite[0].rank, 3);
        assert_eq!(composite[0].risk_class.get(), 1);
        assert_eq!(composite[1].rank, 1);
        assert_eq!(composite[1].risk_class.get(), 5);
        assert_eq!(composite[2].rank, 2);
    }

    #[test]
    fn test_single_object_cohort_is_middle_class() {
        let factors = cohort_factors(&[("only", [4, 2, 3, 1])]);
        let composite =
            rank_cohort(&factors, &default_topsis(), &Classifier::equal_width(0.0, 1.0)).unwrap();
        assert_eq!(composite[0].topsis_score, TIE_SCORE);
        assert_eq!(composite[0].risk_class.get(), 3);
        assert_eq!(composite[0].rank, 1);
    }

    #[test]
    fn test_missing_factor_column() {
        let mut factors = cohort_factors(&[("a", [1, 2, 3, 4])]);
        factors.columns.remove(&Factor::Vulnerability);
        let err = rank_cohort(&factors, &default_topsis(), &Classifier::equal_width(0.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, ScoringError::Configuration(_)));
    }

    fn class_row() -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(1u8..=5, 4).prop_map(|r| r.into_iter().map(f64::from).collect())
    }

    proptest! {
        #[test]
        fn prop_weight_scale_invariance(
            matrix in prop::collection::vec(class_row(), 2..12),
            weights in prop::collection::vec(0.1f64..10.0, 4),
            scale in 0.01f64..100.0,
        ) {
            let criteria = vec![Criterion::MoreIsWorse; 4];
            let base = Topsis::new(weights.clone(), criteria.clone()).unwrap();
            let scaled = Topsis::new(weights.iter().map(|w| w * scale).collect(), criteria).unwrap();

            let a = base.evaluate(&matrix).unwrap();
            let b = scaled.evaluate(&matrix).unwrap();
            for (x, y) in a.iter().zip(&b) {
                prop_assert!((x.score - y.score).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_polarity_reverses_effect(
            shared in class_row(),
            others in prop::collection::vec(class_row(), 0..8),
            column in 0usize..4,
            low in 1u8..5,
            bump in 1u8..5,
            weights in prop::collection::vec(0.1f64..10.0, 4),
        ) {
            let high = (low + bump).min(5);
            prop_assume!(high > low);

            // two rows identical except in one column
            let mut a = shared.clone();
            let mut b = shared;
            a[column] = f64::from(high);
            b[column] = f64::from(low);
            let mut matrix = vec![a, b];
            matrix.extend(others);

            let mut criteria = vec![Criterion::MoreIsWorse; 4];
            let worse = Topsis::new(weights.clone(), criteria.clone()).unwrap();
            let s = worse.evaluate(&matrix).unwrap();
            prop_assert!(s[0].score > s[1].score);

            criteria[column] = criteria[column].reversed();
            let better = Topsis::new(weights, criteria).unwrap();
            let s = better.evaluate(&matrix).unwrap();
            prop_assert!(s[0].score < s[1].score);
        }
    }
}
