//! Ordinal classification into five risk classes
//!
//! Global invariants enforced:
//! - Every finite input receives exactly one class in 1..=5
//! - Non-finite input is a data-integrity error, never a default class
//! - Bands are right-closed: a value equal to an edge falls in the lower band

use crate::error::{ScoringError, ScoringResult};
use crate::stats;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of ordinal classes
pub const CLASS_COUNT: usize = 5;

/// Ordinal risk class, 1 (lowest) to 5 (highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RiskClass(u8);

impl RiskClass {
    pub const LOWEST: RiskClass = RiskClass(1);
    pub const HIGHEST: RiskClass = RiskClass(5);

    pub fn new(value: u8) -> Option<Self> {
        (1..=CLASS_COUNT as u8)
            .contains(&value)
            .then_some(RiskClass(value))
    }

    /// Class for a zero-based band index (0 -> 1, 4 -> 5)
    fn from_band(band: usize) -> Self {
        RiskClass(band.min(CLASS_COUNT - 1) as u8 + 1)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0)
    }

    pub fn name(&self) -> &'static str {
        match self.0 {
            1 => "very-low",
            2 => "low",
            3 => "medium",
            4 => "high",
            _ => "very-high",
        }
    }
}

impl TryFrom<u8> for RiskClass {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        RiskClass::new(value).ok_or_else(|| format!("risk class must be 1..=5 (got {})", value))
    }
}

impl From<RiskClass> for u8 {
    fn from(class: RiskClass) -> u8 {
        class.0
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction in which bands map to classes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelOrder {
    /// Lowest band is class 1
    #[default]
    Ascending,
    /// Lowest band is class 5 (higher input means lower risk)
    Descending,
}

impl LabelOrder {
    pub fn label(self, band: usize) -> RiskClass {
        let band = band.min(CLASS_COUNT - 1);
        match self {
            LabelOrder::Ascending => RiskClass::from_band(band),
            LabelOrder::Descending => RiskClass::from_band(CLASS_COUNT - 1 - band),
        }
    }
}

/// Handling of a value that falls outside every band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnbinnedPolicy {
    /// Assign the nearest end band
    ClampToNearest,
    /// Raise a data-integrity error
    #[default]
    FailOnUnbinned,
}

/// Handling of a zero-width observed range in equal-width binning
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DegenerateRange {
    /// Every value lands in the middle class (3)
    #[default]
    MiddleClass,
    /// Bin over a declared span instead of the observed one
    FixedSpan { lo: f64, hi: f64 },
    /// Raise a degenerate-cohort error
    Fail,
}

/// Binning policy selecting band edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum BinningPolicy {
    /// Edges at mean, mean + 1, 2 and 3 standard deviations
    MeanStd,
    /// Edges at the given quantiles of the cohort's values
    Quantile { breakpoints: Vec<f64> },
    /// Five equal-width bins over the observed range
    EqualWidth {
        #[serde(default)]
        on_degenerate: DegenerateRange,
    },
}

impl BinningPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinningPolicy::MeanStd => "mean-std",
            BinningPolicy::Quantile { .. } => "quantile",
            BinningPolicy::EqualWidth { .. } => "equal-width",
        }
    }

    pub fn validate(&self) -> ScoringResult<()> {
        match self {
            BinningPolicy::MeanStd => Ok(()),
            BinningPolicy::Quantile { breakpoints } => {
                if breakpoints.len() != CLASS_COUNT - 1 {
                    return Err(ScoringError::config(format!(
                        "quantile binning needs {} breakpoints (got {})",
                        CLASS_COUNT - 1,
                        breakpoints.len()
                    )));
                }
                for q in breakpoints {
                    if !(q.is_finite() && *q > 0.0 && *q < 1.0) {
                        return Err(ScoringError::config(format!(
                            "quantile breakpoints must lie in (0, 1) (got {})",
                            q
                        )));
                    }
                }
                if breakpoints.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(ScoringError::config(format!(
                        "quantile breakpoints must be strictly ascending (got {:?})",
                        breakpoints
                    )));
                }
                Ok(())
            }
            BinningPolicy::EqualWidth { on_degenerate } => match on_degenerate {
                DegenerateRange::FixedSpan { lo, hi } if !(lo.is_finite() && hi > lo) => {
                    Err(ScoringError::config(format!(
                        "fixed span must satisfy lo < hi (got {}..{})",
                        lo, hi
                    )))
                }
                _ => Ok(()),
            },
        }
    }
}

/// A binning policy together with label direction and out-of-range handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classifier {
    pub binning: BinningPolicy,
    #[serde(default)]
    pub labels: LabelOrder,
    #[serde(default)]
    pub unbinned: UnbinnedPolicy,
}

impl Classifier {
    pub fn new(binning: BinningPolicy, labels: LabelOrder) -> Self {
        Classifier {
            binning,
            labels,
            unbinned: UnbinnedPolicy::default(),
        }
    }

    pub fn with_unbinned(mut self, unbinned: UnbinnedPolicy) -> Self {
        self.unbinned = unbinned;
        self
    }

    /// Equal-width re-binning over a fixed fallback span
    pub fn equal_width(lo: f64, hi: f64) -> Self {
        Classifier::new(
            BinningPolicy::EqualWidth {
                on_degenerate: DegenerateRange::FixedSpan { lo, hi },
            },
            LabelOrder::Ascending,
        )
        .with_unbinned(UnbinnedPolicy::ClampToNearest)
    }

    /// Classify every value of one cohort
    pub fn classify(&self, values: &[f64]) -> ScoringResult<Vec<RiskClass>> {
        if let Some((i, v)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(ScoringError::data(format!(
                "cannot classify non-finite score {} at row {}",
                v, i
            )));
        }
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let bands = match &self.binning {
            BinningPolicy::MeanStd => {
                let edges = mean_std_edges(values);
                values.iter().map(|v| band_for(*v, &edges)).collect()
            }
            BinningPolicy::Quantile { breakpoints } => {
                let edges = quantile_edges(values, breakpoints);
                values.iter().map(|v| band_for(*v, &edges)).collect()
            }
            BinningPolicy::EqualWidth { on_degenerate } => {
                self.equal_width_bands(values, *on_degenerate)?
            }
        };

        Ok(bands.into_iter().map(|b| self.labels.label(b)).collect())
    }

    fn equal_width_bands(
        &self,
        values: &[f64],
        on_degenerate: DegenerateRange,
    ) -> ScoringResult<Vec<usize>> {
        let (lo, hi) = match stats::min_max(values) {
            Some(range) => range,
            None => return Ok(Vec::new()),
        };

        let (lo, hi) = if hi - lo > 0.0 {
            (lo, hi)
        } else {
            match on_degenerate {
                DegenerateRange::MiddleClass => return Ok(vec![CLASS_COUNT / 2; values.len()]),
                DegenerateRange::FixedSpan { lo, hi } => (lo, hi),
                DegenerateRange::Fail => {
                    return Err(ScoringError::degenerate(format!(
                        "equal-width binning over a zero-width range ({} values equal to {})",
                        values.len(),
                        lo
                    )))
                }
            }
        };

        let edges = equal_width_edges(lo, hi);
        values
            .iter()
            .map(|v| {
                if *v < lo || *v > hi {
                    match self.unbinned {
                        UnbinnedPolicy::ClampToNearest => Ok(band_for(v.clamp(lo, hi), &edges)),
                        UnbinnedPolicy::FailOnUnbinned => Err(ScoringError::data(format!(
                            "value {} lies outside bin range {}..{}",
                            v, lo, hi
                        ))),
                    }
                } else {
                    Ok(band_for(*v, &edges))
                }
            })
            .collect()
    }
}

/// Zero-based band: the number of edges strictly below the value
fn band_for(value: f64, edges: &[f64]) -> usize {
    edges.iter().filter(|e| value > **e).count()
}

fn mean_std_edges(values: &[f64]) -> Vec<f64> {
    let m = stats::mean(values);
    let sd = stats::sample_std(values);
    (0..CLASS_COUNT - 1).map(|k| m + k as f64 * sd).collect()
}

fn quantile_edges(values: &[f64], breakpoints: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    breakpoints
        .iter()
        .map(|q| stats::quantile_sorted(&sorted, *q))
        .collect()
}

fn equal_width_edges(lo: f64, hi: f64) -> Vec<f64> {
    let width = (hi - lo) / CLASS_COUNT as f64;
    (1..CLASS_COUNT).map(|k| lo + k as f64 * width).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(out: &[RiskClass]) -> Vec<u8> {
        out.iter().map(|c| c.get()).collect()
    }

    #[test]
    fn test_risk_class_bounds() {
        assert!(RiskClass::new(0).is_none());
        assert!(RiskClass::new(6).is_none());
        assert_eq!(RiskClass::new(3).unwrap().name(), "medium");
        assert!(serde_json::from_str::<RiskClass>("7").is_err());
        assert_eq!(serde_json::to_string(&RiskClass::HIGHEST).unwrap(), "5");
    }

    #[test]
    fn test_descending_labels() {
        assert_eq!(LabelOrder::Descending.label(0).get(), 5);
        assert_eq!(LabelOrder::Descending.label(4).get(), 1);
        assert_eq!(LabelOrder::Ascending.label(0).get(), 1);
    }

    #[test]
    fn test_mean_std_banding() {
        // mean 10, sample std 10
        let values = [0.0, 0.0, 10.0, 20.0, 20.0];
        let sd = stats::sample_std(&values);
        let probe = [10.0, 10.0 + sd * 0.5, 10.0 + sd * 1.5, 10.0 + sd * 2.5, 10.0 + sd * 3.5];
        let edges = mean_std_edges(&values);
        let bands: Vec<usize> = probe.iter().map(|v| band_for(*v, &edges)).collect();
        assert_eq!(bands, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_mean_std_value_at_mean_is_lowest_class() {
        let c = Classifier::new(BinningPolicy::MeanStd, LabelOrder::Ascending);
        let out = c.classify(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(classes(&out), vec![1, 1, 2]);
    }

    #[test]
    fn test_mean_std_descending_for_response() {
        let c = Classifier::new(BinningPolicy::MeanStd, LabelOrder::Descending);
        let out = c.classify(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(classes(&out), vec![5, 5, 4]);
    }

    #[test]
    fn test_single_member_cohort_gets_lowest_band() {
        let c = Classifier::new(BinningPolicy::MeanStd, LabelOrder::Ascending);
        assert_eq!(classes(&c.classify(&[42.0]).unwrap()), vec![1]);

        let q = Classifier::new(
            BinningPolicy::Quantile {
                breakpoints: vec![0.35, 0.6, 0.8, 0.95],
            },
            LabelOrder::Ascending,
        );
        assert_eq!(classes(&q.classify(&[42.0]).unwrap()), vec![1]);
    }

    #[test]
    fn test_quantile_banding_covers_all_classes() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        let c = Classifier::new(
            BinningPolicy::Quantile {
                breakpoints: vec![0.35, 0.6, 0.8, 0.95],
            },
            LabelOrder::Ascending,
        );
        let out = c.classify(&values).unwrap();
        assert_eq!(out[0].get(), 1);
        assert_eq!(out[99].get(), 5);
        let mut counts = [0usize; 5];
        for class in &out {
            counts[class.get() as usize - 1] += 1;
        }
        assert_eq!(counts, [35, 25, 20, 15, 5]);
    }

    #[test]
    fn test_equal_width_bins_observed_range() {
        let c = Classifier::new(
            BinningPolicy::EqualWidth {
                on_degenerate: DegenerateRange::MiddleClass,
            },
            LabelOrder::Ascending,
        );
        let out = c.classify(&[0.0, 0.2, 0.5, 0.81, 1.0]).unwrap();
        assert_eq!(classes(&out), vec![1, 1, 3, 5, 5]);
    }

    #[test]
    fn test_equal_width_degenerate_policies() {
        let middle = Classifier::new(
            BinningPolicy::EqualWidth {
                on_degenerate: DegenerateRange::MiddleClass,
            },
            LabelOrder::Ascending,
        );
        assert_eq!(classes(&middle.classify(&[2.0, 2.0]).unwrap()), vec![3, 3]);

        let span = Classifier::equal_width(1.0, 5.0);
        for k in 1..=5u8 {
            let out = span.classify(&[f64::from(k), f64::from(k)]).unwrap();
            assert_eq!(classes(&out), vec![k, k]);
        }

        let fail = Classifier::new(
            BinningPolicy::EqualWidth {
                on_degenerate: DegenerateRange::Fail,
            },
            LabelOrder::Ascending,
        );
        assert!(matches!(
            fail.classify(&[2.0]).unwrap_err(),
            ScoringError::DegenerateCohort(_)
        ));
    }

    #[test]
    fn test_unbinned_policy_on_fixed_span() {
        let strict = Classifier::new(
            BinningPolicy::EqualWidth {
                on_degenerate: DegenerateRange::FixedSpan { lo: 1.0, hi: 5.0 },
            },
            LabelOrder::Ascending,
        );
        assert!(strict.classify(&[9.0]).is_err());

        let clamped = strict.with_unbinned(UnbinnedPolicy::ClampToNearest);
        assert_eq!(classes(&clamped.classify(&[9.0]).unwrap()), vec![5]);
        assert_eq!(classes(&clamped.classify(&[-3.0]).unwrap()), vec![1]);
    }

    #[test]
    fn test_non_finite_rejected() {
        let c = Classifier::new(BinningPolicy::MeanStd, LabelOrder::Ascending);
        let err = c.classify(&[1.0, f64::NAN]).unwrap_err();
        assert!(matches!(err, ScoringError::DataIntegrity(_)));
    }

    #[test]
    fn test_quantile_validation() {
        let ok = BinningPolicy::Quantile {
            breakpoints: vec![0.35, 0.6, 0.8, 0.95],
        };
        assert!(ok.validate().is_ok());
        let short = BinningPolicy::Quantile {
            breakpoints: vec![0.5],
        };
        assert!(short.validate().is_err());
        let unordered = BinningPolicy::Quantile {
            breakpoints: vec![0.6, 0.35, 0.8, 0.95],
        };
        assert!(unordered.validate().is_err());
    }

    #[test]
    fn test_policy_json_shape() {
        let json = r#"{"binning": {"method": "quantile", "breakpoints": [0.35, 0.6, 0.8, 0.95]}, "labels": "descending"}"#;
        let c: Classifier = serde_json::from_str(json).unwrap();
        assert_eq!(c.labels, LabelOrder::Descending);
        assert_eq!(c.unbinned, UnbinnedPolicy::FailOnUnbinned);
        assert_eq!(c.binning.as_str(), "quantile");

        let json = r#"{"binning": {"method": "equal-width", "on_degenerate": {"mode": "fixed-span", "lo": 0.0, "hi": 1.0}}}"#;
        let c: Classifier = serde_json::from_str(json).unwrap();
        assert_eq!(
            c.binning,
            BinningPolicy::EqualWidth {
                on_degenerate: DegenerateRange::FixedSpan { lo: 0.0, hi: 1.0 }
            }
        );
    }
}
