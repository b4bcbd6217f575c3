//! Configuration file support for floodrisk
//!
//! Loads run configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.floodriskrc.json` in the working directory
//! 3. `floodrisk.config.json` in the working directory
//!
//! All fields are optional. Defaults reproduce the flood model's published
//! variable lists, breakpoints, weights and aggregation tables.

use crate::classify::{BinningPolicy, Classifier, LabelOrder};
use crate::error::{ScoringError, ScoringResult};
use crate::factors::{Combine, Factor, FactorSpec};
use crate::normalize::DegeneratePolicy;
use crate::period::DEFAULT_FY_START_MONTH;
use crate::rollup::{AggRule, RebinScope, RollupConfig};
use crate::topsis::{Criterion, Topsis};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const HAZARD_VARS: &[&str] = &[
    "inundation_intensity_mean_nonzero",
    "inundation_intensity_sum",
    "drainage_density",
    "mean_rain",
    "max_rain",
];

pub const EXPOSURE_VARS: &[&str] = &["sum_population", "total_hhd"];

pub const VULNERABILITY_VARS: &[&str] = &[
    "sum_aged_population",
    "sum_young_population",
    "rc_nosanitation_hhds_pct",
];

pub const GOVT_RESPONSE_VARS: &[&str] = &[
    "total_tender_awarded_value",
    "SDRF_sanctions_awarded_value",
    "SDRF_tenders_awarded_value",
];

/// Default hazard quantile breakpoints
pub const HAZARD_BREAKPOINTS: [f64; 4] = [0.35, 0.60, 0.80, 0.95];

/// Default TOPSIS weights in factor order
pub const DEFAULT_WEIGHTS: [f64; 4] = [4.0, 1.0, 2.0, 2.0];

/// Default member threshold for the data quality check
pub const DEFAULT_CHECK_MIN_MEMBERS: usize = 5;

const DEFAULT_AGGREGATION_RULES: &[(&str, AggRule)] = &[
    ("inundation_intensity_mean_nonzero", AggRule::Mean),
    ("inundation_intensity_sum", AggRule::Sum),
    ("drainage_density", AggRule::Mean),
    ("mean_rain", AggRule::Mean),
    ("max_rain", AggRule::Max),
    ("sum_rain", AggRule::Sum),
    ("sum_population", AggRule::Sum),
    ("total_hhd", AggRule::Sum),
    ("sum_aged_population", AggRule::Sum),
    ("sum_young_population", AggRule::Sum),
    ("rc_nosanitation_hhds_pct", AggRule::Mean),
    ("rc_piped_hhds_pct", AggRule::Mean),
    ("total_tender_awarded_value", AggRule::Sum),
    ("SDRF_sanctions_awarded_value", AggRule::First),
    ("SDRF_tenders_awarded_value", AggRule::Sum),
    ("total_tender_awarded_value_fy_cumsum", AggRule::Sum),
    ("SDRF_sanctions_awarded_value_fy_cumsum", AggRule::First),
    ("SDRF_tenders_awarded_value_fy_cumsum", AggRule::Sum),
    ("Preparedness Measures_tenders_awarded_value", AggRule::Sum),
    ("Immediate Measures_tenders_awarded_value", AggRule::Sum),
    ("Others_tenders_awarded_value", AggRule::Sum),
    ("Preparedness Measures_tenders_awarded_value_fy_cumsum", AggRule::Sum),
    ("Immediate Measures_tenders_awarded_value_fy_cumsum", AggRule::Sum),
    ("Others_tenders_awarded_value_fy_cumsum", AggRule::Sum),
    ("riverlevel_max", AggRule::Max),
    ("riverlevel_min", AggRule::Min),
    ("riverlevel_mean", AggRule::Mean),
];

const DEFAULT_ROUNDING_RULES: &[(&str, u32)] = &[
    ("inundation_intensity_mean_nonzero", 2),
    ("inundation_intensity_sum", 2),
    ("max_rain", 2),
    ("mean_rain", 2),
    ("sum_rain", 2),
    ("rc_nosanitation_hhds_pct", 2),
    ("rc_piped_hhds_pct", 2),
    ("sum_population", 0),
    ("sum_aged_population", 0),
    ("sum_young_population", 0),
];

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// floodrisk configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FloodRiskConfig {
    /// Per-factor overrides, keyed by factor name
    #[serde(default)]
    pub factors: BTreeMap<Factor, FactorConfig>,

    /// TOPSIS weights in factor order (default: [4, 1, 2, 2])
    #[serde(default)]
    pub weights: Option<Vec<f64>>,

    /// TOPSIS polarity per factor (default: all more-is-worse)
    #[serde(default)]
    pub criteria: Option<Vec<Criterion>>,

    /// Flow indicators given a financial-year running total
    #[serde(default)]
    pub cumulative_vars: Option<Vec<String>>,

    /// Handling of columns constant within a cohort (default: map-to-zero)
    #[serde(default)]
    pub degenerate_columns: Option<DegeneratePolicy>,

    /// Smallest cohort that may be scored (default: 1)
    #[serde(default)]
    pub min_cohort_size: Option<usize>,

    /// First month of the financial year (default: 4)
    #[serde(default)]
    pub financial_year_start_month: Option<u32>,

    /// District roll-up settings
    #[serde(default)]
    pub district: Option<DistrictConfig>,

    /// Decimal places per indicator column on output
    #[serde(default)]
    pub rounding_rules: Option<BTreeMap<String, u32>>,

    /// Minimum members per period for `floodrisk check` (default: 5)
    #[serde(default)]
    pub check_min_members: Option<usize>,

    /// Maximum number of ranked rows to show per period
    #[serde(default)]
    pub top: Option<usize>,
}

/// Overrides for one factor; unset fields keep the factor's defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactorConfig {
    pub inputs: Option<Vec<String>>,
    pub combine: Option<Combine>,
    pub classifier: Option<Classifier>,
    pub cumulative: Option<bool>,
    pub emit_float: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistrictConfig {
    /// Indicator columns carried into the output tables
    pub indicators: Option<Vec<String>>,
    /// Rules merged over the defaults
    pub aggregation_rules: Option<BTreeMap<String, AggRule>>,
    pub rebin_scope: Option<RebinScope>,
}

/// Resolved configuration, typed and validated
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Factor recipes in [`Factor::ALL`] order
    pub factors: Vec<FactorSpec>,
    pub topsis: Topsis,
    /// Binning of composite scores into risk classes
    pub risk_classifier: Classifier,
    pub cumulative_vars: Vec<String>,
    pub degenerate: DegeneratePolicy,
    pub min_cohort_size: usize,
    pub fy_start_month: u32,
    pub rollup: RollupConfig,
    pub rounding: BTreeMap<String, u32>,
    pub check_min_members: usize,
    pub top_n: Option<usize>,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

/// Default recipe for a factor
pub fn default_factor_spec(factor: Factor) -> FactorSpec {
    match factor {
        Factor::Hazard => FactorSpec {
            factor,
            inputs: owned(HAZARD_VARS),
            combine: Combine::LogStandardizedMean,
            classifier: Classifier::new(
                BinningPolicy::Quantile {
                    breakpoints: HAZARD_BREAKPOINTS.to_vec(),
                },
                LabelOrder::Ascending,
            ),
            cumulative: false,
            emit_float: true,
        },
        Factor::Exposure => FactorSpec {
            factor,
            inputs: owned(EXPOSURE_VARS),
            combine: Combine::Sum,
            classifier: Classifier::new(BinningPolicy::MeanStd, LabelOrder::Ascending),
            cumulative: false,
            emit_float: false,
        },
        Factor::Vulnerability => FactorSpec {
            factor,
            inputs: owned(VULNERABILITY_VARS),
            combine: Combine::Sum,
            classifier: Classifier::new(BinningPolicy::MeanStd, LabelOrder::Ascending),
            cumulative: false,
            emit_float: false,
        },
        // higher spending means lower risk
        Factor::GovernmentResponse => FactorSpec {
            factor,
            inputs: owned(GOVT_RESPONSE_VARS),
            combine: Combine::Sum,
            classifier: Classifier::new(BinningPolicy::MeanStd, LabelOrder::Descending),
            cumulative: true,
            emit_float: false,
        },
    }
}

fn default_indicators(specs: &[FactorSpec], cumulative_vars: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let raw = specs.iter().flat_map(|s| s.inputs.iter().cloned());
    let cumsums = cumulative_vars
        .iter()
        .map(|v| crate::cumulate::cumsum_column_name(v));
    for column in raw.chain(cumulative_vars.iter().cloned()).chain(cumsums) {
        if seen.insert(column.clone()) {
            out.push(column);
        }
    }
    out
}

impl FloodRiskConfig {
    fn factor_specs(&self) -> Vec<FactorSpec> {
        Factor::ALL
            .iter()
            .map(|factor| {
                let mut spec = default_factor_spec(*factor);
                if let Some(o) = self.factors.get(factor) {
                    if let Some(ref inputs) = o.inputs {
                        spec.inputs = inputs.clone();
                    }
                    if let Some(combine) = o.combine {
                        spec.combine = combine;
                    }
                    if let Some(ref classifier) = o.classifier {
                        spec.classifier = classifier.clone();
                    }
                    if let Some(cumulative) = o.cumulative {
                        spec.cumulative = cumulative;
                    }
                    if let Some(emit_float) = o.emit_float {
                        spec.emit_float = emit_float;
                    }
                }
                spec
            })
            .collect()
    }

    fn cumulative_vars(&self) -> Vec<String> {
        self.cumulative_vars
            .clone()
            .unwrap_or_else(|| owned(GOVT_RESPONSE_VARS))
    }

    /// Validate the configuration for logical errors
    pub fn validate(&self) -> ScoringResult<()> {
        self.resolve_inner().map(|_| ())
    }

    /// Resolve config into typed form ready for use
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        Ok(self.resolve_inner()?)
    }

    fn resolve_inner(&self) -> ScoringResult<ResolvedConfig> {
        let factors = self.factor_specs();
        let cumulative_vars = self.cumulative_vars();

        for spec in &factors {
            if spec.inputs.is_empty() {
                return Err(ScoringError::config(format!(
                    "factors.{}.inputs must not be empty",
                    spec.factor
                )));
            }
            if let Err(e) = spec.classifier.binning.validate() {
                return Err(ScoringError::config(format!(
                    "factors.{}: {}",
                    spec.factor,
                    e.detail()
                )));
            }
            if spec.cumulative {
                if let Some(missing) = spec.inputs.iter().find(|i| !cumulative_vars.contains(i)) {
                    return Err(ScoringError::config(format!(
                        "factors.{} reads the running total of '{}', which is not in cumulative_vars",
                        spec.factor, missing
                    )));
                }
            }
        }

        let weights = self.weights.clone().unwrap_or_else(|| DEFAULT_WEIGHTS.to_vec());
        if weights.len() != Factor::ALL.len() {
            return Err(ScoringError::config(format!(
                "weights has {} entries, expected {} (hazard, exposure, vulnerability, government-response)",
                weights.len(),
                Factor::ALL.len()
            )));
        }
        let criteria = self
            .criteria
            .clone()
            .unwrap_or_else(|| vec![Criterion::MoreIsWorse; Factor::ALL.len()]);
        if criteria.len() != Factor::ALL.len() {
            return Err(ScoringError::config(format!(
                "criteria has {} entries, expected {}",
                criteria.len(),
                Factor::ALL.len()
            )));
        }
        let topsis = Topsis::new(weights, criteria)?;

        let min_cohort_size = self.min_cohort_size.unwrap_or(1);
        if min_cohort_size == 0 {
            return Err(ScoringError::config("min_cohort_size must be at least 1"));
        }

        let fy_start_month = self
            .financial_year_start_month
            .unwrap_or(DEFAULT_FY_START_MONTH);
        if !(1..=12).contains(&fy_start_month) {
            return Err(ScoringError::config(format!(
                "financial_year_start_month must be 1-12 (got {})",
                fy_start_month
            )));
        }

        let district = self.district.clone().unwrap_or_default();
        let indicators = district
            .indicators
            .unwrap_or_else(|| default_indicators(&factors, &cumulative_vars));
        let mut rules: BTreeMap<String, AggRule> = DEFAULT_AGGREGATION_RULES
            .iter()
            .map(|(c, r)| (c.to_string(), *r))
            .collect();
        if let Some(custom) = district.aggregation_rules {
            rules.extend(custom);
        }
        let rollup = RollupConfig {
            indicators,
            rules,
            rebin_scope: district.rebin_scope.unwrap_or_default(),
            classifier: Classifier::equal_width(1.0, 5.0),
        };
        rollup.validate()?;

        let declared: BTreeSet<&String> = rollup.indicators.iter().collect();
        let rounding = match &self.rounding_rules {
            Some(custom) => {
                if let Some(column) = custom.keys().find(|c| !declared.contains(c)) {
                    return Err(ScoringError::config(format!(
                        "rounding rule for '{}', which is not a declared indicator",
                        column
                    )));
                }
                custom.clone()
            }
            None => DEFAULT_ROUNDING_RULES
                .iter()
                .filter(|(c, _)| declared.contains(&c.to_string()))
                .map(|(c, d)| (c.to_string(), *d))
                .collect(),
        };

        let check_min_members = self
            .check_min_members
            .unwrap_or(DEFAULT_CHECK_MIN_MEMBERS);

        Ok(ResolvedConfig {
            factors,
            topsis,
            risk_classifier: Classifier::equal_width(0.0, 1.0),
            cumulative_vars,
            degenerate: self.degenerate_columns.unwrap_or_default(),
            min_cohort_size,
            fy_start_month,
            rollup,
            rounding,
            check_min_members,
            top_n: self.top,
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        FloodRiskConfig::default().resolve()
    }

    /// Every raw column the scorers read
    pub fn required_columns(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.factors
            .iter()
            .flat_map(|s| s.inputs.iter())
            .chain(self.cumulative_vars.iter())
            .filter(|c| seen.insert(c.to_string()))
            .cloned()
            .collect()
    }

    pub fn spec(&self, factor: Factor) -> Option<&FactorSpec> {
        self.factors.iter().find(|s| s.factor == factor)
    }
}

/// Discover and load a config file from the working directory
///
/// Search order:
/// 1. `.floodriskrc.json`
/// 2. `floodrisk.config.json`
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(root: &Path) -> Result<Option<(FloodRiskConfig, PathBuf)>> {
    for name in [".floodriskrc.json", "floodrisk.config.json"] {
        let path = root.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<FloodRiskConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: FloodRiskConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config in `root`.
/// Returns default config if nothing is found.
pub fn load_and_resolve(root: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(root)? {
            Some((config, path)) => (config, Some(path)),
            None => (FloodRiskConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}
