//! End-to-end scoring run
//!
//! Global invariants enforced:
//! - Stages pass new values downstream; the input dataset is never mutated
//! - A failed cohort is reported on its own and never touches other cohorts
//! - Cohort results are keyed by period, so output order does not depend on
//!   thread scheduling

use crate::classify::RiskClass;
use crate::config::ResolvedConfig;
use crate::cumulate::financial_year_cumsum;
use crate::error::{ScoringError, ScoringResult};
use crate::factors::{score_cohort_factors, CohortFactors, Factor, FactorScore};
use crate::period::{FinancialYear, TimePeriod};
use crate::rollup::{roll_up, DistrictRow};
use crate::summary::{summarize, ClassDistribution};
use crate::table::{Cohort, Dataset, DistrictLookup};
use crate::topsis::{rank_cohort, CompositeScore};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Fully scored object for one period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectRow {
    pub object_id: String,
    pub timeperiod: TimePeriod,
    pub district: Option<String>,
    pub financial_year: FinancialYear,
    pub factors: BTreeMap<Factor, RiskClass>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub floats: BTreeMap<Factor, f64>,
    pub topsis_score: f64,
    pub risk_class: RiskClass,
    pub rank: usize,
    pub indicators: BTreeMap<String, f64>,
}

/// A cohort whose scoring was aborted
#[derive(Debug, Clone, PartialEq)]
pub struct CohortFailure {
    pub timeperiod: TimePeriod,
    pub members: usize,
    pub error: ScoringError,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub factor_scores: BTreeMap<Factor, Vec<FactorScore>>,
    /// Sorted by period, then object id
    pub objects: Vec<ObjectRow>,
    pub districts: Vec<DistrictRow>,
    pub failures: Vec<CohortFailure>,
    pub distributions: Vec<ClassDistribution>,
}

impl PipelineOutput {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

struct ScoredCohort {
    factors: CohortFactors,
    composite: Vec<CompositeScore>,
}

fn score_cohort(cohort: &Cohort<'_>, config: &ResolvedConfig) -> ScoringResult<ScoredCohort> {
    if cohort.len() < config.min_cohort_size {
        return Err(ScoringError::degenerate(format!(
            "{} has {} member(s), at least {} required",
            cohort.timeperiod,
            cohort.len(),
            config.min_cohort_size
        )));
    }
    for indicator in &config.rollup.indicators {
        cohort.column(indicator)?;
    }
    let factors = score_cohort_factors(cohort, &config.factors, config.degenerate)?;
    let composite = rank_cohort(&factors, &config.topsis, &config.risk_classifier)?;
    Ok(ScoredCohort { factors, composite })
}

/// Score a dataset
///
/// `progress` is called once per finished cohort.
pub fn run(
    dataset: &Dataset,
    lookup: Option<&DistrictLookup>,
    config: &ResolvedConfig,
    progress: &(dyn Fn() + Sync),
) -> ScoringResult<PipelineOutput> {
    if dataset.is_empty() {
        return Err(ScoringError::data("input has no rows"));
    }
    dataset.validate_keys()?;
    dataset.require_columns(&config.required_columns(), "input")?;

    let dataset = match lookup {
        Some(lookup) => dataset.assign_districts(lookup),
        None => dataset.clone(),
    };
    let dataset = financial_year_cumsum(&dataset, &config.cumulative_vars, config.fy_start_month)?;
    dataset.require_columns(&config.rollup.indicators, "indicator")?;
    let cohorts = dataset.cohorts();
    info!(
        rows = dataset.len(),
        cohorts = cohorts.len(),
        "scoring dataset"
    );

    let results: BTreeMap<TimePeriod, (usize, ScoringResult<ScoredCohort>)> = cohorts
        .par_iter()
        .map(|cohort| {
            let result = score_cohort(cohort, config);
            progress();
            (cohort.timeperiod, (cohort.len(), result))
        })
        .collect();

    let by_period: BTreeMap<TimePeriod, &Cohort<'_>> =
        cohorts.iter().map(|c| (c.timeperiod, c)).collect();

    let mut output = PipelineOutput::default();
    for (timeperiod, (members, result)) in results {
        let scored = match result {
            Ok(scored) => scored,
            Err(error) => {
                warn!(period = %timeperiod, kind = error.kind(), "cohort failed: {}", error.detail());
                output.failures.push(CohortFailure {
                    timeperiod,
                    members,
                    error,
                });
                continue;
            }
        };
        debug!(period = %timeperiod, members, "cohort scored");

        let Some(cohort) = by_period.get(&timeperiod) else {
            continue;
        };
        for spec in &config.factors {
            output
                .factor_scores
                .entry(spec.factor)
                .or_default()
                .extend(scored.factors.records(spec.factor)?);
        }
        output
            .objects
            .extend(object_rows(cohort, &scored, config));
    }

    output.objects.sort_by(|a, b| {
        a.timeperiod
            .cmp(&b.timeperiod)
            .then_with(|| a.object_id.cmp(&b.object_id))
    });

    if output.objects.iter().any(|o| o.district.is_some()) {
        output.districts = roll_up(&output.objects, &config.rollup)?;
    } else if !output.objects.is_empty() {
        warn!("no district assignments found, skipping district roll-up");
    }

    output.distributions = summarize(&output.objects);
    for distribution in &output.distributions {
        for failed in distribution.failed_checks() {
            warn!(
                column = distribution.column.as_str(),
                "class distribution check failed: {}",
                failed
            );
        }
    }

    info!(
        objects = output.objects.len(),
        districts = output.districts.len(),
        failed_cohorts = output.failures.len(),
        "scoring finished"
    );
    Ok(output)
}

fn object_rows(cohort: &Cohort<'_>, scored: &ScoredCohort, config: &ResolvedConfig) -> Vec<ObjectRow> {
    cohort
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut factors = BTreeMap::new();
            let mut floats = BTreeMap::new();
            for (factor, column) in &scored.factors.columns {
                factors.insert(*factor, column.classes[i]);
                if let Some(values) = &column.floats {
                    floats.insert(*factor, values[i]);
                }
            }
            let indicators = config
                .rollup
                .indicators
                .iter()
                .filter_map(|c| row.values.get(c).map(|v| (c.clone(), *v)))
                .collect();
            let composite = &scored.composite[i];
            ObjectRow {
                object_id: row.object_id.clone(),
                timeperiod: row.timeperiod,
                district: row.district.clone(),
                financial_year: row.timeperiod.financial_year(config.fy_start_month),
                factors,
                floats,
                topsis_score: composite.topsis_score,
                risk_class: composite.risk_class,
                rank: composite.rank,
                indicators,
            }
        })
        .collect()
}
