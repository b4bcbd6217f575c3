//! floodrisk core library - flood-risk scoring for sub-district units

// Global invariants enforced in this crate:
// - Normalization and classification are strictly per period (cohort)
// - No global mutable state; stages return new values
// - Every scored object carries exactly one class in 1..=5 per factor
// - Cohorts may run in parallel; results are merged in period order
// - Identical input yields byte-for-byte identical output

pub mod classify;
pub mod config;
pub mod cumulate;
pub mod error;
pub mod factors;
pub mod io;
pub mod normalize;
pub mod period;
pub mod pipeline;
pub mod quality;
pub mod report;
pub mod rollup;
pub mod stats;
pub mod summary;
pub mod table;
pub mod topsis;

pub use config::ResolvedConfig;
pub use error::{ScoringError, ScoringResult};
pub use pipeline::{run, CohortFailure, ObjectRow, PipelineOutput};
pub use report::{render_json, render_text, sort_objects};

use anyhow::{Context, Result};
use std::path::Path;

/// Load an input table (and optional district lookup) and score it
pub fn score_files(
    input: &Path,
    districts: Option<&Path>,
    config: &ResolvedConfig,
    progress: &(dyn Fn() + Sync),
) -> Result<PipelineOutput> {
    let dataset = io::load_dataset(input)?;
    let lookup = districts.map(io::load_district_lookup).transpose()?;
    let output = pipeline::run(&dataset, lookup.as_ref(), config, progress)
        .with_context(|| format!("failed to score {}", input.display()))?;
    Ok(output)
}

/// Run the data quality check on an input table
pub fn check_file(input: &Path, config: &ResolvedConfig) -> Result<quality::QualityReport> {
    let dataset = io::load_dataset(input)?;
    let mut columns = config.required_columns();
    for indicator in &config.rollup.indicators {
        let is_derived = indicator.ends_with(cumulate::FY_CUMSUM_SUFFIX);
        if !is_derived && !columns.contains(indicator) {
            columns.push(indicator.clone());
        }
    }
    Ok(quality::check_dataset(
        &dataset,
        &columns,
        config.check_min_members,
    ))
}
