//! Financial-year cumulation of flow indicators
//!
//! Global invariants enforced:
//! - Cumulation restarts at the first month of every financial year
//! - Each object's series is summed in chronological order, never across objects
//! - Source columns are preserved; running totals land in `<var>_fy_cumsum`

use crate::error::{ScoringError, ScoringResult};
use crate::period::{FinancialYear, TimePeriod};
use crate::table::Dataset;
use std::collections::BTreeMap;

pub const FY_CUMSUM_SUFFIX: &str = "_fy_cumsum";

pub fn cumsum_column_name(var: &str) -> String {
    format!("{}{}", var, FY_CUMSUM_SUFFIX)
}

/// Add a running financial-year total for each listed variable
///
/// For object `o` in period `t`, the new column holds the sum of `var` over
/// every period `t' <= t` of `o` that belongs to the same financial year.
pub fn financial_year_cumsum(
    dataset: &Dataset,
    vars: &[String],
    fy_start_month: u32,
) -> ScoringResult<Dataset> {
    if !(1..=12).contains(&fy_start_month) {
        return Err(ScoringError::config(format!(
            "financial year start month must be 1-12 (got {})",
            fy_start_month
        )));
    }
    if vars.is_empty() {
        return Ok(dataset.clone());
    }

    // (object, fy) -> row indices sorted by period
    let mut groups: BTreeMap<(&str, FinancialYear), Vec<(TimePeriod, usize)>> = BTreeMap::new();
    for (idx, row) in dataset.rows().iter().enumerate() {
        let fy = row.timeperiod.financial_year(fy_start_month);
        groups
            .entry((row.object_id.as_str(), fy))
            .or_default()
            .push((row.timeperiod, idx));
    }

    let mut derived: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new(); dataset.len()];
    let rows = dataset.rows();

    for members in groups.values_mut() {
        members.sort_by_key(|(period, _)| *period);
        for var in vars {
            let target = cumsum_column_name(var);
            let mut running = 0.0;
            for (_, idx) in members.iter() {
                running += rows[*idx].value(var)?;
                derived[*idx].insert(target.clone(), running);
            }
        }
    }

    dataset.with_derived(derived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Observation;

    fn obs(id: &str, period: &str, value: f64) -> Observation {
        Observation::new(id, period.parse().unwrap()).with_value("tenders", value)
    }

    fn cumsum_of(dataset: &Dataset, id: &str, period: &str) -> f64 {
        let period: TimePeriod = period.parse().unwrap();
        dataset
            .rows()
            .iter()
            .find(|r| r.object_id == id && r.timeperiod == period)
            .unwrap()
            .value("tenders_fy_cumsum")
            .unwrap()
    }

    #[test]
    fn test_running_total_within_financial_year() {
        let data = Dataset::new(vec![
            obs("X", "2020_06", 10.0),
            obs("X", "2020_04", 10.0),
            obs("X", "2020_05", 10.0),
            obs("X", "2020_07", 10.0),
        ])
        .unwrap();
        let out = financial_year_cumsum(&data, &["tenders".to_string()], 4).unwrap();

        assert_eq!(cumsum_of(&out, "X", "2020_04"), 10.0);
        assert_eq!(cumsum_of(&out, "X", "2020_05"), 20.0);
        assert_eq!(cumsum_of(&out, "X", "2020_06"), 30.0);
        assert_eq!(cumsum_of(&out, "X", "2020_07"), 40.0);
    }

    #[test]
    fn test_resets_at_financial_year_start() {
        let data = Dataset::new(vec![
            obs("X", "2021_02", 5.0),
            obs("X", "2021_03", 5.0),
            obs("X", "2021_04", 7.0),
            obs("X", "2021_05", 1.0),
        ])
        .unwrap();
        let out = financial_year_cumsum(&data, &["tenders".to_string()], 4).unwrap();

        assert_eq!(cumsum_of(&out, "X", "2021_03"), 10.0);
        assert_eq!(cumsum_of(&out, "X", "2021_04"), 7.0);
        assert_eq!(cumsum_of(&out, "X", "2021_05"), 8.0);
    }

    #[test]
    fn test_objects_are_independent() {
        let data = Dataset::new(vec![
            obs("X", "2020_04", 1.0),
            obs("Y", "2020_04", 100.0),
            obs("X", "2020_05", 1.0),
            obs("Y", "2020_05", 100.0),
        ])
        .unwrap();
        let out = financial_year_cumsum(&data, &["tenders".to_string()], 4).unwrap();

        assert_eq!(cumsum_of(&out, "X", "2020_05"), 2.0);
        assert_eq!(cumsum_of(&out, "Y", "2020_05"), 200.0);
        // original column untouched
        assert_eq!(out.rows()[0].value("tenders").unwrap(), 1.0);
    }

    #[test]
    fn test_missing_months_do_not_break_the_series() {
        let data = Dataset::new(vec![obs("X", "2020_04", 3.0), obs("X", "2020_09", 4.0)]).unwrap();
        let out = financial_year_cumsum(&data, &["tenders".to_string()], 4).unwrap();
        assert_eq!(cumsum_of(&out, "X", "2020_09"), 7.0);
    }

    #[test]
    fn test_nan_source_is_rejected() {
        let data = Dataset::new(vec![obs("X", "2020_04", f64::NAN)]).unwrap();
        let err = financial_year_cumsum(&data, &["tenders".to_string()], 4).unwrap_err();
        assert!(matches!(err, ScoringError::DataIntegrity(_)));
    }

    #[test]
    fn test_invalid_start_month() {
        let data = Dataset::default();
        assert!(financial_year_cumsum(&data, &["tenders".to_string()], 13).is_err());
    }
}
