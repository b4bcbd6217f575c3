//! Observations, datasets and cohorts
//!
//! Global invariants enforced:
//! - `(object_id, timeperiod)` is unique once `validate_keys` has passed
//! - Cohorts are formed per period in chronological order
//! - Rows are never mutated in place; derived columns produce a new dataset

use crate::error::{ScoringError, ScoringResult};
use crate::period::TimePeriod;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const OBJECT_ID_COLUMN: &str = "object_id";
pub const TIME_COLUMN: &str = "timeperiod";
pub const DISTRICT_COLUMN: &str = "district";
pub const FINANCIAL_YEAR_COLUMN: &str = "financial_year";

/// One row keyed by `(object_id, timeperiod)`
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub object_id: String,
    pub timeperiod: TimePeriod,
    pub district: Option<String>,
    pub values: BTreeMap<String, f64>,
}

impl Observation {
    pub fn new(object_id: impl Into<String>, timeperiod: TimePeriod) -> Self {
        Observation {
            object_id: object_id.into(),
            timeperiod,
            district: None,
            values: BTreeMap::new(),
        }
    }

    pub fn with_district(mut self, district: impl Into<String>) -> Self {
        self.district = Some(district.into());
        self
    }

    pub fn with_value(mut self, column: impl Into<String>, value: f64) -> Self {
        self.values.insert(column.into(), value);
        self
    }

    /// Finite value of a required column
    pub fn value(&self, column: &str) -> ScoringResult<f64> {
        match self.values.get(column) {
            Some(v) if v.is_finite() => Ok(*v),
            Some(v) => Err(ScoringError::data(format!(
                "non-finite value {} in column '{}' for ({}, {})",
                v, column, self.object_id, self.timeperiod
            ))),
            None => Err(ScoringError::data(format!(
                "missing column '{}' for ({}, {})",
                column, self.object_id, self.timeperiod
            ))),
        }
    }
}

/// District assignment keyed by object id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistrictLookup {
    by_object: HashMap<String, String>,
}

impl DistrictLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object; an object mapped to two districts is rejected
    pub fn insert(
        &mut self,
        district: impl Into<String>,
        object_id: impl Into<String>,
    ) -> ScoringResult<()> {
        let district = district.into();
        let object_id = object_id.into();
        if let Some(existing) = self.by_object.get(&object_id) {
            if *existing != district {
                return Err(ScoringError::data(format!(
                    "object '{}' mapped to both '{}' and '{}'",
                    object_id, existing, district
                )));
            }
        }
        self.by_object.insert(object_id, district);
        Ok(())
    }

    pub fn district_of(&self, object_id: &str) -> Option<&str> {
        self.by_object.get(object_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_object.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_object.is_empty()
    }
}

/// Fully materialized input table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    rows: Vec<Observation>,
}

impl Dataset {
    /// Wrap rows without validation; see [`Dataset::validate_keys`]
    pub fn from_rows(rows: Vec<Observation>) -> Self {
        Dataset { rows }
    }

    /// Wrap rows and reject duplicate keys
    pub fn new(rows: Vec<Observation>) -> ScoringResult<Self> {
        let dataset = Dataset::from_rows(rows);
        dataset.validate_keys()?;
        Ok(dataset)
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Duplicate `(object_id, timeperiod)` keys, in first-seen order
    pub fn duplicate_keys(&self) -> Vec<(String, TimePeriod)> {
        let mut seen = BTreeSet::new();
        let mut duplicates = Vec::new();
        for row in &self.rows {
            let key = (row.object_id.clone(), row.timeperiod);
            if !seen.insert(key.clone()) {
                duplicates.push(key);
            }
        }
        duplicates
    }

    pub fn validate_keys(&self) -> ScoringResult<()> {
        let duplicates = self.duplicate_keys();
        if let Some((object_id, period)) = duplicates.first() {
            return Err(ScoringError::data(format!(
                "{} duplicate (object_id, timeperiod) key(s), first: ({}, {})",
                duplicates.len(),
                object_id,
                period
            )));
        }
        Ok(())
    }

    /// Every listed column must be present on at least one row
    pub fn require_columns(&self, columns: &[String], what: &str) -> ScoringResult<()> {
        let present = self.column_names();
        let missing: Vec<&str> = columns
            .iter()
            .filter(|c| !present.contains(*c))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ScoringError::data(format!(
                "missing {} column(s): {}",
                what,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Every column name present on at least one row
    pub fn column_names(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|row| row.values.keys().cloned())
            .collect()
    }

    /// Fill missing districts from a lookup; rows already carrying one keep it
    pub fn assign_districts(&self, lookup: &DistrictLookup) -> Dataset {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                if row.district.is_none() {
                    row.district = lookup.district_of(&row.object_id).map(str::to_string);
                }
                row
            })
            .collect();
        Dataset { rows }
    }

    /// New dataset with extra columns; `derived[i]` belongs to `rows()[i]`
    pub fn with_derived(&self, derived: Vec<BTreeMap<String, f64>>) -> ScoringResult<Dataset> {
        if derived.len() != self.rows.len() {
            return Err(ScoringError::data(format!(
                "derived column batch has {} rows, dataset has {}",
                derived.len(),
                self.rows.len()
            )));
        }
        let rows = self
            .rows
            .iter()
            .zip(derived)
            .map(|(row, extra)| {
                let mut row = row.clone();
                row.values.extend(extra);
                row
            })
            .collect();
        Ok(Dataset { rows })
    }

    /// Group rows by period, chronologically
    pub fn cohorts(&self) -> Vec<Cohort<'_>> {
        let mut grouped: BTreeMap<TimePeriod, Vec<&Observation>> = BTreeMap::new();
        for row in &self.rows {
            grouped.entry(row.timeperiod).or_default().push(row);
        }
        grouped
            .into_iter()
            .map(|(timeperiod, rows)| Cohort { timeperiod, rows })
            .collect()
    }
}

/// All observations sharing one period
#[derive(Debug, Clone)]
pub struct Cohort<'a> {
    pub timeperiod: TimePeriod,
    pub rows: Vec<&'a Observation>,
}

impl<'a> Cohort<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column in row order
    pub fn column(&self, name: &str) -> ScoringResult<Vec<f64>> {
        self.rows.iter().map(|row| row.value(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(s: &str) -> TimePeriod {
        s.parse().unwrap()
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let rows = vec![
            Observation::new("A", period("2020_04")),
            Observation::new("B", period("2020_04")),
            Observation::new("A", period("2020_04")),
        ];
        let err = Dataset::new(rows).unwrap_err();
        assert!(matches!(err, ScoringError::DataIntegrity(_)));
        assert!(err.to_string().contains("(A, 2020_04)"));
    }

    #[test]
    fn test_require_columns_reports_missing() {
        let nan_row = Observation::new("A", period("2020_04")).with_value("rain", f64::NAN);
        let dataset = Dataset::new(vec![nan_row]).unwrap();
        // presence only; NaN cells fail their cohort later
        assert!(dataset.require_columns(&["rain".to_string()], "input").is_ok());

        let columns = ["rain".to_string(), "population".to_string(), "hhd".to_string()];
        let err = dataset.require_columns(&columns, "input").unwrap_err();
        assert!(matches!(err, ScoringError::DataIntegrity(_)));
        assert!(err.to_string().contains("missing input column(s): population, hhd"));
    }

    #[test]
    fn test_cohorts_are_chronological() {
        let rows = vec![
            Observation::new("A", period("2021_01")),
            Observation::new("A", period("2020_12")),
            Observation::new("B", period("2020_12")),
        ];
        let dataset = Dataset::new(rows).unwrap();
        let cohorts = dataset.cohorts();
        assert_eq!(cohorts.len(), 2);
        assert_eq!(cohorts[0].timeperiod, period("2020_12"));
        assert_eq!(cohorts[0].len(), 2);
        assert_eq!(cohorts[1].timeperiod, period("2021_01"));
    }

    #[test]
    fn test_with_derived_keeps_original_columns() {
        let dataset =
            Dataset::new(vec![Observation::new("A", period("2020_04")).with_value("x", 1.0)])
                .unwrap();
        let mut extra = BTreeMap::new();
        extra.insert("x_fy_cumsum".to_string(), 1.0);
        let derived = dataset.with_derived(vec![extra]).unwrap();

        assert_eq!(derived.rows()[0].value("x").unwrap(), 1.0);
        assert_eq!(derived.rows()[0].value("x_fy_cumsum").unwrap(), 1.0);
        assert!(!dataset.rows()[0].values.contains_key("x_fy_cumsum"));
    }

    #[test]
    fn test_assign_districts_from_lookup() {
        let mut lookup = DistrictLookup::new();
        lookup.insert("Cachar", "A").unwrap();
        let dataset = Dataset::new(vec![
            Observation::new("A", period("2020_04")),
            Observation::new("B", period("2020_04")).with_district("Dhubri"),
        ])
        .unwrap();

        let assigned = dataset.assign_districts(&lookup);
        assert_eq!(assigned.rows()[0].district.as_deref(), Some("Cachar"));
        assert_eq!(assigned.rows()[1].district.as_deref(), Some("Dhubri"));
    }

    #[test]
    fn test_lookup_rejects_conflicting_mapping() {
        let mut lookup = DistrictLookup::new();
        lookup.insert("Cachar", "A").unwrap();
        assert!(lookup.insert("Cachar", "A").is_ok());
        assert!(lookup.insert("Dhubri", "A").is_err());
    }
}
