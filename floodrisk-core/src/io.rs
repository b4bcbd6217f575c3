//! Flat-file input and output
//!
//! Global invariants enforced:
//! - Output headers are kebab-case (lower-case, `_` and spaces become `-`)
//! - Rows are written in the order given; callers sort first
//! - Rounding rules apply to indicator columns only, never to scores

use crate::factors::{Factor, FactorScore};
use crate::period::TimePeriod;
use crate::pipeline::ObjectRow;
use crate::rollup::DistrictRow;
use crate::table::{
    Dataset, DistrictLookup, Observation, DISTRICT_COLUMN, FINANCIAL_YEAR_COLUMN, OBJECT_ID_COLUMN,
    TIME_COLUMN,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const FACTOR_SCORES_PREFIX: &str = "factor_scores_";
pub const RISK_SCORE_FILE: &str = "risk_score.csv";
pub const DISTRICT_FILE: &str = "risk_score_district.csv";

/// Lower-case with `_` and spaces mapped to `-`
pub fn kebab_case(name: &str) -> String {
    name.to_lowercase().replace(['_', ' '], "-")
}

/// Parse a numeric cell; empty or malformed cells become NaN
fn parse_cell(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// Read observations from CSV text
///
/// `object_id` and `timeperiod` are required; `district` is optional.
/// Every other column is numeric.
pub fn read_dataset<R: Read>(reader: R) -> Result<Dataset> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = csv.headers().context("failed to read CSV header")?.clone();

    let position = |name: &str| headers.iter().position(|h| h == name);
    let id_idx = position(OBJECT_ID_COLUMN)
        .with_context(|| format!("missing required column '{}'", OBJECT_ID_COLUMN))?;
    let time_idx = position(TIME_COLUMN)
        .with_context(|| format!("missing required column '{}'", TIME_COLUMN))?;
    let district_idx = position(DISTRICT_COLUMN);

    let mut rows = Vec::new();
    for (line, record) in csv.records().enumerate() {
        let record = record.with_context(|| format!("malformed CSV record {}", line + 1))?;
        let object_id = record.get(id_idx).unwrap_or_default().trim().to_string();
        let timeperiod: TimePeriod = record
            .get(time_idx)
            .unwrap_or_default()
            .parse()
            .with_context(|| format!("record {} (object '{}')", line + 1, object_id))?;

        let mut observation = Observation::new(object_id, timeperiod);
        if let Some(d) = district_idx.and_then(|i| record.get(i)) {
            let d = d.trim();
            if !d.is_empty() {
                observation = observation.with_district(d);
            }
        }
        for (i, header) in headers.iter().enumerate() {
            if i == id_idx || i == time_idx || Some(i) == district_idx {
                continue;
            }
            let value = record.get(i).map(parse_cell).unwrap_or(f64::NAN);
            observation.values.insert(header.to_string(), value);
        }
        rows.push(observation);
    }

    Ok(Dataset::from_rows(rows))
}

/// Load observations from a CSV file (keys are not validated here)
pub fn load_dataset(path: &Path) -> Result<Dataset> {
    let file =
        File::open(path).with_context(|| format!("failed to open input: {}", path.display()))?;
    read_dataset(file).with_context(|| format!("failed to read input: {}", path.display()))
}

#[derive(Debug, Deserialize)]
struct LookupRecord {
    district: String,
    object_id: String,
}

pub fn read_district_lookup<R: Read>(reader: R) -> Result<DistrictLookup> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut lookup = DistrictLookup::new();
    for record in csv.deserialize() {
        let record: LookupRecord = record.context("malformed district lookup record")?;
        lookup.insert(record.district, record.object_id)?;
    }
    Ok(lookup)
}

pub fn load_district_lookup(path: &Path) -> Result<DistrictLookup> {
    let file = File::open(path)
        .with_context(|| format!("failed to open district lookup: {}", path.display()))?;
    read_district_lookup(file)
        .with_context(|| format!("failed to read district lookup: {}", path.display()))
}

fn format_value(value: f64, decimals: Option<u32>) -> String {
    if !value.is_finite() {
        return String::new();
    }
    match decimals {
        Some(d) => format!("{:.*}", d as usize, value),
        None => value.to_string(),
    }
}

fn indicator_cells(
    indicators: &BTreeMap<String, f64>,
    columns: &[String],
    rounding: &BTreeMap<String, u32>,
) -> Vec<String> {
    columns
        .iter()
        .map(|c| {
            indicators
                .get(c)
                .map(|v| format_value(*v, rounding.get(c).copied()))
                .unwrap_or_default()
        })
        .collect()
}

/// Write one per-factor score table
pub fn write_factor_scores<W: Write>(
    writer: W,
    factor: Factor,
    emit_float: bool,
    records: &[FactorScore],
) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    let mut header = vec![
        kebab_case(OBJECT_ID_COLUMN),
        TIME_COLUMN.to_string(),
        factor.column_name().to_string(),
    ];
    if emit_float {
        header.push(factor.float_column_name());
    }
    csv.write_record(&header)?;

    for r in records {
        let mut record = vec![r.object_id.clone(), r.timeperiod.to_string(), r.class.to_string()];
        if emit_float {
            record.push(r.float.map(|f| f.to_string()).unwrap_or_default());
        }
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the composite risk table
pub fn write_objects<W: Write>(
    writer: W,
    rows: &[ObjectRow],
    float_factors: &[Factor],
    indicators: &[String],
    rounding: &BTreeMap<String, u32>,
) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    let mut header = vec![
        kebab_case(OBJECT_ID_COLUMN),
        TIME_COLUMN.to_string(),
        DISTRICT_COLUMN.to_string(),
        kebab_case(FINANCIAL_YEAR_COLUMN),
    ];
    header.extend(Factor::ALL.iter().map(|f| f.column_name().to_string()));
    header.extend(float_factors.iter().map(|f| f.float_column_name()));
    header.extend(["topsis-score", "risk-score", "rank"].map(String::from));
    header.extend(indicators.iter().map(|c| kebab_case(c)));
    csv.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.object_id.clone(),
            row.timeperiod.to_string(),
            row.district.clone().unwrap_or_default(),
            row.financial_year.to_string(),
        ];
        record.extend(Factor::ALL.iter().map(|f| {
            row.factors
                .get(f)
                .map(|c| c.to_string())
                .unwrap_or_default()
        }));
        record.extend(float_factors.iter().map(|f| {
            row.floats
                .get(f)
                .map(|v| v.to_string())
                .unwrap_or_default()
        }));
        record.push(row.topsis_score.to_string());
        record.push(row.risk_class.to_string());
        record.push(row.rank.to_string());
        record.extend(indicator_cells(&row.indicators, indicators, rounding));
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the district table
pub fn write_districts<W: Write>(
    writer: W,
    rows: &[DistrictRow],
    indicators: &[String],
    rounding: &BTreeMap<String, u32>,
) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    let mut header = vec![
        DISTRICT_COLUMN.to_string(),
        TIME_COLUMN.to_string(),
        "members".to_string(),
    ];
    header.extend(Factor::ALL.iter().map(|f| f.column_name().to_string()));
    header.extend(["risk-score", "topsis-score"].map(String::from));
    header.extend(indicators.iter().map(|c| kebab_case(c)));
    csv.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.district.clone(),
            row.timeperiod.to_string(),
            row.members.to_string(),
        ];
        record.extend(Factor::ALL.iter().map(|f| {
            row.factors
                .get(f)
                .map(|c| c.to_string())
                .unwrap_or_default()
        }));
        record.push(row.risk_class.to_string());
        record.push(row.topsis_score.to_string());
        record.extend(indicator_cells(&row.indicators, indicators, rounding));
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

fn create(dir: &Path, name: &str) -> Result<(File, PathBuf)> {
    let path = dir.join(name);
    let file =
        File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok((file, path))
}

/// File name of a per-factor table
pub fn factor_file_name(factor: Factor) -> String {
    format!("{}{}.csv", FACTOR_SCORES_PREFIX, factor.column_name())
}

/// Write every output table into `dir`, returning the paths written
pub fn write_outputs(
    dir: &Path,
    output: &crate::pipeline::PipelineOutput,
    config: &crate::config::ResolvedConfig,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory: {}", dir.display()))?;
    let mut written = Vec::new();

    for spec in &config.factors {
        let records = output
            .factor_scores
            .get(&spec.factor)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let (file, path) = create(dir, &factor_file_name(spec.factor))?;
        write_factor_scores(file, spec.factor, spec.emit_float, records)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }

    let float_factors: Vec<Factor> = config
        .factors
        .iter()
        .filter(|s| s.emit_float)
        .map(|s| s.factor)
        .collect();
    let indicators = &config.rollup.indicators;

    let (file, path) = create(dir, RISK_SCORE_FILE)?;
    write_objects(file, &output.objects, &float_factors, indicators, &config.rounding)
        .with_context(|| format!("failed to write {}", path.display()))?;
    written.push(path);

    if !output.districts.is_empty() {
        let (file, path) = create(dir, DISTRICT_FILE)?;
        write_districts(file, &output.districts, indicators, &config.rounding)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RiskClass;

    #[test]
    fn test_kebab_case() {
        assert_eq!(kebab_case("SDRF_sanctions_awarded_value"), "sdrf-sanctions-awarded-value");
        assert_eq!(
            kebab_case("Preparedness Measures_tenders_awarded_value_fy_cumsum"),
            "preparedness-measures-tenders-awarded-value-fy-cumsum"
        );
    }

    #[test]
    fn test_read_dataset_parses_numbers_and_blanks() {
        let text = "object_id,timeperiod,district,sum_population,max_rain\n\
                    101,2022_06,Cachar,1200,\n\
                    102,2022_06,,300,n/a\n";
        let dataset = read_dataset(text.as_bytes()).unwrap();
        assert_eq!(dataset.len(), 2);

        let first = &dataset.rows()[0];
        assert_eq!(first.object_id, "101");
        assert_eq!(first.district.as_deref(), Some("Cachar"));
        assert_eq!(first.values["sum_population"], 1200.0);
        assert!(first.values["max_rain"].is_nan());

        let second = &dataset.rows()[1];
        assert!(second.district.is_none());
        assert!(second.values["max_rain"].is_nan());
        assert!(!second.values.contains_key("district"));
    }

    #[test]
    fn test_read_dataset_requires_keys() {
        let err = read_dataset("object_id,rain\n1,2\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("timeperiod"));

        let err = read_dataset("object_id,timeperiod\n1,2022-06\n".as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("malformed"));
    }

    #[test]
    fn test_read_district_lookup() {
        let text = "district,object_id\nCachar,101\nCachar,102\nDhubri,201\n";
        let lookup = read_district_lookup(text.as_bytes()).unwrap();
        assert_eq!(lookup.len(), 3);
        assert_eq!(lookup.district_of("201"), Some("Dhubri"));

        let conflict = "district,object_id\nCachar,101\nDhubri,101\n";
        assert!(read_district_lookup(conflict.as_bytes()).is_err());
    }

    #[test]
    fn test_factor_table_layout() {
        let records = vec![FactorScore {
            object_id: "101".to_string(),
            timeperiod: "2022_06".parse().unwrap(),
            factor: Factor::Hazard,
            class: RiskClass::new(4).unwrap(),
            float: Some(0.25),
        }];
        let mut buf = Vec::new();
        write_factor_scores(&mut buf, Factor::Hazard, true, &records).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "object-id,timeperiod,flood-hazard,flood-hazard-float\n101,2022_06,4,0.25\n"
        );
    }

    #[test]
    fn test_rounding_applies_to_indicators() {
        let mut indicators = BTreeMap::new();
        indicators.insert("sum_population".to_string(), 1234.56);
        indicators.insert("mean_rain".to_string(), 3.14159);
        let mut rounding = BTreeMap::new();
        rounding.insert("sum_population".to_string(), 0);
        rounding.insert("mean_rain".to_string(), 2);

        let cells = indicator_cells(
            &indicators,
            &["sum_population".to_string(), "mean_rain".to_string(), "absent".to_string()],
            &rounding,
        );
        assert_eq!(cells, vec!["1235", "3.14", ""]);
    }
}
