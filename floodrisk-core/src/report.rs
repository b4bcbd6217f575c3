//! Reporting and output generation
//!
//! Global invariants enforced:
//! - Deterministic output ordering
//! - Byte-for-byte identical output across runs

use crate::factors::Factor;
use crate::pipeline::{CohortFailure, ObjectRow, PipelineOutput};
use crate::quality::QualityReport;
use crate::rollup::DistrictRow;
use crate::summary::ClassDistribution;
use serde::Serialize;
use std::cmp::Ordering;

/// Sort objects for display: period ascending, score descending, id ascending
pub fn sort_objects(mut rows: Vec<ObjectRow>) -> Vec<ObjectRow> {
    rows.sort_by(|a, b| {
        a.timeperiod
            .cmp(&b.timeperiod)
            .then_with(|| {
                b.topsis_score
                    .partial_cmp(&a.topsis_score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.object_id.cmp(&b.object_id))
    });
    rows
}

fn class_cell(row: &ObjectRow, factor: Factor) -> String {
    row.factors
        .get(&factor)
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Render the ranked composite table, `top` rows per period
pub fn render_text(output: &PipelineOutput, top: Option<usize>) -> String {
    let mut text = String::new();
    let sorted = sort_objects(output.objects.clone());

    let mut current = None;
    let mut shown = 0;
    for row in &sorted {
        if current != Some(row.timeperiod) {
            if current.is_some() {
                text.push('\n');
            }
            current = Some(row.timeperiod);
            shown = 0;
            text.push_str(&format!("Period {}\n", row.timeperiod));
            text.push_str(&format!(
                "{:<5} {:<7} {:<5} {:<4} {:<4} {:<4} {:<4} {:<16} {}\n",
                "RANK", "SCORE", "RISK", "HAZ", "EXP", "VUL", "GOV", "OBJECT", "DISTRICT"
            ));
        }
        if top.is_some_and(|n| shown >= n) {
            continue;
        }
        shown += 1;
        text.push_str(&format!(
            "{:<5} {:<7} {:<5} {:<4} {:<4} {:<4} {:<4} {:<16} {}\n",
            row.rank,
            format!("{:.4}", row.topsis_score),
            row.risk_class,
            class_cell(row, Factor::Hazard),
            class_cell(row, Factor::Exposure),
            class_cell(row, Factor::Vulnerability),
            class_cell(row, Factor::GovernmentResponse),
            truncate_or_pad(&row.object_id, 16),
            row.district.as_deref().unwrap_or("-"),
        ));
    }

    if !output.districts.is_empty() {
        text.push_str(&render_districts(&output.districts));
    }
    if !output.failures.is_empty() {
        text.push('\n');
        text.push_str(&render_failures(&output.failures));
    }
    text
}

fn render_districts(districts: &[DistrictRow]) -> String {
    let mut text = String::from("\nDistricts\n");
    text.push_str(&format!(
        "{:<8} {:<20} {:<8} {:<5} {:<4} {:<4} {:<4} {}\n",
        "PERIOD", "DISTRICT", "MEMBERS", "RISK", "HAZ", "EXP", "VUL", "GOV"
    ));
    for d in districts {
        let class = |f: Factor| {
            d.factors
                .get(&f)
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        text.push_str(&format!(
            "{:<8} {:<20} {:<8} {:<5} {:<4} {:<4} {:<4} {}\n",
            d.timeperiod,
            truncate_or_pad(&d.district, 20),
            d.members,
            d.risk_class,
            class(Factor::Hazard),
            class(Factor::Exposure),
            class(Factor::Vulnerability),
            class(Factor::GovernmentResponse),
        ));
    }
    text
}

pub fn render_failures(failures: &[CohortFailure]) -> String {
    let mut text = format!("Failed periods: {}\n", failures.len());
    for f in failures {
        text.push_str(&format!(
            "  {} ({} members) {}: {}\n",
            f.timeperiod,
            f.members,
            f.error.kind(),
            f.error.detail()
        ));
    }
    text
}

/// Render class distributions and their checks
pub fn render_explain(distributions: &[ClassDistribution]) -> String {
    let mut text = String::from("Class distributions\n");
    for d in distributions {
        let pct = d.percentages();
        text.push_str(&format!("  {} ({} objects)\n", d.column, d.total));
        for (i, count) in d.counts.iter().enumerate() {
            text.push_str(&format!(
                "    class {}: {:>6} ({:>5.1}%)\n",
                i + 1,
                count,
                pct[i]
            ));
        }
        for check in d.checks() {
            let mark = if check.passed { "ok" } else { "FAILED" };
            text.push_str(&format!("    [{}] {}\n", mark, check.name));
        }
    }
    text
}

#[derive(Serialize)]
struct FailureJson<'a> {
    timeperiod: String,
    members: usize,
    kind: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct OutputJson<'a> {
    objects: Vec<ObjectRow>,
    districts: &'a [DistrictRow],
    failures: Vec<FailureJson<'a>>,
    distributions: &'a [ClassDistribution],
}

/// Render the full run as JSON
pub fn render_json(output: &PipelineOutput) -> String {
    let doc = OutputJson {
        objects: sort_objects(output.objects.clone()),
        districts: &output.districts,
        failures: output
            .failures
            .iter()
            .map(|f| FailureJson {
                timeperiod: f.timeperiod.to_string(),
                members: f.members,
                kind: f.error.kind(),
                message: f.error.detail(),
            })
            .collect(),
        distributions: &output.distributions,
    };
    serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".to_string())
}

/// Render a data quality report as text
pub fn render_quality_text(report: &QualityReport) -> String {
    let mut text = format!("Rows: {}\n", report.rows);
    text.push_str(&format!(
        "Duplicate (object_id, timeperiod): {}\n",
        report.duplicate_keys
    ));
    text.push_str(&format!("Rows with all zeros: {}\n", report.all_zero_rows));
    if !report.missing_columns.is_empty() {
        text.push_str(&format!(
            "Missing columns: {}\n",
            report.missing_columns.join(", ")
        ));
    }

    text.push_str(&format!(
        "\n{:<40} {:>6} {:>6} {:>6} {:>6} {:>8} {:>8}\n",
        "COLUMN", "NAN", "INF", "NEG", "ABSENT", "EXTREME", "CONSTANT"
    ));
    for c in &report.columns {
        text.push_str(&format!(
            "{:<40} {:>6} {:>6} {:>6} {:>6} {:>8} {:>8}\n",
            truncate_or_pad(&c.column, 40),
            c.nan,
            c.infinite,
            c.negative,
            c.absent,
            c.extreme,
            if c.zero_variance { "yes" } else { "no" },
        ));
    }

    if !report.small_periods.is_empty() {
        text.push_str(&format!(
            "\nPeriods with fewer than {} members:\n",
            report.min_members
        ));
        for p in &report.small_periods {
            text.push_str(&format!("  {}: {}\n", p.timeperiod, p.members));
        }
    }

    text.push_str(if report.is_clean() {
        "\nNo problems found\n"
    } else {
        "\nProblems found\n"
    });
    text
}

pub fn render_quality_json(report: &QualityReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}

/// Truncate or pad string to fixed width
fn truncate_or_pad(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        format!("{:<width$}", s, width = width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RiskClass;
    use crate::error::ScoringError;
    use std::collections::BTreeMap;

    fn row(id: &str, period: &str, score: f64) -> ObjectRow {
        let timeperiod: crate::period::TimePeriod = period.parse().unwrap();
        let class = RiskClass::new(3).unwrap();
        ObjectRow {
            object_id: id.to_string(),
            timeperiod,
            district: Some("Cachar".to_string()),
            financial_year: timeperiod.financial_year(4),
            factors: Factor::ALL.iter().map(|f| (*f, class)).collect(),
            floats: BTreeMap::new(),
            topsis_score: score,
            risk_class: class,
            rank: 1,
            indicators: BTreeMap::new(),
        }
    }

    #[test]
    fn test_sort_objects_deterministic() {
        let sorted = sort_objects(vec![
            row("b", "2022_07", 0.9),
            row("a", "2022_06", 0.2),
            row("c", "2022_06", 0.8),
            row("b", "2022_06", 0.8),
        ]);
        let keys: Vec<(String, String)> = sorted
            .iter()
            .map(|r| (r.timeperiod.to_string(), r.object_id.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("2022_06".to_string(), "b".to_string()),
                ("2022_06".to_string(), "c".to_string()),
                ("2022_06".to_string(), "a".to_string()),
                ("2022_07".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_render_text_top_per_period() {
        let output = PipelineOutput {
            objects: vec![
                row("a", "2022_06", 0.1),
                row("b", "2022_06", 0.9),
                row("c", "2022_07", 0.5),
            ],
            ..Default::default()
        };
        let text = render_text(&output, Some(1));
        assert!(text.contains("Period 2022_06"));
        assert!(text.contains("Period 2022_07"));
        assert!(text.contains("0.9000"));
        assert!(!text.contains("0.1000"));
    }

    #[test]
    fn test_failures_in_text_and_json() {
        let output = PipelineOutput {
            failures: vec![CohortFailure {
                timeperiod: "2022_08".parse().unwrap(),
                members: 1,
                error: ScoringError::degenerate("column 'mean_rain' has zero variance"),
            }],
            ..Default::default()
        };
        let text = render_text(&output, None);
        assert!(text.contains("2022_08 (1 members) degenerate-cohort"));

        let json: serde_json::Value = serde_json::from_str(&render_json(&output)).unwrap();
        assert_eq!(json["failures"][0]["kind"], "degenerate-cohort");
        assert_eq!(json["failures"][0]["timeperiod"], "2022_08");
    }

    #[test]
    fn test_truncate_or_pad() {
        assert_eq!(truncate_or_pad("abc", 5), "abc  ");
        assert_eq!(truncate_or_pad("abcdefgh", 6), "abc...");
    }
}
