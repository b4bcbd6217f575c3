//! Class distribution summary
//!
//! Counts how scored objects spread over the five classes, per factor and
//! for the composite risk class, with sanity checks on the shape.

use crate::classify::CLASS_COUNT;
use crate::factors::Factor;
use crate::pipeline::ObjectRow;
use serde::Serialize;

pub const RISK_SCORE_COLUMN: &str = "risk-score";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDistribution {
    pub column: String,
    pub total: usize,
    /// Count per class, index 0 is class 1
    pub counts: [usize; CLASS_COUNT],
    /// Objects carrying no class for this column
    pub missing: usize,
    pub out_of_range: usize,
}

/// Outcome of one distribution check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
}

impl ClassDistribution {
    fn from_classes(column: &str, classes: impl Iterator<Item = Option<u8>>) -> Self {
        let mut counts = [0; CLASS_COUNT];
        let mut total = 0;
        let mut missing = 0;
        let mut out_of_range = 0;
        for class in classes {
            total += 1;
            match class {
                Some(c) if (1..=CLASS_COUNT as u8).contains(&c) => counts[c as usize - 1] += 1,
                Some(_) => out_of_range += 1,
                None => missing += 1,
            }
        }
        ClassDistribution {
            column: column.to_string(),
            total,
            counts,
            missing,
            out_of_range,
        }
    }

    /// Share of objects in each class, in percent
    pub fn percentages(&self) -> [f64; CLASS_COUNT] {
        let mut out = [0.0; CLASS_COUNT];
        if self.total > 0 {
            for (i, count) in self.counts.iter().enumerate() {
                out[i] = *count as f64 * 100.0 / self.total as f64;
            }
        }
        out
    }

    pub fn checks(&self) -> Vec<Check> {
        vec![
            Check {
                name: "all classes present",
                passed: self.counts.iter().all(|c| *c > 0),
            },
            Check {
                name: "labels in range",
                passed: self.out_of_range == 0,
            },
            Check {
                name: "lowest class more frequent than highest",
                passed: self.counts[0] > self.counts[CLASS_COUNT - 1],
            },
            Check {
                name: "no missing values",
                passed: self.missing == 0,
            },
        ]
    }

    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks()
            .into_iter()
            .filter(|c| !c.passed)
            .map(|c| c.name)
            .collect()
    }
}

/// Distribution of every factor column and the risk class
pub fn summarize(objects: &[ObjectRow]) -> Vec<ClassDistribution> {
    if objects.is_empty() {
        return Vec::new();
    }
    let mut out: Vec<ClassDistribution> = Factor::ALL
        .iter()
        .map(|factor| {
            ClassDistribution::from_classes(
                factor.column_name(),
                objects.iter().map(|o| o.factors.get(factor).map(|c| c.get())),
            )
        })
        .collect();
    out.push(ClassDistribution::from_classes(
        RISK_SCORE_COLUMN,
        objects.iter().map(|o| Some(o.risk_class.get())),
    ));
    out
}
