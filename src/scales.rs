//! Grade classification: pass/fail remarks and the three equivalence scales
//! (per-item point scales, the configurable transmutation table and the fixed
//! final-grade scale). The fixed tables are built once on first use.

use crate::calc::{normalize_score, round_to};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PASSING_GRADE: f64 = 75.0;

/// Worst grade on the final scale; anything outside the bands lands here.
pub const FINAL_GRADE_FLOOR: f64 = 5.0;

/// Item maxima that have a dedicated point-by-point scale.
pub const ITEM_SCALE_COUNTS: [i64; 6] = [10, 20, 30, 40, 50, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Remarks {
    Passed,
    Failed,
}

impl Remarks {
    pub fn as_str(self) -> &'static str {
        match self {
            Remarks::Passed => "Passed",
            Remarks::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Passed" => Some(Remarks::Passed),
            "Failed" => Some(Remarks::Failed),
            _ => None,
        }
    }
}

pub fn classify_remarks(final_percentage: f64, passing_grade: Option<f64>) -> Remarks {
    let threshold = passing_grade.unwrap_or(DEFAULT_PASSING_GRADE);
    if final_percentage >= threshold {
        Remarks::Passed
    } else {
        Remarks::Failed
    }
}

#[derive(Debug, Clone)]
struct ItemScale {
    max: i64,
    // (points, equivalent) ascending by points
    entries: Vec<(i64, f64)>,
}

impl ItemScale {
    fn build(max: i64) -> Self {
        let entries = (0..=max)
            .map(|point| {
                let eq = round_to(4.0 - (point as f64 * 3.0 / max as f64), 1);
                (point, eq)
            })
            .collect();
        Self { max, entries }
    }

    fn closest(&self, score: f64) -> f64 {
        let mut best: Option<(f64, f64)> = None;
        for &(point, eq) in &self.entries {
            let dist = (point as f64 - score).abs();
            match best {
                Some((best_dist, _)) if dist >= best_dist => {}
                _ => best = Some((dist, eq)),
            }
        }
        best.map(|(_, eq)| eq).unwrap_or(FINAL_GRADE_FLOOR)
    }
}

static ITEM_SCALES: Lazy<Vec<ItemScale>> =
    Lazy::new(|| ITEM_SCALE_COUNTS.iter().map(|&m| ItemScale::build(m)).collect());

fn item_scale(total_items: i64) -> Option<&'static ItemScale> {
    ITEM_SCALES.iter().find(|s| s.max == total_items)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmutationRow {
    pub min_percentage: f64,
    pub max_percentage: f64,
    pub equivalent_grade: f64,
}

impl TransmutationRow {
    pub const fn new(min_percentage: f64, max_percentage: f64, equivalent_grade: f64) -> Self {
        Self {
            min_percentage,
            max_percentage,
            equivalent_grade,
        }
    }

    fn contains(&self, percentage: f64) -> bool {
        self.min_percentage <= percentage && percentage <= self.max_percentage
    }
}

const DEFAULT_TRANSMUTATION: [TransmutationRow; 6] = [
    TransmutationRow::new(96.0, 100.0, 1.0),
    TransmutationRow::new(90.0, 95.0, 1.25),
    TransmutationRow::new(85.0, 89.0, 1.5),
    TransmutationRow::new(80.0, 84.0, 1.75),
    TransmutationRow::new(75.0, 79.0, 2.0),
    TransmutationRow::new(0.0, 74.99, 5.0),
];

/// Percentage-range lookup, ordered by descending minimum.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmutationTable {
    rows: Vec<TransmutationRow>,
    is_default: bool,
}

impl Default for TransmutationTable {
    fn default() -> Self {
        Self {
            rows: DEFAULT_TRANSMUTATION.to_vec(),
            is_default: true,
        }
    }
}

impl TransmutationTable {
    /// Builds the table from configured rows; an empty configuration gives
    /// the built-in six-row table.
    pub fn from_rows(mut rows: Vec<TransmutationRow>) -> Self {
        if rows.is_empty() {
            return Self::default();
        }
        rows.sort_by(|a, b| b.min_percentage.total_cmp(&a.min_percentage));
        Self {
            rows,
            is_default: false,
        }
    }

    pub fn rows(&self) -> &[TransmutationRow] {
        &self.rows
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// First row whose `[min, max]` contains the percentage; the lowest row
    /// when none does.
    pub fn lookup(&self, percentage: f64) -> f64 {
        self.rows
            .iter()
            .find(|r| r.contains(percentage))
            .or_else(|| self.rows.last())
            .map(|r| r.equivalent_grade)
            .unwrap_or(FINAL_GRADE_FLOOR)
    }
}

/// Equivalent grade for one item score. Items whose maximum has a point
/// scale use the closest point (ties go to the lower point); other maxima
/// fall back to the transmutation table.
///
/// The table is keyed by percentage, so the fallback looks up the item's
/// normalized percentage and never the raw score: 20 out of 25 reads the
/// 80% row, not the row for 20.
pub fn item_equivalent_grade(score: f64, total_items: i64, table: &TransmutationTable) -> f64 {
    match item_scale(total_items) {
        Some(scale) => scale.closest(score),
        None => table.lookup(normalize_score(Some(score), total_items as f64)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FinalBand {
    min: i64,
    max: i64,
    grade: f64,
}

// 90..=100 -> 1.0, then one band per point down to 52 -> 4.8 in steps of
// 0.1, then 0..=51 -> 4.9.
static FINAL_SCALE: Lazy<Vec<FinalBand>> = Lazy::new(|| {
    let mut bands = vec![FinalBand {
        min: 90,
        max: 100,
        grade: 1.0,
    }];
    for point in (52..=89).rev() {
        let tenths = 10 + (90 - point);
        bands.push(FinalBand {
            min: point,
            max: point,
            grade: tenths as f64 / 10.0,
        });
    }
    bands.push(FinalBand {
        min: 0,
        max: 51,
        grade: 4.9,
    });
    bands
});

/// Maps a final percentage onto the fixed 1.0 (best) to 5.0 (worst) scale.
/// The percentage is first rounded to an integer, half to even.
pub fn final_equivalent_grade(percentage: f64) -> f64 {
    let rounded = percentage.round_ties_even();
    FINAL_SCALE
        .iter()
        .find(|b| b.min as f64 <= rounded && rounded <= b.max as f64)
        .map(|b| b.grade)
        .unwrap_or(FINAL_GRADE_FLOOR)
}
