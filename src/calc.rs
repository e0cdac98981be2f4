use serde::Serialize;

/// Category weights must land on 100 within this tolerance before final
/// grades are computed.
pub const WEIGHT_TOLERANCE: f64 = 0.001;

// Summing decimal weights in f64 leaves residue around 1e-14; anything under
// this is treated as exact.
const FLOAT_NOISE: f64 = 1e-9;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn db(code: &str, e: rusqlite::Error) -> Self {
        Self::new(code, e.to_string())
    }
}

impl std::fmt::Display for CalcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CalcError {}

/// One graded item as seen by a single student: the item's declared maximum
/// and the recorded raw score, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemInput {
    pub max: f64,
    pub score: Option<f64>,
}

/// Converts a raw score to a percentage of the item's maximum.
///
/// A missing score and a non-positive maximum both yield 0. Over-scoring is
/// not clamped (`12/10` is `120.0`) and negative scores pass through.
pub fn normalize_score(score: Option<f64>, max: f64) -> f64 {
    match score {
        Some(s) if max > 0.0 => (s / max) * 100.0,
        _ => 0.0,
    }
}

/// Rounds to `decimals` places from the exact binary value, ties to even.
/// Scaling by a power of ten first would turn values like 3.55 (stored just
/// below) into ties and round them the wrong way.
pub fn round_to(x: f64, decimals: usize) -> f64 {
    format!("{:.*}", decimals, x).parse().unwrap_or(x)
}

/// 2-decimal rounding used for stored final percentages and sheet averages.
pub fn round_2dp(x: f64) -> f64 {
    round_to(x, 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAggregate {
    pub average: f64,
    pub weighted: f64,
    pub item_count: usize,
    pub missing_count: usize,
}

/// Mean over every item in the category. Missing scores are normalized to 0
/// but still count in the denominator; an empty category averages 0.
pub fn category_average(items: &[ItemInput]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    let sum: f64 = items
        .iter()
        .map(|it| normalize_score(it.score, it.max))
        .sum();
    sum / (items.len() as f64)
}

pub fn weighted_contribution(average: f64, weight: f64) -> f64 {
    average * (weight / 100.0)
}

pub fn aggregate_category(items: &[ItemInput], weight: f64) -> CategoryAggregate {
    let average = category_average(items);
    CategoryAggregate {
        average,
        weighted: weighted_contribution(average, weight),
        item_count: items.len(),
        missing_count: items.iter().filter(|it| it.score.is_none()).count(),
    }
}

/// Average over recorded scores only, rounded to 2 decimals. This is the
/// grade-sheet display figure, not the one that feeds the final grade.
pub fn present_average(items: &[ItemInput]) -> f64 {
    let present: Vec<f64> = items
        .iter()
        .filter(|it| it.score.is_some())
        .map(|it| normalize_score(it.score, it.max))
        .collect();
    if present.is_empty() {
        return 0.0;
    }
    round_2dp(present.iter().sum::<f64>() / (present.len() as f64))
}

pub fn weight_total(weights: &[f64]) -> f64 {
    weights.iter().sum()
}

pub fn weights_valid(total: f64) -> bool {
    (total - 100.0).abs() + FLOAT_NOISE < WEIGHT_TOLERANCE
}

/// Creation-time cap: categories of one class may never add up past 100.
pub fn exceeds_weight_cap(total: f64) -> bool {
    total - 100.0 > FLOAT_NOISE
}

/// Returns the weight total, or `weights_invalid` when the class cannot be
/// graded yet.
pub fn check_weights(weights: &[f64]) -> Result<f64, CalcError> {
    let total = weight_total(weights);
    if weights_valid(total) {
        return Ok(total);
    }
    Err(CalcError::new(
        "weights_invalid",
        "total category percentage must equal 100%",
    )
    .with_details(serde_json::json!({
        "weightTotal": total,
        "categoryCount": weights.len(),
    })))
}

/// Sum of weighted category contributions, rounded to 2 decimals.
pub fn compose_final(contributions: &[f64]) -> f64 {
    round_2dp(contributions.iter().sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(max: f64, score: f64) -> ItemInput {
        ItemInput {
            max,
            score: Some(score),
        }
    }

    fn missing(max: f64) -> ItemInput {
        ItemInput { max, score: None }
    }

    #[test]
    fn normalize_scales_against_item_max() {
        assert_eq!(normalize_score(Some(8.0), 10.0), 80.0);
        assert_eq!(normalize_score(Some(16.0), 20.0), 80.0);
        assert_eq!(normalize_score(Some(12.0), 10.0), 120.0);
        assert_eq!(normalize_score(Some(-5.0), 10.0), -50.0);
    }

    #[test]
    fn normalize_zero_max_or_missing_is_zero() {
        assert_eq!(normalize_score(Some(7.0), 0.0), 0.0);
        assert_eq!(normalize_score(Some(7.0), -10.0), 0.0);
        assert_eq!(normalize_score(None, 10.0), 0.0);
    }

    #[test]
    fn missing_scores_stay_in_the_denominator() {
        let items = [scored(10.0, 10.0), scored(10.0, 5.0), missing(10.0), missing(10.0)];
        // (100 + 50 + 0 + 0) / 4, not / 2
        assert_eq!(category_average(&items), 37.5);

        let agg = aggregate_category(&items, 40.0);
        assert_eq!(agg.item_count, 4);
        assert_eq!(agg.missing_count, 2);
        assert!((agg.weighted - 15.0).abs() < 1e-9);
    }

    #[test]
    fn empty_category_averages_zero() {
        let agg = aggregate_category(&[], 30.0);
        assert_eq!(agg.average, 0.0);
        assert_eq!(agg.weighted, 0.0);
    }

    #[test]
    fn present_average_ignores_missing() {
        let items = [scored(10.0, 10.0), scored(10.0, 5.0), missing(10.0)];
        assert_eq!(present_average(&items), 75.0);
        assert_eq!(present_average(&[missing(10.0)]), 0.0);
        assert_eq!(present_average(&[scored(3.0, 1.0)]), 33.33);
    }

    #[test]
    fn weight_check_accepts_hundred_and_float_noise() {
        assert!(check_weights(&[40.0, 60.0]).is_ok());
        assert!(check_weights(&[33.3, 33.3, 33.4]).is_ok());
        assert!(check_weights(&[10.1, 20.2, 30.3, 39.4]).is_ok());
    }

    #[test]
    fn weight_check_rejects_off_by_a_thousandth() {
        let low = check_weights(&[40.0, 59.999]).expect_err("99.999 must fail");
        assert_eq!(low.code, "weights_invalid");
        let high = check_weights(&[40.0, 60.001]).expect_err("100.001 must fail");
        assert_eq!(high.code, "weights_invalid");
        assert!(check_weights(&[]).is_err());
        assert!(check_weights(&[50.0]).is_err());
    }

    #[test]
    fn weight_cap_allows_exactly_hundred() {
        assert!(!exceeds_weight_cap(33.3 + 33.3 + 33.4));
        assert!(!exceeds_weight_cap(60.0));
        assert!(exceeds_weight_cap(100.5));
    }

    #[test]
    fn compose_rounds_to_two_decimals() {
        let quiz = aggregate_category(&[scored(20.0, 16.0)], 40.0);
        let exam = aggregate_category(&[scored(100.0, 70.0)], 60.0);
        assert_eq!(compose_final(&[quiz.weighted, exam.weighted]), 74.0);

        let third = aggregate_category(&[scored(3.0, 1.0)], 100.0);
        assert_eq!(compose_final(&[third.weighted]), 33.33);
    }

    #[test]
    fn compose_breaks_exact_ties_to_even() {
        // (62.5 + 0) / 2 = 31.25 and 100, both at 50%: 65.625 is an exact tie.
        let quiz = aggregate_category(&[scored(8.0, 5.0), scored(8.0, 0.0)], 50.0);
        let exam = aggregate_category(&[scored(100.0, 100.0)], 50.0);
        assert_eq!(quiz.weighted, 15.625);
        assert_eq!(compose_final(&[quiz.weighted, exam.weighted]), 65.62);
        assert_eq!(compose_final(&[65.635]), 65.64);
    }

    #[test]
    fn rounding_reads_the_stored_value() {
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(0.375, 2), 0.38);
        // 2.675 is stored just below the tie
        assert_eq!(round_to(2.675, 2), 2.67);
        assert_eq!(round_to(-1.005, 2), -1.0);
        assert!(round_to(f64::NAN, 2).is_nan());
        assert_eq!(present_average(&[scored(8.0, 5.0), scored(8.0, 3.0)]), 50.0);
    }
}
