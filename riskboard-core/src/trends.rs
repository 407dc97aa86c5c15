//! Trend semantics - projections and growth statistics over a series
//!
//! Projects one period ahead from a blend of two growth models and
//! summarizes period-over-period variation.
//!
//! Global invariants enforced:
//! - Deterministic ordering (numeric periods first by value, then by label)
//! - No table mutation
//! - Trends are derived, not stored

use crate::error::{EngineError, EngineResult};
use crate::risk::RiskLevel;
use crate::table::{Aggregation, MetricTable};
use crate::thresholds::{Breach, Threshold};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Damping applied to the growth rate by the conservative model
const DAMPING_FACTOR: f64 = 0.95;

/// Mean variation (percent) above which a trend counts as a strong rise
const STRONG_TREND_PCT: f64 = 5.0;

/// One period of a chronological series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub period: String,
    pub value: f64,
}

/// One-step-ahead projection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProjectionResult {
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub model_a_estimate: f64,
    pub model_b_estimate: f64,
    pub growth_rate: f64,
}

/// Projection expressed as a rate per population base
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProjectedRate {
    pub point_rate: f64,
    pub model_a_rate: f64,
    pub model_b_rate: f64,
    pub level: RiskLevel,
}

/// Direction of the average period-over-period variation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrendDirection {
    StrongRise,
    ModerateRise,
    Stable,
    StrongDecline,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::StrongRise => "strong-rise",
            TrendDirection::ModerateRise => "moderate-rise",
            TrendDirection::Stable => "stable",
            TrendDirection::StrongDecline => "strong-decline",
        }
    }

    fn from_mean_variation(mean_pct: f64) -> Self {
        if mean_pct > STRONG_TREND_PCT {
            TrendDirection::StrongRise
        } else if mean_pct > 0.0 {
            TrendDirection::ModerateRise
        } else if mean_pct < -STRONG_TREND_PCT {
            TrendDirection::StrongDecline
        } else {
            TrendDirection::Stable
        }
    }
}

/// Period-over-period variation of a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PeriodVariation {
    pub period: String,
    pub variation_pct: f64,
    pub absolute_change: f64,
}

/// Summary of growth over a whole series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GrowthStatistics {
    pub variations: Vec<PeriodVariation>,
    pub mean_variation_pct: f64,
    pub max_variation_pct: f64,
    pub min_variation_pct: f64,
    pub volatility_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_growth_pct: Option<f64>,
    pub peak_period: String,
    pub peak_value: f64,
    pub direction: TrendDirection,
}

/// Project the next value of a chronological series
///
/// Model A extrapolates the last growth rate `g`; model B damps it to
/// `0.95 * g`. The point estimate is their mean and the band widens each
/// side by half the gap between them.
pub fn project(series: &[f64]) -> EngineResult<ProjectionResult> {
    let n = series.len();
    if n < 2 {
        return Err(EngineError::InsufficientHistory {
            required: 2,
            actual: n,
        });
    }

    let previous = series[n - 2];
    let last = series[n - 1];
    if previous == 0.0 {
        return Err(EngineError::division_by_zero(
            "previous period is zero, growth rate undefined",
        ));
    }
    if last == 0.0 {
        return Err(EngineError::division_by_zero(
            "latest period is zero, projection base undefined",
        ));
    }

    let growth_rate = (last - previous) / previous;
    let model_a = last * (1.0 + growth_rate);
    let model_b = last * (1.0 + DAMPING_FACTOR * growth_rate);
    let point_estimate = (model_a + model_b) / 2.0;

    let delta = (model_a - model_b).abs();
    let lower_bound = model_a.min(model_b) - 0.5 * delta;
    let upper_bound = model_a.max(model_b) + 0.5 * delta;

    debug!(growth_rate, model_a, model_b, "projected next period");

    Ok(ProjectionResult {
        point_estimate,
        lower_bound,
        upper_bound,
        model_a_estimate: model_a,
        model_b_estimate: model_b,
        growth_rate,
    })
}

/// Convert a projection into a rate per `base` population and band it
pub fn projected_rate(
    projection: &ProjectionResult,
    population: f64,
    base: f64,
    threshold: &Threshold,
) -> EngineResult<ProjectedRate> {
    if population == 0.0 {
        return Err(EngineError::division_by_zero(
            "population is zero, rate undefined",
        ));
    }

    let to_rate = |value: f64| value / population * base;
    let point_rate = to_rate(projection.point_estimate);
    let level = match threshold.classify(point_rate) {
        Some(Breach::Critical) => RiskLevel::Critical,
        Some(Breach::Warning) => RiskLevel::Warning,
        None => RiskLevel::Normal,
    };

    Ok(ProjectedRate {
        point_rate,
        model_a_rate: to_rate(projection.model_a_estimate),
        model_b_rate: to_rate(projection.model_b_estimate),
        level,
    })
}

/// Compare period labels numerically when both parse, else lexicographically
fn compare_periods(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Sum `measure` per period of `time_dim`, in chronological order
pub fn chronological_series(
    table: &MetricTable,
    time_dim: &str,
    measure: &str,
) -> EngineResult<Vec<SeriesPoint>> {
    let mut points: Vec<SeriesPoint> = table
        .group_by_one(time_dim, measure, Aggregation::Sum)?
        .into_iter()
        .map(|(period, value)| SeriesPoint { period, value })
        .collect();
    points.sort_by(|a, b| compare_periods(&a.period, &b.period));
    Ok(points)
}

/// Growth statistics over a chronological series
///
/// Periods that follow a zero value have no defined variation and are
/// skipped. Total growth is absent when the first value is zero.
pub fn growth_statistics(series: &[SeriesPoint]) -> EngineResult<GrowthStatistics> {
    if series.len() < 2 {
        return Err(EngineError::InsufficientHistory {
            required: 2,
            actual: series.len(),
        });
    }

    let variations: Vec<PeriodVariation> = series
        .windows(2)
        .filter(|pair| pair[0].value != 0.0)
        .map(|pair| PeriodVariation {
            period: pair[1].period.clone(),
            variation_pct: (pair[1].value - pair[0].value) / pair[0].value * 100.0,
            absolute_change: pair[1].value - pair[0].value,
        })
        .collect();

    if variations.is_empty() {
        return Err(EngineError::division_by_zero(
            "every period follows a zero value",
        ));
    }

    let pcts: Vec<f64> = variations.iter().map(|v| v.variation_pct).collect();
    let mean = pcts.iter().sum::<f64>() / pcts.len() as f64;
    let max = pcts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = pcts.iter().copied().fold(f64::INFINITY, f64::min);
    let volatility = if pcts.len() > 1 {
        let var = pcts.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (pcts.len() - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };

    let first = series[0].value;
    let last = series[series.len() - 1].value;
    let total_growth_pct = (first != 0.0).then(|| (last - first) / first * 100.0);

    // First occurrence wins on ties
    let peak = series
        .iter()
        .fold(&series[0], |best, p| if p.value > best.value { p } else { best });

    Ok(GrowthStatistics {
        variations,
        mean_variation_pct: mean,
        max_variation_pct: max,
        min_variation_pct: min,
        volatility_pct: volatility,
        total_growth_pct,
        peak_period: peak.period.clone(),
        peak_value: peak.value,
        direction: TrendDirection::from_mean_variation(mean),
    })
}
