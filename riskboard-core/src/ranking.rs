//! Entity rankings, concentration indices and gap ratios
//!
//! Global invariants enforced:
//! - Descending by value, ties by entity id ascending
//! - Ranking is idempotent (same input = same order)
//! - Gap ratio is always >= 1.0 (larger / smaller)

use crate::error::{EngineError, EngineResult};
use crate::table::{Aggregation, MetricTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Local gaps further than this from the reference gap are flagged
const GAP_COMPARISON_TOLERANCE: f64 = 0.3;

/// Relative change (percent) beyond which a gap is widening or narrowing
const GAP_TREND_PCT: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RankedEntity {
    pub entity_id: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RankingResult {
    pub ordered_entities: Vec<RankedEntity>,
    /// Effective N (clamped to the entity count)
    pub top_n: usize,
    pub total: f64,
    /// Top-N sum as a percentage of the total
    pub top_n_share: f64,
}

impl RankingResult {
    pub fn top(&self) -> &[RankedEntity] {
        &self.ordered_entities[..self.top_n]
    }

    /// Each entity's value as a percentage of the total (0 when the total is 0)
    pub fn share_of_total(&self) -> Vec<(&str, f64)> {
        self.ordered_entities
            .iter()
            .map(|e| (e.entity_id.as_str(), percent_of(e.value, self.total)))
            .collect()
    }
}

fn percent_of(part: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        part / total * 100.0
    }
}

/// Rank already-aggregated `(entity, value)` pairs
pub fn rank<I, S>(values: I, n: usize) -> RankingResult
where
    I: IntoIterator<Item = (S, f64)>,
    S: Into<String>,
{
    let mut ordered: Vec<RankedEntity> = values
        .into_iter()
        .map(|(entity, value)| RankedEntity {
            entity_id: entity.into(),
            value,
        })
        .collect();

    ordered.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });

    let top_n = n.min(ordered.len());
    let total: f64 = ordered.iter().map(|e| e.value).sum();
    let top_sum: f64 = ordered[..top_n].iter().map(|e| e.value).sum();
    let top_n_share = percent_of(top_sum, total);

    RankingResult {
        ordered_entities: ordered,
        top_n,
        total,
        top_n_share,
    }
}

/// Group `measure` by `entity_dim`, then rank
pub fn rank_table(
    table: &MetricTable,
    entity_dim: &str,
    measure: &str,
    aggregation: Aggregation,
    n: usize,
) -> EngineResult<RankingResult> {
    let grouped = table.group_by_one(entity_dim, measure, aggregation)?;
    let result = rank(grouped, n);
    debug!(
        entities = result.ordered_entities.len(),
        top_n = result.top_n,
        share = result.top_n_share,
        "ranked {} by {}",
        entity_dim,
        measure
    );
    Ok(result)
}

/// Ratio between the two categories of a dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GapRatio {
    pub dominant_category: String,
    pub minority_category: String,
    pub dominant_value: f64,
    pub minority_value: f64,
    pub ratio: f64,
}

impl GapRatio {
    pub fn severity(&self) -> GapSeverity {
        GapSeverity::from_ratio(self.ratio)
    }
}

/// Qualitative reading of a gap ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GapSeverity {
    Balanced,
    Moderate,
    Significant,
    VeryHigh,
}

impl GapSeverity {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 2.0 {
            GapSeverity::VeryHigh
        } else if ratio > 1.5 {
            GapSeverity::Significant
        } else if ratio > 1.2 {
            GapSeverity::Moderate
        } else {
            GapSeverity::Balanced
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GapSeverity::Balanced => "balanced",
            GapSeverity::Moderate => "moderate",
            GapSeverity::Significant => "significant",
            GapSeverity::VeryHigh => "very-high",
        }
    }
}

/// Gap ratio over exactly two pre-aggregated categories
pub fn gap_ratio_from(dimension: &str, values: &BTreeMap<String, f64>) -> EngineResult<GapRatio> {
    let mut pairs = values.iter();
    let (Some(first), Some(second), None) = (pairs.next(), pairs.next(), pairs.next()) else {
        return Err(EngineError::InsufficientCategories {
            dimension: dimension.to_string(),
            found: values.len(),
        });
    };

    for (category, value) in [first, second] {
        if value.is_nan() || *value < 0.0 {
            return Err(EngineError::NegativeAggregate {
                dimension: dimension.to_string(),
                category: category.clone(),
                value: *value,
            });
        }
    }

    // BTreeMap order makes the first category win on equal values
    let ((dominant, dominant_value), (minority, minority_value)) = if second.1 > first.1 {
        (second, first)
    } else {
        (first, second)
    };

    if *minority_value == 0.0 {
        return Err(EngineError::division_by_zero(format!(
            "category '{}' of '{}' aggregates to zero",
            minority, dimension
        )));
    }

    Ok(GapRatio {
        dominant_category: dominant.clone(),
        minority_category: minority.clone(),
        dominant_value: *dominant_value,
        minority_value: *minority_value,
        ratio: dominant_value / minority_value,
    })
}

/// Sum `measure` per category of `dimension` and compare the two totals
pub fn gap_ratio(table: &MetricTable, dimension: &str, measure: &str) -> EngineResult<GapRatio> {
    let totals = table.group_by_one(dimension, measure, Aggregation::Sum)?;
    gap_ratio_from(dimension, &totals)
}

/// One gap ratio per value of `group_dim`
pub fn gap_ratio_by(
    table: &MetricTable,
    group_dim: &str,
    category_dim: &str,
    measure: &str,
) -> EngineResult<BTreeMap<String, GapRatio>> {
    categories_per_group(table, group_dim, category_dim, measure)?
        .into_iter()
        .map(|(group, categories)| Ok((group, gap_ratio_from(category_dim, &categories)?)))
        .collect()
}

/// Sum `measure` per `(group, category)` pair, nested by group
fn categories_per_group(
    table: &MetricTable,
    group_dim: &str,
    category_dim: &str,
    measure: &str,
) -> EngineResult<BTreeMap<String, BTreeMap<String, f64>>> {
    let grouped = table.group_by(&[group_dim, category_dim], measure, Aggregation::Sum)?;

    let mut per_group: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for (key, value) in grouped {
        if let [group, category] = key.as_slice() {
            per_group
                .entry(group.clone())
                .or_default()
                .insert(category.clone(), value);
        }
    }
    Ok(per_group)
}

/// Gap ratio of one group together with the group's total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GroupGap {
    pub group: String,
    pub total: f64,
    pub gap: GapRatio,
}

/// Gap ratios of the `n` largest groups, widest gap first
///
/// Groups that do not yield a gap (one category only, a zero or negative
/// side) are left out instead of failing the call. Ties by group name.
pub fn ranked_gaps(
    table: &MetricTable,
    group_dim: &str,
    category_dim: &str,
    measure: &str,
    n: usize,
) -> EngineResult<Vec<GroupGap>> {
    let per_group = categories_per_group(table, group_dim, category_dim, measure)?;
    let largest = rank(
        per_group
            .iter()
            .map(|(group, categories)| (group.as_str(), categories.values().sum::<f64>())),
        n,
    );

    let mut gaps = Vec::with_capacity(largest.top_n);
    for entity in largest.top() {
        let Some(categories) = per_group.get(&entity.entity_id) else {
            continue;
        };
        match gap_ratio_from(category_dim, categories) {
            Ok(gap) => gaps.push(GroupGap {
                group: entity.entity_id.clone(),
                total: entity.value,
                gap,
            }),
            Err(err) => debug!(group = %entity.entity_id, error = %err, "no gap for group"),
        }
    }

    gaps.sort_by(|a, b| {
        b.gap
            .ratio
            .total_cmp(&a.gap.ratio)
            .then_with(|| a.group.cmp(&b.group))
    });
    Ok(gaps)
}

/// Local gap set against a reference (e.g. city-wide) gap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GapComparison {
    pub local: f64,
    pub reference: f64,
    pub difference: f64,
    /// Whether the local gap departs from the reference beyond tolerance
    pub notable: bool,
}

pub fn compare_gap(local: f64, reference: f64) -> GapComparison {
    let difference = local - reference;
    GapComparison {
        local,
        reference,
        difference,
        notable: difference.abs() > GAP_COMPARISON_TOLERANCE,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapDirection {
    Widening,
    Narrowing,
    Stable,
}

impl GapDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapDirection::Widening => "widening",
            GapDirection::Narrowing => "narrowing",
            GapDirection::Stable => "stable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GapTrend {
    pub first: f64,
    pub last: f64,
    pub change_pct: f64,
    pub direction: GapDirection,
}

/// Change of a gap ratio over a chronological series of ratios
pub fn gap_trend(ratios: &[f64]) -> EngineResult<GapTrend> {
    let (Some(&first), Some(&last)) = (ratios.first(), ratios.last()) else {
        return Err(EngineError::InsufficientHistory {
            required: 2,
            actual: 0,
        });
    };
    if ratios.len() < 2 {
        return Err(EngineError::InsufficientHistory {
            required: 2,
            actual: ratios.len(),
        });
    }
    if first == 0.0 {
        return Err(EngineError::division_by_zero("first gap ratio is zero"));
    }

    let change_pct = (last - first) / first * 100.0;
    let direction = if change_pct > GAP_TREND_PCT {
        GapDirection::Widening
    } else if change_pct < -GAP_TREND_PCT {
        GapDirection::Narrowing
    } else {
        GapDirection::Stable
    };

    Ok(GapTrend {
        first,
        last,
        change_pct,
        direction,
    })
}
