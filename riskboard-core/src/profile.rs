//! Locality profile - one locality read against the whole city
//!
//! Global invariants enforced:
//! - Position and share come from the same ranking as the locality panel
//! - City averages divide by the number of ranked localities
//! - Sections that cannot be computed are absent, not zero

use crate::error::{EngineError, EngineResult};
use crate::ranking::{compare_gap, gap_ratio, rank_table, GapComparison, GapRatio};
use crate::report::{format_number, Flatten};
use crate::table::{Aggregation, MetricTable, Value};
use crate::trends::{chronological_series, growth_statistics, GrowthStatistics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Disorder categories listed in a profile
const PROFILE_TOP_CATEGORIES: usize = 10;

/// Column names read by [`locality_profile`]
#[derive(Debug, Clone)]
pub struct ProfileColumns<'a> {
    pub period: &'a str,
    pub locality: &'a str,
    pub gender: &'a str,
    pub category: &'a str,
    pub measure: &'a str,
    pub risk_level: &'a str,
    pub confidence: &'a str,
}

impl Default for ProfileColumns<'_> {
    fn default() -> Self {
        ProfileColumns {
            period: "year",
            locality: "locality",
            gender: "gender",
            category: "disorder_category",
            measure: "attentions",
            risk_level: "risk_level",
            confidence: "confidence",
        }
    }
}

/// Locality value of one period next to the city per-locality average
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProfilePoint {
    pub period: String,
    pub value: f64,
    pub city_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CategoryShare {
    pub category: String,
    pub value: f64,
    /// Percentage of the locality total
    pub share_pct: f64,
}

/// Externally assigned risk label of a locality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LocalityRisk {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LocalityProfile {
    pub locality: String,
    /// 1-based position in the locality ranking
    pub position: usize,
    pub localities: usize,
    pub total: f64,
    pub share_pct: f64,
    pub records: usize,
    pub series: Vec<ProfilePoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub growth: Option<GrowthStatistics>,
    pub top_categories: Vec<CategoryShare>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender_gap: Option<GapRatio>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap_comparison: Option<GapComparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<LocalityRisk>,
}

/// Locality name as stored in the table, exact match first, then ignoring case
fn resolve_name(localities: &[String], name: &str) -> Option<String> {
    let wanted = name.trim();
    localities
        .iter()
        .find(|l| l.as_str() == wanted)
        .or_else(|| localities.iter().find(|l| l.eq_ignore_ascii_case(wanted)))
        .cloned()
}

/// Profile of one locality of the morbidity table
///
/// The classification table is optional; without it (or without a row for
/// the locality) the profile carries no risk section.
pub fn locality_profile(
    morbidity: &MetricTable,
    classification: Option<&MetricTable>,
    name: &str,
    columns: &ProfileColumns<'_>,
) -> EngineResult<LocalityProfile> {
    let ranking = rank_table(
        morbidity,
        columns.locality,
        columns.measure,
        Aggregation::Sum,
        0,
    )?;
    let localities: Vec<String> = ranking
        .ordered_entities
        .iter()
        .map(|e| e.entity_id.clone())
        .collect();
    let locality = resolve_name(&localities, name).ok_or_else(|| EngineError::UnknownEntity {
        dimension: columns.locality.to_string(),
        name: name.to_string(),
    })?;

    let index = localities
        .iter()
        .position(|l| *l == locality)
        .unwrap_or_default();
    let total = ranking.ordered_entities[index].value;
    let share_pct = if ranking.total == 0.0 {
        0.0
    } else {
        total / ranking.total * 100.0
    };

    let subset = morbidity.filter_eq(columns.locality, &locality)?;

    let city: BTreeMap<String, f64> =
        chronological_series(morbidity, columns.period, columns.measure)?
            .into_iter()
            .map(|p| (p.period, p.value))
            .collect();
    let local_series = chronological_series(&subset, columns.period, columns.measure)?;
    let series = local_series
        .iter()
        .map(|p| ProfilePoint {
            period: p.period.clone(),
            value: p.value,
            city_average: city.get(&p.period).copied().unwrap_or(0.0) / localities.len() as f64,
        })
        .collect();

    let growth = match growth_statistics(&local_series) {
        Ok(stats) => Some(stats),
        Err(err) => {
            debug!(locality = %locality, error = %err, "no growth for locality");
            None
        }
    };

    let categories = rank_table(
        &subset,
        columns.category,
        columns.measure,
        Aggregation::Sum,
        PROFILE_TOP_CATEGORIES,
    )?;
    let top_categories = categories
        .top()
        .iter()
        .map(|e| CategoryShare {
            category: e.entity_id.clone(),
            value: e.value,
            share_pct: if total == 0.0 { 0.0 } else { e.value / total * 100.0 },
        })
        .collect();

    let gender_gap = gap_ratio(&subset, columns.gender, columns.measure)
        .map_err(|err| debug!(locality = %locality, error = %err, "no gender gap for locality"))
        .ok();
    let gap_comparison = gender_gap.as_ref().and_then(|local| {
        gap_ratio(morbidity, columns.gender, columns.measure)
            .ok()
            .map(|city| compare_gap(local.ratio, city.ratio))
    });

    let risk = match classification {
        Some(table) => locality_risk(table, &locality, columns)?,
        None => None,
    };

    debug!(
        locality = %locality,
        position = index + 1,
        records = subset.len(),
        "built locality profile"
    );

    Ok(LocalityProfile {
        locality,
        position: index + 1,
        localities: localities.len(),
        total,
        share_pct,
        records: subset.len(),
        series,
        growth,
        top_categories,
        gender_gap,
        gap_comparison,
        risk,
    })
}

fn locality_risk(
    classification: &MetricTable,
    locality: &str,
    columns: &ProfileColumns<'_>,
) -> EngineResult<Option<LocalityRisk>> {
    let rows = classification.filter_eq(columns.locality, locality)?;
    let Some(record) = rows.records().first() else {
        return Ok(None);
    };
    let Some(level) = record
        .get(columns.risk_level)
        .map(Value::as_key)
        .filter(|l| !l.is_empty())
    else {
        return Ok(None);
    };
    Ok(Some(LocalityRisk {
        level,
        confidence: record.get(columns.confidence).and_then(Value::as_f64),
    }))
}

impl Flatten for LocalityProfile {
    fn flatten(&self) -> Vec<(String, String)> {
        let mut rows = vec![
            ("locality".to_string(), self.locality.clone()),
            (
                "position".to_string(),
                format!("{}/{}", self.position, self.localities),
            ),
            ("total".to_string(), format_number(self.total)),
            ("share_pct".to_string(), format_number(self.share_pct)),
            ("records".to_string(), self.records.to_string()),
        ];
        for point in &self.series {
            rows.push((point.period.clone(), format_number(point.value)));
            rows.push((
                format!("{}.city_average", point.period),
                format_number(point.city_average),
            ));
        }
        if let Some(growth) = &self.growth {
            rows.push((
                "total_growth_pct".to_string(),
                format_number(growth.total_growth_pct.unwrap_or(f64::NAN)),
            ));
            rows.push(("peak_period".to_string(), growth.peak_period.clone()));
        }
        for share in &self.top_categories {
            rows.push((
                share.category.clone(),
                format!(
                    "{} ({}%)",
                    format_number(share.value),
                    format_number(share.share_pct)
                ),
            ));
        }
        if let Some(gap) = &self.gender_gap {
            rows.push((
                "gender_gap".to_string(),
                format!("{} ({})", format_number(gap.ratio), gap.dominant_category),
            ));
        }
        if let Some(comparison) = &self.gap_comparison {
            rows.push((
                "city_gender_gap".to_string(),
                format_number(comparison.reference),
            ));
            rows.push(("gap_notable".to_string(), comparison.notable.to_string()));
        }
        if let Some(risk) = &self.risk {
            rows.push(("risk_level".to_string(), risk.level.clone()));
            if let Some(confidence) = risk.confidence {
                rows.push(("confidence".to_string(), format_number(confidence)));
            }
        }
        rows
    }
}
