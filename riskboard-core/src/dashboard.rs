//! Dashboard assembly
//!
//! Runs every engine computation over a loaded dataset and turns each failure
//! into an unavailable panel instead of aborting the whole dashboard.
//!
//! Global invariants enforced:
//! - One panel failing never hides the others
//! - Panels are recomputed on every build (no cached derived state)
//! - Deterministic panel order

use crate::alerts::{Alert, AlertSummary, Alerter};
use crate::config::ResolvedConfig;
use crate::error::{EngineError, EngineResult};
use crate::indicators::{derive_indicators, IndicatorBundle, YearlyColumns};
use crate::loader::DatasetBundle;
use crate::profile::{locality_profile, LocalityProfile, ProfileColumns};
use crate::ranking::{
    compare_gap, gap_ratio, gap_ratio_by, gap_trend, rank_table, ranked_gaps, GapComparison,
    GapRatio, GapTrend, GroupGap, RankingResult,
};
use crate::report::{format_number, Flatten, ReportRow};
use crate::scoring::{resolve_semaphore, ScoreBreakdown, Scorer, SemaphoreReading};
use crate::segments::{distribution, members_by, top_mean, LabelCount};
use crate::table::{Aggregation, MetricTable};
use crate::thresholds::{GENDER_GAP_RATIO, RATE_PER_500, TOP3_CONCENTRATION_PCT};
use crate::trends::{
    chronological_series, growth_statistics, project, projected_rate, GrowthStatistics,
    ProjectedRate, ProjectionResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const YEAR: &str = "year";
pub const ATTENTIONS: &str = "attentions";
pub const ENROLLMENT: &str = "enrollment";
pub const LOCALITY: &str = "locality";
pub const GENDER: &str = "gender";
pub const DISORDER_CATEGORY: &str = "disorder_category";
pub const RISK_LEVEL: &str = "risk_level";
pub const CONFIDENCE: &str = "confidence";
pub const CLUSTER_LABEL: &str = "cluster_label";

/// Entities averaged for the classification confidence panel
const CONFIDENCE_TOP_N: usize = 3;

/// Largest disorder categories covered by the per-disorder gender gaps
const DISORDER_GAP_TOP_N: usize = 8;

/// One dashboard section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel<T> {
    Ready(T),
    Unavailable { reason: String },
}

impl<T> Panel<T> {
    pub fn from_result(panel: &str, result: EngineResult<T>) -> Self {
        match result {
            Ok(value) => Panel::Ready(value),
            Err(err) => {
                debug!(panel, error = %err, "panel unavailable");
                Panel::Unavailable {
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Panel::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Panel::Ready(value) => Some(value),
            Panel::Unavailable { .. } => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Panel::Ready(_))
    }
}

impl<T: Flatten> Flatten for Panel<T> {
    fn flatten(&self) -> Vec<(String, String)> {
        match self {
            Panel::Ready(value) => value.flatten(),
            Panel::Unavailable { reason } => vec![("unavailable".to_string(), reason.clone())],
        }
    }
}

/// Gender gap of one locality set against the city-wide gap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LocalityGap {
    pub locality: String,
    pub gap: GapRatio,
    pub comparison: GapComparison,
}

impl Flatten for [LocalityGap] {
    fn flatten(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|g| {
                let marker = if g.comparison.notable { " *" } else { "" };
                (
                    g.locality.clone(),
                    format!(
                        "{} ({}){}",
                        format_number(g.gap.ratio),
                        g.gap.dominant_category,
                        marker
                    ),
                )
            })
            .collect()
    }
}

/// Entities grouped by label
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Membership(pub BTreeMap<String, Vec<String>>);

impl Flatten for Membership {
    fn flatten(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(label, members)| (label.clone(), members.join(", ")))
            .collect()
    }
}

/// Mean classification confidence of the most confident entities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfidenceSummary {
    pub top_n: usize,
    pub mean: f64,
}

impl Flatten for ConfidenceSummary {
    fn flatten(&self) -> Vec<(String, String)> {
        vec![(
            format!("top{}_mean_confidence", self.top_n),
            format_number(self.mean),
        )]
    }
}

/// Every panel of the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Dashboard {
    pub indicators: IndicatorBundle,
    pub semaphore: Panel<SemaphoreReading>,
    pub score: Panel<ScoreBreakdown>,
    pub alerts: Panel<Vec<Alert>>,
    pub alert_summary: Panel<AlertSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub precomputed_alerts: Vec<Alert>,
    pub locality_ranking: Panel<RankingResult>,
    pub disorder_ranking: Panel<RankingResult>,
    pub gender_gap: Panel<GapRatio>,
    pub locality_gaps: Panel<Vec<LocalityGap>>,
    pub disorder_gaps: Panel<Vec<GroupGap>>,
    pub gender_gap_trend: Panel<GapTrend>,
    pub growth: Panel<GrowthStatistics>,
    pub projection: Panel<ProjectionResult>,
    pub projected_rate: Panel<ProjectedRate>,
    pub risk_distribution: Panel<Vec<LabelCount>>,
    pub risk_members: Panel<Membership>,
    pub classification_confidence: Panel<ConfidenceSummary>,
    pub clusters: Panel<Membership>,
}

impl Dashboard {
    /// Flatten every panel into sectioned rows
    pub fn report_rows(&self) -> Vec<ReportRow> {
        let mut rows = Vec::new();
        rows.extend(self.semaphore.report_rows("semaphore"));
        rows.extend(self.indicators.report_rows("indicators"));
        rows.extend(self.score.report_rows("score"));
        rows.extend(self.alert_summary.report_rows("alert_summary"));
        rows.extend(self.alerts.report_rows("alerts"));
        rows.extend(self.precomputed_alerts.report_rows("precomputed_alerts"));
        rows.extend(self.locality_ranking.report_rows("locality_ranking"));
        rows.extend(self.disorder_ranking.report_rows("disorder_ranking"));
        rows.extend(self.gender_gap.report_rows("gender_gap"));
        rows.extend(self.locality_gaps.report_rows("locality_gaps"));
        rows.extend(self.disorder_gaps.report_rows("disorder_gaps"));
        rows.extend(self.gender_gap_trend.report_rows("gender_gap_trend"));
        rows.extend(self.growth.report_rows("growth"));
        rows.extend(self.projection.report_rows("projection"));
        rows.extend(self.projected_rate.report_rows("projected_rate"));
        rows.extend(self.risk_distribution.report_rows("risk_distribution"));
        rows.extend(self.risk_members.report_rows("risk_members"));
        rows.extend(
            self.classification_confidence
                .report_rows("classification_confidence"),
        );
        rows.extend(self.clusters.report_rows("clusters"));
        rows
    }

    pub fn unavailable_count(&self) -> usize {
        [
            self.semaphore.is_ready(),
            self.score.is_ready(),
            self.alerts.is_ready(),
            self.locality_ranking.is_ready(),
            self.disorder_ranking.is_ready(),
            self.gender_gap.is_ready(),
            self.locality_gaps.is_ready(),
            self.disorder_gaps.is_ready(),
            self.gender_gap_trend.is_ready(),
            self.growth.is_ready(),
            self.projection.is_ready(),
            self.projected_rate.is_ready(),
            self.risk_distribution.is_ready(),
            self.risk_members.is_ready(),
            self.classification_confidence.is_ready(),
            self.clusters.is_ready(),
        ]
        .iter()
        .filter(|ready| !**ready)
        .count()
    }
}

/// Indicators known to the policy, in bundle order
fn scoreable(indicators: &IndicatorBundle, config: &ResolvedConfig) -> IndicatorBundle {
    let mut bundle = IndicatorBundle::new();
    for (name, value) in indicators.iter() {
        if config.policy.contains(name) {
            bundle.set(name, value);
        }
    }
    bundle
}

/// Gender gap per locality, skipping localities without both categories
fn locality_gaps(morbidity: &MetricTable, city: &GapRatio) -> EngineResult<Vec<LocalityGap>> {
    let mut gaps = Vec::new();
    for locality in morbidity.distinct(LOCALITY)? {
        let subset = morbidity.filter_eq(LOCALITY, &locality)?;
        match gap_ratio(&subset, GENDER, ATTENTIONS) {
            Ok(gap) => gaps.push(LocalityGap {
                comparison: compare_gap(gap.ratio, city.ratio),
                locality,
                gap,
            }),
            Err(err) => debug!(locality = %locality, error = %err, "no gender gap for locality"),
        }
    }
    Ok(gaps)
}

fn gender_gap_trend(morbidity: &MetricTable) -> EngineResult<GapTrend> {
    let per_year = gap_ratio_by(morbidity, YEAR, GENDER, ATTENTIONS)?;
    let mut years: Vec<(&String, f64)> = per_year.iter().map(|(y, g)| (y, g.ratio)).collect();
    years.sort_by(|a, b| match (a.0.parse::<f64>(), b.0.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        _ => a.0.cmp(b.0),
    });
    let ratios: Vec<f64> = years.into_iter().map(|(_, r)| r).collect();
    gap_trend(&ratios)
}

fn optional_table<'a>(
    table: &'a Option<MetricTable>,
    name: &str,
) -> EngineResult<&'a MetricTable> {
    table.as_ref().ok_or_else(|| EngineError::InsufficientData {
        reason: format!("{} table not provided", name),
    })
}

/// Profile of one locality of a loaded dataset
pub fn locality_profile_for(data: &DatasetBundle, name: &str) -> EngineResult<LocalityProfile> {
    let columns = ProfileColumns {
        period: YEAR,
        locality: LOCALITY,
        gender: GENDER,
        category: DISORDER_CATEGORY,
        measure: ATTENTIONS,
        risk_level: RISK_LEVEL,
        confidence: CONFIDENCE,
    };
    locality_profile(&data.morbidity, data.classification.as_ref(), name, &columns)
}

/// Build every dashboard panel from a dataset
pub fn build_dashboard(data: &DatasetBundle, config: &ResolvedConfig) -> Dashboard {
    let yearly_columns = YearlyColumns {
        period: YEAR,
        attentions: ATTENTIONS,
        enrollment: ENROLLMENT,
    };

    // Indicators
    let mut indicators =
        match derive_indicators(&data.yearly, &yearly_columns, config.students_per_counselor) {
            Ok(bundle) => bundle,
            Err(err) => {
                debug!(error = %err, "yearly indicators unavailable");
                IndicatorBundle::new()
            }
        };

    let locality_ranking = Panel::from_result(
        "locality_ranking",
        rank_table(
            &data.morbidity,
            LOCALITY,
            ATTENTIONS,
            Aggregation::Sum,
            config.top_n,
        ),
    );
    let top3 = rank_table(&data.morbidity, LOCALITY, ATTENTIONS, Aggregation::Sum, 3)
        .ok()
        .map(|r| r.top_n_share);
    indicators.set(TOP3_CONCENTRATION_PCT, top3);

    let gender_gap = Panel::from_result(
        "gender_gap",
        gap_ratio(&data.morbidity, GENDER, ATTENTIONS),
    );
    indicators.set(GENDER_GAP_RATIO, gender_gap.ready().map(|g| g.ratio));

    let precomputed = data.kpis.as_ref();
    if let Some(kpis) = precomputed {
        indicators.merge_missing(&kpis.indicator_bundle());
    }

    // Semaphore and alerts
    let scored = scoreable(&indicators, config);
    let scorer = Scorer::with_bands(&config.policy, config.bands);
    let score = Panel::from_result("score", scorer.score(&scored));
    let semaphore = Panel::from_result(
        "semaphore",
        resolve_semaphore(
            config.semaphore_source,
            score.ready().map(|s| s.assessment),
            precomputed
                .and_then(|k| k.semaphore.as_ref())
                .map(|s| s.assessment(&config.bands)),
        ),
    );

    let alerter = Alerter::new(&config.policy, config.alert_rules.clone());
    let alerts = Panel::from_result("alerts", alerter.evaluate(&indicators));
    let alert_summary = match alerts.ready() {
        Some(list) => Panel::Ready(AlertSummary::from_alerts(list)),
        None => Panel::unavailable("alerts unavailable"),
    };

    // Rankings and gaps
    let disorder_ranking = Panel::from_result(
        "disorder_ranking",
        rank_table(
            &data.morbidity,
            DISORDER_CATEGORY,
            ATTENTIONS,
            Aggregation::Sum,
            config.top_n,
        ),
    );
    let locality_gaps = match gender_gap.ready() {
        Some(city) => Panel::from_result("locality_gaps", locality_gaps(&data.morbidity, city)),
        None => Panel::unavailable("city-wide gender gap unavailable"),
    };
    let disorder_gaps = Panel::from_result(
        "disorder_gaps",
        ranked_gaps(
            &data.morbidity,
            DISORDER_CATEGORY,
            GENDER,
            ATTENTIONS,
            DISORDER_GAP_TOP_N,
        ),
    );
    let gender_gap_trend =
        Panel::from_result("gender_gap_trend", gender_gap_trend(&data.morbidity));

    // Trends
    let series = chronological_series(&data.yearly, YEAR, ATTENTIONS);
    let growth = Panel::from_result(
        "growth",
        series.clone().and_then(|s| growth_statistics(&s)),
    );
    let projection = Panel::from_result(
        "projection",
        series.and_then(|s| project(&s.iter().map(|p| p.value).collect::<Vec<_>>())),
    );
    let projected = match projection.ready() {
        Some(p) => chronological_series(&data.yearly, YEAR, ENROLLMENT).and_then(|enrollment| {
            let latest = enrollment.last().map(|e| e.value).unwrap_or(0.0);
            let threshold = config.policy.get(RATE_PER_500)?;
            projected_rate(p, latest, config.rate_base, threshold)
        }),
        None => Err(EngineError::InsufficientData {
            reason: "projection unavailable".to_string(),
        }),
    };
    let projected_rate = Panel::from_result("projected_rate", projected);

    // Segments
    let classification = optional_table(&data.classification, "classification");
    let risk_distribution = Panel::from_result(
        "risk_distribution",
        classification.clone().and_then(|t| distribution(t, RISK_LEVEL)),
    );
    let risk_members = Panel::from_result(
        "risk_members",
        classification
            .clone()
            .and_then(|t| members_by(t, RISK_LEVEL, LOCALITY))
            .map(Membership),
    );
    let classification_confidence = Panel::from_result(
        "classification_confidence",
        classification.and_then(|t| {
            top_mean(t, CONFIDENCE, CONFIDENCE_TOP_N)?
                .map(|mean| ConfidenceSummary {
                    top_n: CONFIDENCE_TOP_N,
                    mean,
                })
                .ok_or_else(|| EngineError::InsufficientData {
                    reason: format!("no numeric {} values", CONFIDENCE),
                })
        }),
    );
    let clusters = Panel::from_result(
        "clusters",
        optional_table(&data.clustering, "clustering")
            .and_then(|t| members_by(t, CLUSTER_LABEL, LOCALITY))
            .map(Membership),
    );

    let dashboard = Dashboard {
        indicators,
        semaphore,
        score,
        alerts,
        alert_summary,
        precomputed_alerts: precomputed.map(|k| k.alerts()).unwrap_or_default(),
        locality_ranking,
        disorder_ranking,
        gender_gap,
        locality_gaps,
        disorder_gaps,
        gender_gap_trend,
        growth,
        projection,
        projected_rate,
        risk_distribution,
        risk_members,
        classification_confidence,
        clusters,
    };

    info!(
        root = %data.root.display(),
        unavailable = dashboard.unavailable_count(),
        "dashboard built"
    );
    dashboard
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::table_from_reader;
    use crate::risk::RiskLevel;
    use std::path::PathBuf;

    fn dataset() -> DatasetBundle {
        let yearly = "year,attentions,enrollment\n2023,1200,100000\n2024,1500,100000\n";
        let morbidity = "year,locality,gender,disorder_category,attentions\n\
            2023,Kennedy,F,Anxiety,300\n\
            2023,Kennedy,M,Anxiety,100\n\
            2024,Suba,F,Depression,150\n\
            2024,Suba,M,Depression,150\n\
            2024,Bosa,F,Anxiety,90\n";
        DatasetBundle {
            root: PathBuf::from("."),
            yearly: table_from_reader(yearly.as_bytes()).unwrap(),
            morbidity: table_from_reader(morbidity.as_bytes()).unwrap(),
            classification: None,
            clustering: None,
            kpis: None,
        }
    }

    #[test]
    fn test_dashboard_panels() {
        let config = ResolvedConfig::defaults().unwrap();
        let dashboard = build_dashboard(&dataset(), &config);

        assert_eq!(dashboard.indicators.get(RATE_PER_500), Some(7.5));
        let semaphore = dashboard.semaphore.ready().unwrap();
        assert_eq!(semaphore.assessment.level, RiskLevel::Critical);

        let ranking = dashboard.locality_ranking.ready().unwrap();
        assert_eq!(ranking.ordered_entities[0].entity_id, "Kennedy");

        // Bosa has a single gender and is skipped
        let gaps = dashboard.locality_gaps.ready().unwrap();
        assert_eq!(gaps.len(), 2);

        // Anxiety F 390 / M 100, Depression balanced at 150 each
        let disorders = dashboard.disorder_gaps.ready().unwrap();
        let listed: Vec<(&str, f64)> = disorders
            .iter()
            .map(|g| (g.group.as_str(), g.gap.ratio))
            .collect();
        assert_eq!(listed, vec![("Anxiety", 3.9), ("Depression", 1.0)]);
        assert_eq!(disorders[0].gap.dominant_category, "F");

        assert!(dashboard.projection.is_ready());
        assert!(dashboard.projected_rate.is_ready());
        assert!(!dashboard.risk_distribution.is_ready());
        assert!(!dashboard.clusters.is_ready());
    }

    #[test]
    fn test_unavailable_panels_render_reason() {
        let config = ResolvedConfig::defaults().unwrap();
        let dashboard = build_dashboard(&dataset(), &config);
        let rows = dashboard.report_rows();
        let clusters: Vec<&ReportRow> = rows.iter().filter(|r| r.section == "clusters").collect();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].label, "unavailable");
        assert!(clusters[0].value.contains("clustering"));
    }

    #[test]
    fn test_single_year_dataset_keeps_other_panels() {
        let mut data = dataset();
        data.yearly =
            table_from_reader("year,attentions,enrollment\n2024,1500,100000\n".as_bytes()).unwrap();
        let config = ResolvedConfig::defaults().unwrap();
        let dashboard = build_dashboard(&data, &config);
        assert!(matches!(dashboard.projection, Panel::Unavailable { .. }));
        assert!(dashboard.locality_ranking.is_ready());
        assert!(dashboard.semaphore.is_ready());
    }
}
