//! Reporting and output generation
//!
//! Every result type flattens to `(label, value)` rows; text and CSV output
//! are rendered from those rows, JSON straight from the result types.
//!
//! Global invariants enforced:
//! - Deterministic output ordering
//! - Byte-for-byte identical output across runs

use crate::alerts::{Alert, AlertSummary};
use crate::indicators::IndicatorBundle;
use crate::ranking::{GapComparison, GapRatio, GapTrend, GroupGap, RankingResult};
use crate::risk::RiskAssessment;
use crate::scoring::{ScoreBreakdown, SemaphoreReading};
use crate::segments::LabelCount;
use crate::thresholds::Breach;
use crate::trends::{GrowthStatistics, ProjectedRate, ProjectionResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One flattened output row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReportRow {
    pub section: String,
    pub label: String,
    pub value: String,
}

/// Flattening into `(label, value)` pairs
pub trait Flatten {
    fn flatten(&self) -> Vec<(String, String)>;

    /// Flattened pairs tagged with a section name
    fn report_rows(&self, section: &str) -> Vec<ReportRow> {
        self.flatten()
            .into_iter()
            .map(|(label, value)| ReportRow {
                section: section.to_string(),
                label,
                value,
            })
            .collect()
    }
}

/// Fixed-precision number formatting shared by every renderer
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        "-".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

fn pair(label: impl Into<String>, value: impl Into<String>) -> (String, String) {
    (label.into(), value.into())
}

fn num(label: impl Into<String>, value: f64) -> (String, String) {
    pair(label, format_number(value))
}

pub fn breach_label(breach: Breach) -> &'static str {
    match breach {
        Breach::Critical => "CRITICAL",
        Breach::Warning => "WARNING",
    }
}

impl Flatten for RiskAssessment {
    fn flatten(&self) -> Vec<(String, String)> {
        vec![num("score", self.score), pair("level", self.level.as_str())]
    }
}

impl Flatten for ScoreBreakdown {
    fn flatten(&self) -> Vec<(String, String)> {
        let mut rows = self.assessment.flatten();
        rows.push(pair("dominant", self.dominant.as_str()));
        for sub in &self.sub_scores {
            rows.push(num(format!("{}.value", sub.indicator), sub.value));
            rows.push(num(format!("{}.sub_score", sub.indicator), sub.score));
        }
        rows
    }
}

impl Flatten for SemaphoreReading {
    fn flatten(&self) -> Vec<(String, String)> {
        let mut rows = self.assessment.flatten();
        rows.push(pair("source", self.source.as_str()));
        if let Some(disagreement) = self.disagreement {
            rows.push(pair("disagreement", disagreement.to_string()));
        }
        rows
    }
}

impl Flatten for IndicatorBundle {
    fn flatten(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(name, value)| num(name, value.unwrap_or(f64::NAN)))
            .collect()
    }
}

impl Flatten for [Alert] {
    fn flatten(&self) -> Vec<(String, String)> {
        let mut rows = Vec::with_capacity(self.len() * 4);
        for alert in self {
            let name = &alert.rule_name;
            rows.push(pair(format!("{}.level", name), breach_label(alert.level)));
            rows.push(num(format!("{}.observed", name), alert.observed_value));
            rows.push(num(format!("{}.threshold", name), alert.threshold_value));
            rows.push(pair(
                format!("{}.recommendation", name),
                alert.recommendation_text.as_str(),
            ));
        }
        rows
    }
}

impl Flatten for AlertSummary {
    fn flatten(&self) -> Vec<(String, String)> {
        vec![
            pair("critical", self.critical.to_string()),
            pair("warning", self.warning.to_string()),
        ]
    }
}

impl Flatten for RankingResult {
    fn flatten(&self) -> Vec<(String, String)> {
        let mut rows: Vec<(String, String)> = self
            .ordered_entities
            .iter()
            .map(|e| num(e.entity_id.as_str(), e.value))
            .collect();
        rows.push(num("total", self.total));
        rows.push(num(format!("top{}_share_pct", self.top_n), self.top_n_share));
        rows
    }
}

impl Flatten for GapRatio {
    fn flatten(&self) -> Vec<(String, String)> {
        vec![
            pair("dominant_category", self.dominant_category.as_str()),
            num(self.dominant_category.as_str(), self.dominant_value),
            num(self.minority_category.as_str(), self.minority_value),
            num("ratio", self.ratio),
            pair("severity", self.severity().as_str()),
        ]
    }
}

impl Flatten for [GroupGap] {
    fn flatten(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|g| {
                pair(
                    g.group.as_str(),
                    format!(
                        "{} ({}, {})",
                        format_number(g.gap.ratio),
                        g.gap.dominant_category,
                        g.gap.severity().as_str()
                    ),
                )
            })
            .collect()
    }
}

impl Flatten for GapComparison {
    fn flatten(&self) -> Vec<(String, String)> {
        vec![
            num("local", self.local),
            num("reference", self.reference),
            num("difference", self.difference),
            pair("notable", self.notable.to_string()),
        ]
    }
}

impl Flatten for GapTrend {
    fn flatten(&self) -> Vec<(String, String)> {
        vec![
            num("first", self.first),
            num("last", self.last),
            num("change_pct", self.change_pct),
            pair("direction", self.direction.as_str()),
        ]
    }
}

impl Flatten for ProjectionResult {
    fn flatten(&self) -> Vec<(String, String)> {
        vec![
            num("point_estimate", self.point_estimate),
            num("lower_bound", self.lower_bound),
            num("upper_bound", self.upper_bound),
            num("model_a_estimate", self.model_a_estimate),
            num("model_b_estimate", self.model_b_estimate),
            num("growth_rate_pct", self.growth_rate * 100.0),
        ]
    }
}

impl Flatten for ProjectedRate {
    fn flatten(&self) -> Vec<(String, String)> {
        vec![
            num("point_rate", self.point_rate),
            num("model_a_rate", self.model_a_rate),
            num("model_b_rate", self.model_b_rate),
            pair("level", self.level.as_str()),
        ]
    }
}

impl Flatten for GrowthStatistics {
    fn flatten(&self) -> Vec<(String, String)> {
        let mut rows: Vec<(String, String)> = self
            .variations
            .iter()
            .map(|v| num(format!("{}.variation_pct", v.period), v.variation_pct))
            .collect();
        rows.push(num("mean_variation_pct", self.mean_variation_pct));
        rows.push(num("max_variation_pct", self.max_variation_pct));
        rows.push(num("min_variation_pct", self.min_variation_pct));
        rows.push(num("volatility_pct", self.volatility_pct));
        rows.push(num(
            "total_growth_pct",
            self.total_growth_pct.unwrap_or(f64::NAN),
        ));
        rows.push(pair("peak_period", self.peak_period.as_str()));
        rows.push(pair("direction", self.direction.as_str()));
        rows
    }
}

impl Flatten for [LabelCount] {
    fn flatten(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|c| pair(c.label.as_str(), c.count.to_string()))
            .collect()
    }
}

impl<T> Flatten for Vec<T>
where
    [T]: Flatten,
{
    fn flatten(&self) -> Vec<(String, String)> {
        self.as_slice().flatten()
    }
}

/// Render rows as aligned text, one block per section
pub fn render_text(rows: &[ReportRow]) -> String {
    let mut output = String::new();
    let mut current: Option<&str> = None;

    for row in rows {
        if current != Some(row.section.as_str()) {
            if current.is_some() {
                output.push('\n');
            }
            output.push_str(&format!("== {} ==\n", row.section));
            current = Some(row.section.as_str());
        }
        output.push_str(&format!(
            "{} {}\n",
            truncate_or_pad(&row.label, 32),
            row.value
        ));
    }

    output
}

/// Render rows as CSV with a `section,label,value` header
pub fn render_csv(rows: &[ReportRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).context("failed to write CSV row")?;
    }
    let bytes = writer.into_inner().context("failed to flush CSV output")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

/// Render any result as pretty JSON
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
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
