//! Indicator bundles and standard indicator derivation
//!
//! An indicator is a single named measure. A bundle keeps indicators in
//! insertion order so scoring and alerting see a stable sequence.

use crate::error::{EngineError, EngineResult};
use crate::table::MetricTable;
use crate::thresholds::{ANNUAL_GROWTH_PCT, COUNSELOR_CASELOAD, RATE_PER_500};
use crate::trends::chronological_series;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const COUNSELORS_NEEDED: &str = "counselors_needed";

/// Students covered by one counselor under the 1:500 norm
pub const DEFAULT_STUDENTS_PER_COUNSELOR: f64 = 500.0;

/// Population base of the attention rate indicator
pub const RATE_BASE: f64 = 500.0;

/// Ordered set of named indicator values (absent values allowed)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorBundle {
    entries: Vec<(String, Option<f64>)>,
}

impl IndicatorBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) an indicator; non-finite values are stored as absent
    pub fn set(&mut self, name: impl Into<String>, value: Option<f64>) {
        let name = name.into();
        let value = value.filter(|v| v.is_finite());
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Builder form of [`IndicatorBundle::set`] for a present value
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.set(name, Some(value));
        self
    }

    /// Builder form declaring an indicator with no observation
    pub fn missing(mut self, name: impl Into<String>) -> Self {
        self.set(name, None);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Indicators carrying a value
    pub fn present(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries
            .iter()
            .filter_map(|(n, v)| v.map(|value| (n.as_str(), value)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fill absent entries from `other` without overriding present ones
    pub fn merge_missing(&mut self, other: &IndicatorBundle) {
        for (name, value) in other.iter() {
            if self.get(name).is_none() {
                self.set(name, value);
            }
        }
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for IndicatorBundle {
    fn from_iter<T: IntoIterator<Item = (S, f64)>>(iter: T) -> Self {
        let mut bundle = IndicatorBundle::new();
        for (name, value) in iter {
            bundle.set(name, Some(value));
        }
        bundle
    }
}

/// Column names of the yearly integrated table
#[derive(Debug, Clone)]
pub struct YearlyColumns<'a> {
    pub period: &'a str,
    pub attentions: &'a str,
    pub enrollment: &'a str,
}

impl Default for YearlyColumns<'_> {
    fn default() -> Self {
        YearlyColumns {
            period: "year",
            attentions: "attentions",
            enrollment: "enrollment",
        }
    }
}

/// Derive the standard indicators from the latest period of the yearly table
///
/// Produces `rate_per_500`, `annual_growth_pct`, `counselors_needed` and
/// `counselor_caseload`. Growth is absent with a single period or a zero
/// previous period.
pub fn derive_indicators(
    yearly: &MetricTable,
    columns: &YearlyColumns<'_>,
    students_per_counselor: f64,
) -> EngineResult<IndicatorBundle> {
    if students_per_counselor <= 0.0 {
        return Err(EngineError::division_by_zero(
            "students per counselor must be positive",
        ));
    }

    let attentions = chronological_series(yearly, columns.period, columns.attentions)?;
    let enrollment = chronological_series(yearly, columns.period, columns.enrollment)?;

    let (Some(latest), Some(latest_enrollment)) = (attentions.last(), enrollment.last()) else {
        return Err(EngineError::InsufficientData {
            reason: "yearly table has no periods".to_string(),
        });
    };

    let mut bundle = IndicatorBundle::new();

    let rate = (latest_enrollment.value > 0.0)
        .then(|| latest.value / latest_enrollment.value * RATE_BASE);
    bundle.set(RATE_PER_500, rate);

    let growth = match attentions.len() {
        0 | 1 => None,
        n => {
            let previous = attentions[n - 2].value;
            (previous != 0.0).then(|| (latest.value - previous) / previous * 100.0)
        }
    };
    bundle.set(ANNUAL_GROWTH_PCT, growth);

    let counselors = (latest_enrollment.value / students_per_counselor).ceil();
    bundle.set(COUNSELORS_NEEDED, Some(counselors));
    bundle.set(
        COUNSELOR_CASELOAD,
        (counselors > 0.0).then(|| latest.value / counselors),
    );

    debug!(
        period = %latest.period,
        attentions = latest.value,
        enrollment = latest_enrollment.value,
        "derived yearly indicators"
    );

    Ok(bundle)
}
