//! Threshold policy - named warning/critical cutoffs
//!
//! Global invariants enforced:
//! - Critical is strictly more extreme than warning in the rule's direction
//! - Invalid policies fail at construction, never at query time
//! - Rule declaration order is preserved

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Which side of the cutoffs is abnormal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Rate-type metrics: exceeding the cutoff is bad
    HigherIsWorse,
    /// Capacity-type metrics: falling below the cutoff is bad
    LowerIsWorse,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::HigherIsWorse => "higher-is-worse",
            Direction::LowerIsWorse => "lower-is-worse",
        }
    }

    /// Signed distance of `value` past `cutoff` (positive = worse)
    pub fn excess(&self, value: f64, cutoff: f64) -> f64 {
        match self {
            Direction::HigherIsWorse => value - cutoff,
            Direction::LowerIsWorse => cutoff - value,
        }
    }
}

/// Severity a single threshold assigns to an observed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Breach {
    Critical,
    Warning,
}

/// Warning and critical cutoffs for one rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
    pub direction: Direction,
}

impl Threshold {
    pub fn higher_is_worse(warning: f64, critical: f64) -> Self {
        Threshold {
            warning,
            critical,
            direction: Direction::HigherIsWorse,
        }
    }

    pub fn lower_is_worse(warning: f64, critical: f64) -> Self {
        Threshold {
            warning,
            critical,
            direction: Direction::LowerIsWorse,
        }
    }

    fn validate(&self, rule: &str) -> EngineResult<()> {
        if !self.warning.is_finite() || !self.critical.is_finite() {
            return Err(EngineError::invalid_policy(
                rule,
                format!(
                    "cutoffs must be finite (warning={}, critical={})",
                    self.warning, self.critical
                ),
            ));
        }
        if self.direction.excess(self.critical, self.warning) <= 0.0 {
            return Err(EngineError::invalid_policy(
                rule,
                format!(
                    "critical ({}) must be strictly beyond warning ({}) for {}",
                    self.critical,
                    self.warning,
                    self.direction.as_str()
                ),
            ));
        }
        Ok(())
    }

    /// Classify an observation; cutoffs are inclusive
    pub fn classify(&self, value: f64) -> Option<Breach> {
        if self.direction.excess(value, self.critical) >= 0.0 {
            Some(Breach::Critical)
        } else if self.direction.excess(value, self.warning) >= 0.0 {
            Some(Breach::Warning)
        } else {
            None
        }
    }

    /// Position of `value` on the warning→critical axis
    ///
    /// 0.0 at the warning cutoff, 1.0 at the critical cutoff, linear beyond.
    pub fn progress(&self, value: f64) -> f64 {
        let span = self.direction.excess(self.critical, self.warning);
        self.direction.excess(value, self.warning) / span
    }

    pub fn cutoff(&self, breach: Breach) -> f64 {
        match breach {
            Breach::Critical => self.critical,
            Breach::Warning => self.warning,
        }
    }
}

/// Fixed table of named thresholds shared by scoring and alerting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdPolicy {
    rules: Vec<(String, Threshold)>,
}

impl ThresholdPolicy {
    /// Build a policy, validating every rule up front
    pub fn new<I, S>(rules: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (S, Threshold)>,
        S: Into<String>,
    {
        let mut declared: Vec<(String, Threshold)> = Vec::new();
        for (name, threshold) in rules {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(EngineError::invalid_policy(&name, "rule name must not be empty"));
            }
            if declared.iter().any(|(existing, _)| *existing == name) {
                return Err(EngineError::invalid_policy(&name, "rule declared twice"));
            }
            threshold.validate(&name)?;
            declared.push((name, threshold));
        }
        Ok(ThresholdPolicy { rules: declared })
    }

    /// Policy used by the dashboard when no configuration overrides it
    pub fn dashboard_defaults() -> Self {
        ThresholdPolicy {
            rules: default_rules()
                .into_iter()
                .map(|(name, t)| (name.to_string(), t))
                .collect(),
        }
    }

    pub fn get(&self, rule: &str) -> EngineResult<&Threshold> {
        self.rules
            .iter()
            .find(|(name, _)| name == rule)
            .map(|(_, t)| t)
            .ok_or_else(|| EngineError::unknown_rule(rule))
    }

    pub fn contains(&self, rule: &str) -> bool {
        self.rules.iter().any(|(name, _)| name == rule)
    }

    /// Rules in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Threshold)> {
        self.rules.iter().map(|(name, t)| (name.as_str(), t))
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Replace existing rules by name and append new ones, revalidating
    pub fn with_overrides<I, S>(&self, overrides: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (S, Threshold)>,
        S: Into<String>,
    {
        let mut merged = self.rules.clone();
        for (name, threshold) in overrides {
            let name = name.into();
            match merged.iter_mut().find(|(existing, _)| *existing == name) {
                Some(slot) => slot.1 = threshold,
                None => merged.push((name, threshold)),
            }
        }
        ThresholdPolicy::new(merged)
    }
}

pub const RATE_PER_500: &str = "rate_per_500";
pub const ANNUAL_GROWTH_PCT: &str = "annual_growth_pct";
pub const COUNSELOR_CASELOAD: &str = "counselor_caseload";
pub const TOP3_CONCENTRATION_PCT: &str = "top3_concentration_pct";
pub const GENDER_GAP_RATIO: &str = "gender_gap_ratio";
pub const COUNSELOR_COVERAGE: &str = "counselor_coverage";

fn default_rules() -> [(&'static str, Threshold); 6] {
    [
        (RATE_PER_500, Threshold::higher_is_worse(7.5, 12.5)),
        (ANNUAL_GROWTH_PCT, Threshold::higher_is_worse(10.0, 25.0)),
        (COUNSELOR_CASELOAD, Threshold::higher_is_worse(800.0, 1200.0)),
        (TOP3_CONCENTRATION_PCT, Threshold::higher_is_worse(50.0, 70.0)),
        (GENDER_GAP_RATIO, Threshold::higher_is_worse(1.5, 2.0)),
        (COUNSELOR_COVERAGE, Threshold::lower_is_worse(0.9, 0.6)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let defaults = ThresholdPolicy::dashboard_defaults();
        let rebuilt = ThresholdPolicy::new(defaults.iter().map(|(n, t)| (n, *t)))
            .expect("default rules must pass validation");
        assert_eq!(rebuilt, defaults);
        assert_eq!(defaults.rule_names()[0], RATE_PER_500);
    }

    #[test]
    fn test_reject_inverted_higher_is_worse() {
        let result = ThresholdPolicy::new([("rate", Threshold::higher_is_worse(12.5, 7.5))]);
        assert!(matches!(result, Err(EngineError::InvalidPolicy { .. })));
    }

    #[test]
    fn test_reject_equal_cutoffs() {
        let result = ThresholdPolicy::new([("rate", Threshold::higher_is_worse(5.0, 5.0))]);
        assert!(matches!(result, Err(EngineError::InvalidPolicy { .. })));
    }

    #[test]
    fn test_reject_inverted_lower_is_worse() {
        let result = ThresholdPolicy::new([("coverage", Threshold::lower_is_worse(0.6, 0.9))]);
        assert!(matches!(result, Err(EngineError::InvalidPolicy { .. })));
    }

    #[test]
    fn test_reject_duplicate_and_nan() {
        let dup = ThresholdPolicy::new([
            ("rate", Threshold::higher_is_worse(1.0, 2.0)),
            ("rate", Threshold::higher_is_worse(1.0, 3.0)),
        ]);
        assert!(dup.is_err());
        let nan = ThresholdPolicy::new([("rate", Threshold::higher_is_worse(f64::NAN, 2.0))]);
        assert!(nan.is_err());
    }

    #[test]
    fn test_get_unknown_rule() {
        let policy = ThresholdPolicy::dashboard_defaults();
        assert_eq!(
            policy.get("wait_time"),
            Err(EngineError::UnknownRule {
                rule: "wait_time".to_string()
            })
        );
        assert_eq!(policy.get(RATE_PER_500).unwrap().critical, 12.5);
    }

    #[test]
    fn test_classify_inclusive_cutoffs() {
        let rate = Threshold::higher_is_worse(7.5, 12.5);
        assert_eq!(rate.classify(7.4), None);
        assert_eq!(rate.classify(7.5), Some(Breach::Warning));
        assert_eq!(rate.classify(12.5), Some(Breach::Critical));
        assert_eq!(rate.classify(14.0), Some(Breach::Critical));

        let coverage = Threshold::lower_is_worse(0.9, 0.6);
        assert_eq!(coverage.classify(1.0), None);
        assert_eq!(coverage.classify(0.8), Some(Breach::Warning));
        assert_eq!(coverage.classify(0.5), Some(Breach::Critical));
    }

    #[test]
    fn test_progress_is_directional() {
        let coverage = Threshold::lower_is_worse(0.9, 0.6);
        assert!((coverage.progress(0.9)).abs() < 1e-12);
        assert!((coverage.progress(0.6) - 1.0).abs() < 1e-12);
        assert!(coverage.progress(1.2) < 0.0);
    }

    #[test]
    fn test_overrides_replace_and_append() {
        let policy = ThresholdPolicy::dashboard_defaults()
            .with_overrides([
                (RATE_PER_500, Threshold::higher_is_worse(5.0, 10.0)),
                ("wait_days", Threshold::higher_is_worse(15.0, 30.0)),
            ])
            .unwrap();
        assert_eq!(policy.get(RATE_PER_500).unwrap().warning, 5.0);
        assert_eq!(policy.rule_names().last(), Some(&"wait_days"));
        assert_eq!(policy.len(), 7);
    }
}
