//! Rule-based alerting
//!
//! Evaluates declared indicator rules against the threshold policy.
//!
//! Global invariants enforced:
//! - At most one alert per rule (critical suppresses warning)
//! - CRITICAL alerts sort before WARNING alerts
//! - Ties keep rule declaration order
//! - Evaluation is a pure query (no IO, no state)

use crate::error::EngineResult;
use crate::indicators::IndicatorBundle;
use crate::thresholds::{
    Breach, ThresholdPolicy, ANNUAL_GROWTH_PCT, COUNSELOR_CASELOAD, COUNSELOR_COVERAGE,
    GENDER_GAP_RATIO, RATE_PER_500, TOP3_CONCENTRATION_PCT,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One declared alert rule: an indicator plus the advice shown when it fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct AlertRule {
    pub rule: String,
    pub recommendation: String,
}

impl AlertRule {
    pub fn new(rule: impl Into<String>, recommendation: impl Into<String>) -> Self {
        AlertRule {
            rule: rule.into(),
            recommendation: recommendation.into(),
        }
    }
}

/// Emitted alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Alert {
    pub rule_name: String,
    pub level: Breach,
    pub observed_value: f64,
    /// Cutoff that was crossed
    pub threshold_value: f64,
    pub recommendation_text: String,
}

/// Alert counts by level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AlertSummary {
    pub critical: usize,
    pub warning: usize,
}

impl AlertSummary {
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        alerts.iter().fold(AlertSummary::default(), |mut acc, a| {
            match a.level {
                Breach::Critical => acc.critical += 1,
                Breach::Warning => acc.warning += 1,
            }
            acc
        })
    }

    pub fn total(&self) -> usize {
        self.critical + self.warning
    }

    pub fn is_clear(&self) -> bool {
        self.total() == 0
    }
}

/// Evaluates a fixed rule list against a threshold policy
#[derive(Debug, Clone)]
pub struct Alerter<'a> {
    policy: &'a ThresholdPolicy,
    rules: Vec<AlertRule>,
}

impl<'a> Alerter<'a> {
    pub fn new(policy: &'a ThresholdPolicy, rules: Vec<AlertRule>) -> Self {
        Alerter { policy, rules }
    }

    /// Alerter over every rule in [`default_alert_rules`]
    pub fn with_default_rules(policy: &'a ThresholdPolicy) -> Self {
        Self::new(policy, default_alert_rules())
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Evaluate every rule against the observed indicators
    ///
    /// Rules without an observation emit nothing. Every rule must be declared
    /// in the policy, observed or not.
    pub fn evaluate(&self, indicators: &IndicatorBundle) -> EngineResult<Vec<Alert>> {
        let mut alerts = Vec::new();

        for rule in &self.rules {
            let threshold = self.policy.get(&rule.rule)?;
            let Some(observed) = indicators.get(&rule.rule) else {
                debug!(rule = %rule.rule, "no observation, skipping rule");
                continue;
            };

            if let Some(level) = threshold.classify(observed) {
                alerts.push(Alert {
                    rule_name: rule.rule.clone(),
                    level,
                    observed_value: observed,
                    threshold_value: threshold.cutoff(level),
                    recommendation_text: rule.recommendation.clone(),
                });
            }
        }

        // Stable sort keeps declaration order within each level
        alerts.sort_by_key(|alert| alert.level);
        Ok(alerts)
    }
}

/// Recommendation text for each rule of the dashboard default policy
pub fn default_alert_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new(
            RATE_PER_500,
            "Reinforce psychosocial support and review counselor allocation",
        ),
        AlertRule::new(
            ANNUAL_GROWTH_PCT,
            "Investigate the drivers of the year-over-year increase in attentions",
        ),
        AlertRule::new(
            COUNSELOR_CASELOAD,
            "Hire additional counselors to reach the 1:500 ratio",
        ),
        AlertRule::new(
            TOP3_CONCENTRATION_PCT,
            "Prioritize interventions in the three localities with most attentions",
        ),
        AlertRule::new(
            GENDER_GAP_RATIO,
            "Design gender-focused prevention programs",
        ),
        AlertRule::new(
            COUNSELOR_COVERAGE,
            "Expand counselor coverage in under-served schools",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::thresholds::Threshold;

    #[test]
    fn test_critical_suppresses_warning() {
        let policy = ThresholdPolicy::dashboard_defaults();
        let alerter = Alerter::with_default_rules(&policy);
        let bundle = IndicatorBundle::new().with(RATE_PER_500, 14.0);
        let alerts = alerter.evaluate(&bundle).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, Breach::Critical);
        assert_eq!(alerts[0].threshold_value, 12.5);
        assert_eq!(alerts[0].observed_value, 14.0);
    }

    #[test]
    fn test_critical_sorts_first_then_declaration_order() {
        let policy = ThresholdPolicy::dashboard_defaults();
        let alerter = Alerter::with_default_rules(&policy);
        let bundle = IndicatorBundle::new()
            .with(GENDER_GAP_RATIO, 1.6)
            .with(RATE_PER_500, 8.0)
            .with(COUNSELOR_COVERAGE, 0.5)
            .with(ANNUAL_GROWTH_PCT, 30.0);
        let alerts = alerter.evaluate(&bundle).unwrap();
        let order: Vec<(&str, Breach)> = alerts
            .iter()
            .map(|a| (a.rule_name.as_str(), a.level))
            .collect();
        assert_eq!(
            order,
            vec![
                (ANNUAL_GROWTH_PCT, Breach::Critical),
                (COUNSELOR_COVERAGE, Breach::Critical),
                (RATE_PER_500, Breach::Warning),
                (GENDER_GAP_RATIO, Breach::Warning),
            ]
        );
    }

    #[test]
    fn test_values_below_warning_emit_nothing() {
        let policy = ThresholdPolicy::dashboard_defaults();
        let alerter = Alerter::with_default_rules(&policy);
        let bundle = IndicatorBundle::new()
            .with(RATE_PER_500, 3.0)
            .with(COUNSELOR_COVERAGE, 1.0)
            .missing(COUNSELOR_CASELOAD);
        let alerts = alerter.evaluate(&bundle).unwrap();
        assert!(alerts.is_empty());
        assert!(AlertSummary::from_alerts(&alerts).is_clear());
    }

    #[test]
    fn test_undeclared_rule_fails() {
        let policy =
            ThresholdPolicy::new([(RATE_PER_500, Threshold::higher_is_worse(7.5, 12.5))]).unwrap();
        let alerter = Alerter::new(&policy, vec![AlertRule::new("wait_days", "shorten waits")]);
        assert_eq!(
            alerter.evaluate(&IndicatorBundle::new()),
            Err(EngineError::UnknownRule {
                rule: "wait_days".to_string()
            })
        );
    }

    #[test]
    fn test_summary_counts() {
        let policy = ThresholdPolicy::dashboard_defaults();
        let alerter = Alerter::with_default_rules(&policy);
        let bundle = IndicatorBundle::new()
            .with(RATE_PER_500, 20.0)
            .with(COUNSELOR_CASELOAD, 900.0)
            .with(TOP3_CONCENTRATION_PCT, 55.0);
        let summary = AlertSummary::from_alerts(&alerter.evaluate(&bundle).unwrap());
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.warning, 2);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_alert_serializes_recommendation_text() {
        let policy = ThresholdPolicy::dashboard_defaults();
        let alerter = Alerter::with_default_rules(&policy);
        let alerts = alerter
            .evaluate(&IndicatorBundle::new().with(RATE_PER_500, 14.0))
            .unwrap();
        let json = serde_json::to_value(&alerts[0]).unwrap();
        assert_eq!(json["rule_name"], RATE_PER_500);
        assert_eq!(json["level"], "CRITICAL");
        assert!(json["recommendation_text"]
            .as_str()
            .unwrap()
            .starts_with("Reinforce"));
        assert!(json.get("recommendation").is_none());
    }

    #[test]
    fn test_default_rules_cover_default_policy() {
        let policy = ThresholdPolicy::dashboard_defaults();
        let rules = default_alert_rules();
        let names: Vec<&str> = rules.iter().map(|r| r.rule.as_str()).collect();
        assert_eq!(names, policy.rule_names());
    }
}
