//! Configuration file support for Riskboard
//!
//! Loads dashboard configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.riskboardrc.json` in the dataset directory
//! 3. `riskboard.config.json` in the dataset directory
//!
//! All fields are optional. CLI flags take precedence over config file values.

use crate::alerts::{default_alert_rules, AlertRule};
use crate::indicators::{DEFAULT_STUDENTS_PER_COUNSELOR, RATE_BASE};
use crate::risk::LevelBands;
use crate::scoring::SemaphoreSource;
use crate::thresholds::{Direction, Threshold, ThresholdPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const DEFAULT_TOP_N: usize = 3;

/// Riskboard configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskboardConfig {
    /// Per-rule threshold overrides; unknown rule names add new rules
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdConfig>,

    /// Score boundaries between semaphore levels (default: 40 / 70)
    #[serde(default)]
    pub levels: Option<LevelConfig>,

    /// Which semaphore the dashboard shows (default: recompute)
    #[serde(default)]
    pub semaphore_source: Option<SemaphoreSource>,

    /// Replaces the alert rule list when present
    #[serde(default)]
    pub alerts: Option<Vec<AlertRule>>,

    /// Entities counted by concentration indices (default: 3)
    #[serde(default)]
    pub top: Option<usize>,

    /// Students per counselor (default: 500)
    #[serde(default)]
    pub students_per_counselor: Option<f64>,

    /// Population base of projected rates (default: 500)
    #[serde(default)]
    pub rate_base: Option<f64>,
}

/// Threshold override; missing fields fall back to the default rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdConfig {
    pub warning: Option<f64>,
    pub critical: Option<f64>,
    pub direction: Option<Direction>,
}

/// Semaphore band boundaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelConfig {
    /// Score at which the semaphore turns WARNING (default: 40)
    pub warning: Option<f64>,
    /// Score at which the semaphore turns CRITICAL (default: 70)
    pub critical: Option<f64>,
}

/// Resolved configuration with a validated policy
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub policy: ThresholdPolicy,
    pub bands: LevelBands,
    pub alert_rules: Vec<AlertRule>,
    pub semaphore_source: SemaphoreSource,
    pub top_n: usize,
    pub students_per_counselor: f64,
    pub rate_base: f64,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

impl RiskboardConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        self.build_policy()?;
        self.build_bands()?;

        if let Some(top) = self.top {
            if top == 0 {
                anyhow::bail!("top must be at least 1 (got {})", top);
            }
        }
        for (name, value) in [
            ("students_per_counselor", self.students_per_counselor),
            ("rate_base", self.rate_base),
        ] {
            if let Some(v) = value {
                if !(v.is_finite() && v > 0.0) {
                    anyhow::bail!("{} must be positive (got {})", name, v);
                }
            }
        }

        if let Some(ref rules) = self.alerts {
            for rule in rules {
                if rule.rule.trim().is_empty() {
                    anyhow::bail!("alerts entries must name a rule");
                }
            }
        }

        Ok(())
    }

    fn build_policy(&self) -> Result<ThresholdPolicy> {
        let defaults = ThresholdPolicy::dashboard_defaults();
        let mut overrides = Vec::with_capacity(self.thresholds.len());

        for (name, t) in &self.thresholds {
            let threshold = match defaults.get(name) {
                Ok(base) => Threshold {
                    warning: t.warning.unwrap_or(base.warning),
                    critical: t.critical.unwrap_or(base.critical),
                    direction: t.direction.unwrap_or(base.direction),
                },
                Err(_) => {
                    let (Some(warning), Some(critical)) = (t.warning, t.critical) else {
                        anyhow::bail!(
                            "thresholds.{} is a new rule and needs both warning and critical",
                            name
                        );
                    };
                    Threshold {
                        warning,
                        critical,
                        direction: t.direction.unwrap_or(Direction::HigherIsWorse),
                    }
                }
            };
            overrides.push((name.clone(), threshold));
        }

        defaults
            .with_overrides(overrides)
            .context("invalid thresholds")
    }

    fn build_bands(&self) -> Result<LevelBands> {
        let defaults = LevelBands::default();
        let Some(ref levels) = self.levels else {
            return Ok(defaults);
        };
        LevelBands::new(
            levels.warning.unwrap_or(defaults.warning),
            levels.critical.unwrap_or(defaults.critical),
        )
        .context("invalid levels")
    }

    /// Resolve config into validated form ready for use
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let policy = self.build_policy()?;
        let bands = self.build_bands()?;

        let alert_rules = match &self.alerts {
            Some(rules) => rules.clone(),
            None => {
                // Rules added through `thresholds` alert with a generic text
                let mut rules = default_alert_rules();
                for name in policy.rule_names() {
                    if !rules.iter().any(|r| r.rule == name) {
                        rules.push(AlertRule::new(name, format!("Review {}", name)));
                    }
                }
                rules
            }
        };

        for rule in &alert_rules {
            policy
                .get(&rule.rule)
                .with_context(|| format!("alert rule '{}' has no threshold", rule.rule))?;
        }

        Ok(ResolvedConfig {
            policy,
            bands,
            alert_rules,
            semaphore_source: self.semaphore_source.unwrap_or_default(),
            top_n: self.top.unwrap_or(DEFAULT_TOP_N),
            students_per_counselor: self
                .students_per_counselor
                .unwrap_or(DEFAULT_STUDENTS_PER_COUNSELOR),
            rate_base: self.rate_base.unwrap_or(RATE_BASE),
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        RiskboardConfig::default().resolve()
    }
}

/// Discover and load a config file from a directory
///
/// Search order:
/// 1. `.riskboardrc.json`
/// 2. `riskboard.config.json`
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(root: &Path) -> Result<Option<(RiskboardConfig, PathBuf)>> {
    for name in [".riskboardrc.json", "riskboard.config.json"] {
        let path = root.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<RiskboardConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: RiskboardConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config for a dataset directory
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config in `root`.
/// Returns default config if nothing is found.
pub fn load_and_resolve(root: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(root)? {
            Some((config, path)) => (config, Some(path)),
            None => (RiskboardConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::{COUNSELOR_COVERAGE, RATE_PER_500};
    use std::fs;

    #[test]
    fn test_default_config_is_valid() {
        let config = RiskboardConfig::default();
        config.validate().expect("default config should be valid");
        let resolved = config.resolve().expect("default config should resolve");
        assert_eq!(resolved.policy, ThresholdPolicy::dashboard_defaults());
        assert_eq!(resolved.bands, LevelBands::default());
        assert_eq!(resolved.semaphore_source, SemaphoreSource::Recompute);
        assert_eq!(resolved.top_n, 3);
        assert_eq!(resolved.students_per_counselor, 500.0);
        assert_eq!(resolved.rate_base, 500.0);
        assert_eq!(resolved.alert_rules, default_alert_rules());
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "thresholds": {
                "rate_per_500": {"warning": 6.0, "critical": 10.0},
                "wait_days": {"warning": 15, "critical": 30}
            },
            "levels": {"warning": 35, "critical": 65},
            "semaphore_source": "precomputed",
            "top": 5,
            "students_per_counselor": 400,
            "rate_base": 1000
        }"#;
        let config: RiskboardConfig = serde_json::from_str(json).unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.policy.get(RATE_PER_500).unwrap().warning, 6.0);
        assert_eq!(resolved.policy.get("wait_days").unwrap().critical, 30.0);
        assert_eq!(resolved.bands.warning, 35.0);
        assert_eq!(resolved.semaphore_source, SemaphoreSource::Precomputed);
        assert_eq!(resolved.top_n, 5);
        assert_eq!(resolved.students_per_counselor, 400.0);
        assert_eq!(resolved.rate_base, 1000.0);
        assert_eq!(
            resolved.alert_rules.last().map(|r| r.rule.as_str()),
            Some("wait_days")
        );
    }

    #[test]
    fn test_reject_unknown_fields() {
        let json = r#"{"unknown_field": true}"#;
        let result: Result<RiskboardConfig, _> = serde_json::from_str(json);
        assert!(result.is_err(), "unknown fields should be rejected");

        let json = r#"{"thresholds": {"rate_per_500": {"cutoff": 3}}}"#;
        let result: Result<RiskboardConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_threshold_keeps_default_fields() {
        let json = r#"{"thresholds": {"counselor_coverage": {"critical": 0.5}}}"#;
        let config: RiskboardConfig = serde_json::from_str(json).unwrap();
        let resolved = config.resolve().unwrap();
        let coverage = resolved.policy.get(COUNSELOR_COVERAGE).unwrap();
        assert_eq!(coverage.warning, 0.9); // default
        assert_eq!(coverage.critical, 0.5);
        assert_eq!(coverage.direction, Direction::LowerIsWorse); // default
    }

    #[test]
    fn test_reject_unordered_threshold() {
        let json = r#"{"thresholds": {"rate_per_500": {"warning": 13.0}}}"#;
        let config: RiskboardConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_incomplete_new_rule() {
        let json = r#"{"thresholds": {"wait_days": {"warning": 15}}}"#;
        let config: RiskboardConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_bad_levels() {
        let json = r#"{"levels": {"warning": 80}}"#;
        let config: RiskboardConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_non_positive_ratios() {
        for json in [
            r#"{"students_per_counselor": 0}"#,
            r#"{"rate_base": -500}"#,
            r#"{"top": 0}"#,
        ] {
            let config: RiskboardConfig = serde_json::from_str(json).unwrap();
            assert!(config.validate().is_err(), "{} should be rejected", json);
        }
    }

    #[test]
    fn test_reject_alert_for_unknown_rule() {
        let json = r#"{"alerts": [{"rule": "wait_days", "recommendation": "x"}]}"#;
        let config: RiskboardConfig = serde_json::from_str(json).unwrap();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_explicit_alert_list_replaces_defaults() {
        let json = r#"{"alerts": [{"rule": "rate_per_500", "recommendation": "act"}]}"#;
        let config: RiskboardConfig = serde_json::from_str(json).unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.alert_rules, vec![AlertRule::new(RATE_PER_500, "act")]);
    }

    #[test]
    fn test_discover_riskboardrc() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(".riskboardrc.json");
        fs::write(&config_path, r#"{"top": 5}"#).unwrap();

        let result = discover_config(dir.path()).unwrap();
        let (config, path) = result.unwrap();
        assert_eq!(config.top, Some(5));
        assert_eq!(path, config_path);
    }

    #[test]
    fn test_discover_priority_order() {
        let dir = tempfile::tempdir().unwrap();

        fs::write(dir.path().join(".riskboardrc.json"), r#"{"top": 1}"#).unwrap();
        fs::write(dir.path().join("riskboard.config.json"), r#"{"top": 2}"#).unwrap();

        let (config, _) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.top, Some(1), ".riskboardrc.json should take priority");
    }

    #[test]
    fn test_discover_config_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("riskboard.config.json"), r#"{"top": 2}"#).unwrap();
        let (config, _) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.top, Some(2));
    }

    #[test]
    fn test_no_config_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_config(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_and_resolve_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("custom.json");
        fs::write(&config_path, r#"{"semaphore_source": "precomputed"}"#).unwrap();

        let resolved = load_and_resolve(dir.path(), Some(&config_path)).unwrap();
        assert_eq!(resolved.semaphore_source, SemaphoreSource::Precomputed);
        assert_eq!(resolved.config_path, Some(config_path));
    }

    #[test]
    fn test_load_and_resolve_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = load_and_resolve(dir.path(), None).unwrap();
        assert!(resolved.config_path.is_none());
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(".riskboardrc.json");
        fs::write(&config_path, "{not json").unwrap();
        let err = discover_config(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains(".riskboardrc.json"));
    }
}
