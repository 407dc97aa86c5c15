//! Composite semaphore scoring
//!
//! Maps every indicator onto a [0, 100] sub-score using its own thresholds
//! and takes the worst one as the composite score.
//!
//! Global invariants enforced:
//! - Composite score is the maximum sub-score, always in [0, 100]
//! - Missing indicators never contribute (neither as 0 nor as 100)
//! - Level always matches the band containing the score

use crate::error::{EngineError, EngineResult};
use crate::indicators::IndicatorBundle;
use crate::risk::{LevelBands, RiskAssessment};
use crate::thresholds::{Threshold, ThresholdPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Sub-score of one indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SubScore {
    pub indicator: String,
    pub value: f64,
    pub score: f64,
}

/// Composite score with the per-indicator detail that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScoreBreakdown {
    pub assessment: RiskAssessment,
    pub sub_scores: Vec<SubScore>,
    /// Indicator that set the composite score
    pub dominant: String,
}

/// Weakest-link scorer over a threshold policy
#[derive(Debug, Clone)]
pub struct Scorer<'a> {
    policy: &'a ThresholdPolicy,
    bands: LevelBands,
}

impl<'a> Scorer<'a> {
    pub fn new(policy: &'a ThresholdPolicy) -> Self {
        Self::with_bands(policy, LevelBands::default())
    }

    pub fn with_bands(policy: &'a ThresholdPolicy, bands: LevelBands) -> Self {
        Scorer { policy, bands }
    }

    pub fn bands(&self) -> &LevelBands {
        &self.bands
    }

    /// Normalize one observation against its threshold
    ///
    /// The warning cutoff lands on the warning band boundary, the critical
    /// cutoff on the critical boundary; linear in between and beyond.
    pub fn sub_score(&self, threshold: &Threshold, value: f64) -> f64 {
        let span = self.bands.critical - self.bands.warning;
        (self.bands.warning + threshold.progress(value) * span).clamp(0.0, 100.0)
    }

    /// Score a bundle of indicators
    pub fn score(&self, indicators: &IndicatorBundle) -> EngineResult<ScoreBreakdown> {
        let mut sub_scores = Vec::new();
        for (name, value) in indicators.present() {
            let threshold = self.policy.get(name)?;
            sub_scores.push(SubScore {
                indicator: name.to_string(),
                value,
                score: self.sub_score(threshold, value),
            });
        }

        // Strictly greater keeps the first declared indicator on ties
        let Some(dominant) = sub_scores
            .iter()
            .fold(None::<&SubScore>, |best, s| match best {
                Some(b) if s.score <= b.score => Some(b),
                _ => Some(s),
            })
        else {
            return Err(EngineError::InsufficientData {
                reason: format!(
                    "none of {} indicator(s) has an observed value",
                    indicators.len()
                ),
            });
        };

        let assessment = RiskAssessment::from_score(dominant.score, &self.bands);
        debug!(
            score = assessment.score,
            level = assessment.level.as_str(),
            dominant = %dominant.indicator,
            "scored indicator bundle"
        );

        Ok(ScoreBreakdown {
            assessment,
            dominant: dominant.indicator.clone(),
            sub_scores,
        })
    }
}

/// Which semaphore is authoritative for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemaphoreSource {
    #[default]
    Recompute,
    Precomputed,
}

impl SemaphoreSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemaphoreSource::Recompute => "recompute",
            SemaphoreSource::Precomputed => "precomputed",
        }
    }
}

/// Semaphore chosen for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SemaphoreReading {
    pub assessment: RiskAssessment,
    pub source: SemaphoreSource,
    /// Whether the two semaphores disagree on level; absent unless both exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disagreement: Option<bool>,
}

/// Pick the authoritative semaphore between a recomputed and an external one
///
/// In `Recompute` mode the recomputed assessment must exist; in
/// `Precomputed` mode the external one must.
pub fn resolve_semaphore(
    source: SemaphoreSource,
    recomputed: Option<RiskAssessment>,
    precomputed: Option<RiskAssessment>,
) -> EngineResult<SemaphoreReading> {
    let disagreement = match (recomputed, precomputed) {
        (Some(r), Some(p)) => {
            if r.level != p.level {
                warn!(
                    recomputed = r.level.as_str(),
                    precomputed = p.level.as_str(),
                    "recomputed and precomputed semaphores disagree"
                );
            }
            Some(r.level != p.level)
        }
        _ => None,
    };

    let chosen = match source {
        SemaphoreSource::Recompute => recomputed,
        SemaphoreSource::Precomputed => precomputed,
    };

    let assessment = chosen.ok_or_else(|| EngineError::InsufficientData {
        reason: format!("no {} semaphore available", source.as_str()),
    })?;

    Ok(SemaphoreReading {
        assessment,
        source,
        disagreement,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskLevel;
    use crate::thresholds::{COUNSELOR_COVERAGE, RATE_PER_500};

    fn policy() -> ThresholdPolicy {
        ThresholdPolicy::new([
            ("a", Threshold::higher_is_worse(10.0, 20.0)),
            ("b", Threshold::higher_is_worse(10.0, 20.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_sub_score_anchors() {
        let policy = ThresholdPolicy::dashboard_defaults();
        let scorer = Scorer::new(&policy);
        let rate = policy.get(RATE_PER_500).unwrap();
        assert!((scorer.sub_score(rate, 7.5) - 40.0).abs() < 1e-9);
        assert!((scorer.sub_score(rate, 12.5) - 70.0).abs() < 1e-9);
        assert!((scorer.sub_score(rate, 10.0) - 55.0).abs() < 1e-9);
        assert_eq!(scorer.sub_score(rate, 1000.0), 100.0);
        assert_eq!(scorer.sub_score(rate, 0.0), 0.0);

        let coverage = policy.get(COUNSELOR_COVERAGE).unwrap();
        assert!((scorer.sub_score(coverage, 0.6) - 70.0).abs() < 1e-9);
        assert!(scorer.sub_score(coverage, 1.0) < 40.0);
    }

    #[test]
    fn test_composite_is_max_not_mean() {
        let policy = policy();
        let scorer = Scorer::new(&policy);
        // a: 40 + (26.6667 - 10) / 10 * 30 = 90, b: 40 + (0 - 10) / 10 * 30 = 10
        let bundle = IndicatorBundle::new()
            .with("a", 10.0 + 50.0 / 3.0)
            .with("b", 0.0);
        let breakdown = scorer.score(&bundle).unwrap();
        assert!((breakdown.sub_scores[0].score - 90.0).abs() < 1e-9);
        assert!((breakdown.sub_scores[1].score - 10.0).abs() < 1e-9);
        assert!((breakdown.assessment.score - 90.0).abs() < 1e-9);
        assert_eq!(breakdown.assessment.level, RiskLevel::Critical);
        assert_eq!(breakdown.dominant, "a");
    }

    #[test]
    fn test_missing_indicators_are_excluded() {
        let policy = policy();
        let scorer = Scorer::new(&policy);
        let bundle = IndicatorBundle::new().missing("a").with("b", 5.0);
        let breakdown = scorer.score(&bundle).unwrap();
        assert_eq!(breakdown.sub_scores.len(), 1);
        assert_eq!(breakdown.dominant, "b");
        assert_eq!(breakdown.assessment.level, RiskLevel::Normal);
    }

    #[test]
    fn test_all_missing_is_insufficient_data() {
        let policy = policy();
        let scorer = Scorer::new(&policy);
        let bundle = IndicatorBundle::new().missing("a").with("b", f64::NAN);
        assert!(matches!(
            scorer.score(&bundle),
            Err(EngineError::InsufficientData { .. })
        ));
        assert!(scorer.score(&IndicatorBundle::new()).is_err());
    }

    #[test]
    fn test_unknown_indicator_fails() {
        let policy = policy();
        let scorer = Scorer::new(&policy);
        let bundle = IndicatorBundle::new().with("wait_days", 3.0);
        assert!(matches!(
            scorer.score(&bundle),
            Err(EngineError::UnknownRule { .. })
        ));
    }

    #[test]
    fn test_ties_keep_first_declared_indicator() {
        let policy = policy();
        let scorer = Scorer::new(&policy);
        let bundle = IndicatorBundle::new().with("b", 15.0).with("a", 15.0);
        assert_eq!(scorer.score(&bundle).unwrap().dominant, "b");
    }

    #[test]
    fn test_custom_bands_move_anchors() {
        let policy = policy();
        let scorer = Scorer::with_bands(&policy, LevelBands::new(30.0, 60.0).unwrap());
        let bundle = IndicatorBundle::new().with("a", 10.0);
        let breakdown = scorer.score(&bundle).unwrap();
        assert!((breakdown.assessment.score - 30.0).abs() < 1e-9);
        assert_eq!(breakdown.assessment.level, RiskLevel::Warning);
    }

    #[test]
    fn test_resolve_semaphore_modes() {
        let bands = LevelBands::default();
        let recomputed = RiskAssessment::from_score(75.0, &bands);
        let precomputed = RiskAssessment::from_score(50.0, &bands);

        let reading =
            resolve_semaphore(SemaphoreSource::Recompute, Some(recomputed), Some(precomputed))
                .unwrap();
        assert_eq!(reading.assessment, recomputed);
        assert_eq!(reading.disagreement, Some(true));

        let reading =
            resolve_semaphore(SemaphoreSource::Precomputed, Some(recomputed), Some(precomputed))
                .unwrap();
        assert_eq!(reading.assessment.level, RiskLevel::Warning);

        let reading = resolve_semaphore(SemaphoreSource::Recompute, Some(recomputed), None).unwrap();
        assert_eq!(reading.disagreement, None);

        assert!(matches!(
            resolve_semaphore(SemaphoreSource::Precomputed, Some(recomputed), None),
            Err(EngineError::InsufficientData { .. })
        ));
    }
}
