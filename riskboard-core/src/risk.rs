//! Semaphore levels and level banding
//!
//! Global invariants enforced:
//! - Level bands partition [0, 100] into three contiguous bands
//! - Deterministic band assignment

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Qualitative semaphore level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Normal,   // [0, warning)
    Warning,  // [warning, critical)
    Critical, // [critical, 100]
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Normal => "NORMAL",
            RiskLevel::Warning => "WARNING",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    /// Parse a level label from an external KPI file
    ///
    /// Accepts the English labels and the Spanish ones used by the upstream
    /// pipeline (`CRÍTICO`, `ADVERTENCIA`).
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "NORMAL" | "BAJO" => Some(RiskLevel::Normal),
            "WARNING" | "ADVERTENCIA" | "MEDIO" => Some(RiskLevel::Warning),
            "CRITICAL" | "CRÍTICO" | "CRITICO" | "ALTO" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

/// Score boundaries between semaphore levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelBands {
    pub warning: f64,
    pub critical: f64,
}

impl Default for LevelBands {
    fn default() -> Self {
        LevelBands {
            warning: 40.0,
            critical: 70.0,
        }
    }
}

impl LevelBands {
    pub fn new(warning: f64, critical: f64) -> EngineResult<Self> {
        if !(warning > 0.0 && warning < critical && critical <= 100.0) {
            return Err(EngineError::invalid_policy(
                "levels",
                format!(
                    "bands must satisfy 0 < warning ({}) < critical ({}) <= 100",
                    warning, critical
                ),
            ));
        }
        Ok(LevelBands { warning, critical })
    }

    /// Assign a level to a score in [0, 100]
    pub fn classify(&self, score: f64) -> RiskLevel {
        if score < self.warning {
            RiskLevel::Normal
        } else if score < self.critical {
            RiskLevel::Warning
        } else {
            RiskLevel::Critical
        }
    }
}

/// Composite score plus its level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub level: RiskLevel,
}

impl RiskAssessment {
    /// Clamp a raw score into [0, 100] and band it
    pub fn from_score(score: f64, bands: &LevelBands) -> Self {
        let score = score.clamp(0.0, 100.0);
        RiskAssessment {
            score,
            level: bands.classify(score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bands() {
        let bands = LevelBands::default();
        assert_eq!(bands.classify(0.0), RiskLevel::Normal);
        assert_eq!(bands.classify(39.99), RiskLevel::Normal);
        assert_eq!(bands.classify(40.0), RiskLevel::Warning);
        assert_eq!(bands.classify(69.99), RiskLevel::Warning);
        assert_eq!(bands.classify(70.0), RiskLevel::Critical);
        assert_eq!(bands.classify(100.0), RiskLevel::Critical);
    }

    #[test]
    fn test_reject_unordered_bands() {
        assert!(LevelBands::new(70.0, 40.0).is_err());
        assert!(LevelBands::new(0.0, 40.0).is_err());
        assert!(LevelBands::new(40.0, 101.0).is_err());
        assert!(LevelBands::new(f64::NAN, 70.0).is_err());
        assert!(LevelBands::new(30.0, 60.0).is_ok());
    }

    #[test]
    fn test_from_score_clamps() {
        let bands = LevelBands::default();
        assert_eq!(RiskAssessment::from_score(140.0, &bands).score, 100.0);
        assert_eq!(RiskAssessment::from_score(-3.0, &bands).level, RiskLevel::Normal);
    }

    #[test]
    fn test_parse_external_labels() {
        assert_eq!(RiskLevel::parse_label("CRÍTICO"), Some(RiskLevel::Critical));
        assert_eq!(RiskLevel::parse_label("advertencia"), Some(RiskLevel::Warning));
        assert_eq!(RiskLevel::parse_label("NORMAL"), Some(RiskLevel::Normal));
        assert_eq!(RiskLevel::parse_label("unknown"), None);
    }
}
