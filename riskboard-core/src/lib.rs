//! Riskboard core library - indicator aggregation, alerting and projection

// Global invariants enforced in this crate:
// - Engine computations are pure functions over immutable inputs
// - No global mutable state, no threads, no async
// - File IO is confined to `config` and `loader`
// - Deterministic ordering must be explicit (sorted keys, tie-breaks)
// - Identical input yields byte-for-byte identical output

pub mod alerts;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod indicators;
pub mod loader;
pub mod profile;
pub mod ranking;
pub mod report;
pub mod risk;
pub mod scoring;
pub mod segments;
pub mod table;
pub mod thresholds;
pub mod trends;

pub use alerts::{Alert, AlertRule, Alerter};
pub use config::ResolvedConfig;
pub use dashboard::{build_dashboard, locality_profile_for, Dashboard, Panel};
pub use error::{EngineError, EngineResult};
pub use indicators::IndicatorBundle;
pub use profile::LocalityProfile;
pub use ranking::{GapRatio, RankingResult};
pub use report::{render_csv, render_json, render_text, Flatten, ReportRow};
pub use risk::{LevelBands, RiskAssessment, RiskLevel};
pub use scoring::Scorer;
pub use table::{Aggregation, MetricTable, Value};
pub use thresholds::{Threshold, ThresholdPolicy};
pub use trends::ProjectionResult;

use anyhow::Result;
use std::path::Path;

/// Load a dataset directory and build its dashboard with discovered configuration
pub fn dashboard_for_dir(root: &Path) -> Result<Dashboard> {
    dashboard_for_dir_with_config(root, None)
}

/// Load a dataset directory and build its dashboard with an optional config path
pub fn dashboard_for_dir_with_config(root: &Path, config_path: Option<&Path>) -> Result<Dashboard> {
    let config = config::load_and_resolve(root, config_path)?;
    let data = loader::load_dataset_dir(root)?;
    Ok(build_dashboard(&data, &config))
}
