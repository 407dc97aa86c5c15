//! Dataset loading - CSV tables and precomputed KPI files
//!
//! A dataset directory holds:
//! - `yearly.csv` (required)
//! - `morbidity.csv` (required)
//! - `classification.csv`, `clustering.csv`, `kpis.json` (optional)

use crate::alerts::Alert;
use crate::indicators::{IndicatorBundle, COUNSELORS_NEEDED};
use crate::risk::{LevelBands, RiskAssessment, RiskLevel};
use crate::table::{MetricTable, Value};
use crate::thresholds::{
    Breach, ANNUAL_GROWTH_PCT, COUNSELOR_CASELOAD, GENDER_GAP_RATIO, RATE_PER_500,
    TOP3_CONCENTRATION_PCT,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const YEARLY_FILE: &str = "yearly.csv";
pub const MORBIDITY_FILE: &str = "morbidity.csv";
pub const CLASSIFICATION_FILE: &str = "classification.csv";
pub const CLUSTERING_FILE: &str = "clustering.csv";
pub const KPIS_FILE: &str = "kpis.json";

/// Parse CSV text into a table; the header row becomes the schema
pub fn table_from_reader<R: Read>(reader: R) -> Result<MetricTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let schema: Vec<String> = csv_reader
        .headers()
        .context("failed to read CSV header")?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("failed to read CSV row {}", index + 1))?;
        rows.push(record.iter().map(Value::parse).collect());
    }

    Ok(MetricTable::from_rows(&schema, rows)?)
}

pub fn read_table_csv(path: &Path) -> Result<MetricTable> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let table =
        table_from_reader(file).with_context(|| format!("failed to parse {}", path.display()))?;
    debug!(path = %path.display(), rows = table.len(), "loaded table");
    Ok(table)
}

/// Semaphore as written by the external pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedSemaphore {
    pub score: f64,
    #[serde(alias = "nivel")]
    pub level: String,
}

impl PrecomputedSemaphore {
    /// Interpret the stored level, falling back to banding the score
    pub fn assessment(&self, bands: &LevelBands) -> RiskAssessment {
        match RiskLevel::parse_label(&self.level) {
            Some(level) => RiskAssessment {
                score: self.score.clamp(0.0, 100.0),
                level,
            },
            None => {
                warn!(label = %self.level, "unrecognized semaphore level, banding score");
                RiskAssessment::from_score(self.score, bands)
            }
        }
    }
}

/// Alert as written by the external pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedAlert {
    #[serde(alias = "tipo")]
    pub rule: String,
    #[serde(alias = "nivel")]
    pub level: String,
    #[serde(default, alias = "valor")]
    pub value: Option<serde_json::Value>,
    #[serde(default, alias = "umbral")]
    pub threshold: Option<serde_json::Value>,
    #[serde(default, alias = "recomendacion")]
    pub recommendation: String,
}

/// Contents of `kpis.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedKpis {
    #[serde(default, alias = "indicadores")]
    pub indicators: BTreeMap<String, serde_json::Value>,
    #[serde(default, alias = "semaforo")]
    pub semaphore: Option<PrecomputedSemaphore>,
    #[serde(default, alias = "alertas")]
    pub alerts: Vec<PrecomputedAlert>,
}

/// Numbers may arrive as JSON numbers or as numeric strings
fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Indicator names used by the upstream pipeline
fn canonical_indicator(name: &str) -> &str {
    match name {
        "tasa_por_500" => RATE_PER_500,
        "crecimiento_anual" => ANNUAL_GROWTH_PCT,
        "carga_por_orientador" => COUNSELOR_CASELOAD,
        "orientadores_necesarios" => COUNSELORS_NEEDED,
        "concentracion_top3" => TOP3_CONCENTRATION_PCT,
        "brecha_genero" => GENDER_GAP_RATIO,
        other => other,
    }
}

impl PrecomputedKpis {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("failed to parse KPI JSON")
    }

    /// Numeric indicators under their canonical names; other entries are skipped
    pub fn indicator_bundle(&self) -> IndicatorBundle {
        let mut bundle = IndicatorBundle::new();
        for (name, value) in &self.indicators {
            match json_number(value) {
                Some(v) => bundle.set(canonical_indicator(name), Some(v)),
                None => debug!(indicator = %name, "skipping non-numeric KPI"),
            }
        }
        bundle
    }

    /// Alerts whose level is recognizable, critical first, then file order
    pub fn alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter_map(|a| {
                let level = match RiskLevel::parse_label(&a.level)? {
                    RiskLevel::Critical => Breach::Critical,
                    RiskLevel::Warning => Breach::Warning,
                    RiskLevel::Normal => return None,
                };
                Some(Alert {
                    rule_name: canonical_indicator(&a.rule).to_string(),
                    level,
                    observed_value: a.value.as_ref().and_then(json_number).unwrap_or(f64::NAN),
                    threshold_value: a
                        .threshold
                        .as_ref()
                        .and_then(json_number)
                        .unwrap_or(f64::NAN),
                    recommendation_text: a.recommendation.clone(),
                })
            })
            .collect();
        alerts.sort_by_key(|alert| alert.level);
        alerts
    }
}

pub fn read_kpis(path: &Path) -> Result<PrecomputedKpis> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    PrecomputedKpis::from_json(&content).with_context(|| format!("invalid {}", path.display()))
}

/// Every table of one dataset directory
#[derive(Debug, Clone)]
pub struct DatasetBundle {
    pub root: PathBuf,
    pub yearly: MetricTable,
    pub morbidity: MetricTable,
    pub classification: Option<MetricTable>,
    pub clustering: Option<MetricTable>,
    pub kpis: Option<PrecomputedKpis>,
}

fn read_optional<T>(path: PathBuf, read: impl Fn(&Path) -> Result<T>) -> Result<Option<T>> {
    if path.exists() {
        read(&path).map(Some)
    } else {
        debug!(path = %path.display(), "optional input absent");
        Ok(None)
    }
}

/// Load a dataset directory
pub fn load_dataset_dir(root: &Path) -> Result<DatasetBundle> {
    if !root.is_dir() {
        anyhow::bail!("dataset directory not found: {}", root.display());
    }

    Ok(DatasetBundle {
        root: root.to_path_buf(),
        yearly: read_table_csv(&root.join(YEARLY_FILE))?,
        morbidity: read_table_csv(&root.join(MORBIDITY_FILE))?,
        classification: read_optional(root.join(CLASSIFICATION_FILE), read_table_csv)?,
        clustering: read_optional(root.join(CLUSTERING_FILE), read_table_csv)?,
        kpis: read_optional(root.join(KPIS_FILE), read_kpis)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_table_from_reader_parses_cells() {
        let csv = "year, locality ,attentions\n2023, Suba ,120\n2024,Bosa,\n";
        let table = table_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.schema(), ["year", "locality", "attentions"]);
        assert_eq!(table.len(), 2);
        let attentions = table.numeric_column("attentions").unwrap();
        assert_eq!(attentions, vec![Some(120.0), None]);
        assert_eq!(table.distinct("locality").unwrap(), vec!["Bosa", "Suba"]);
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let csv = "year,attentions\n2023,1,extra\n";
        assert!(table_from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_kpis_accept_upstream_names() {
        let json = r#"{
            "indicadores": {"tasa_por_500": 9.2, "brecha_genero": 1.8, "nota": "n/a"},
            "semaforo": {"score": 62.5, "nivel": "ADVERTENCIA"},
            "alertas": [
                {"tipo": "tasa_por_500", "nivel": "CRÍTICO", "valor": 13.1, "umbral": "12.5",
                 "recomendacion": "Reforzar"},
                {"tipo": "otro", "nivel": "NORMAL"}
            ]
        }"#;
        let kpis = PrecomputedKpis::from_json(json).unwrap();
        let bundle = kpis.indicator_bundle();
        assert_eq!(bundle.get(RATE_PER_500), Some(9.2));
        assert_eq!(bundle.get(GENDER_GAP_RATIO), Some(1.8));
        assert_eq!(bundle.len(), 2);

        let semaphore = kpis.semaphore.as_ref().unwrap();
        let assessment = semaphore.assessment(&LevelBands::default());
        assert_eq!(assessment.level, RiskLevel::Warning);

        let alerts = kpis.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, Breach::Critical);
        assert_eq!(alerts[0].threshold_value, 12.5);
    }

    #[test]
    fn test_precomputed_alerts_list_critical_first() {
        let json = r#"{
            "alertas": [
                {"tipo": "brecha_genero", "nivel": "ADVERTENCIA", "valor": 1.7, "umbral": 1.5},
                {"tipo": "tasa_por_500", "nivel": "CRÍTICO", "valor": 13.1, "umbral": 12.5},
                {"tipo": "crecimiento_anual", "nivel": "ADVERTENCIA", "valor": 12, "umbral": 10}
            ]
        }"#;
        let alerts = PrecomputedKpis::from_json(json).unwrap().alerts();
        let order: Vec<(&str, Breach)> = alerts
            .iter()
            .map(|a| (a.rule_name.as_str(), a.level))
            .collect();
        assert_eq!(
            order,
            vec![
                (RATE_PER_500, Breach::Critical),
                (GENDER_GAP_RATIO, Breach::Warning),
                (ANNUAL_GROWTH_PCT, Breach::Warning),
            ]
        );
    }

    #[test]
    fn test_unknown_semaphore_label_bands_score() {
        let semaphore = PrecomputedSemaphore {
            score: 75.0,
            level: "ROJO".to_string(),
        };
        assert_eq!(
            semaphore.assessment(&LevelBands::default()).level,
            RiskLevel::Critical
        );
    }

    #[test]
    fn test_load_dataset_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(YEARLY_FILE),
            "year,attentions,enrollment\n2024,10,1000\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(MORBIDITY_FILE),
            "year,locality,gender,attentions\n2024,Suba,F,10\n",
        )
        .unwrap();

        let bundle = load_dataset_dir(dir.path()).unwrap();
        assert_eq!(bundle.yearly.len(), 1);
        assert!(bundle.classification.is_none());
        assert!(bundle.kpis.is_none());
    }

    #[test]
    fn test_missing_required_table_names_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(YEARLY_FILE), "year\n2024\n").unwrap();
        let err = load_dataset_dir(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains(MORBIDITY_FILE));
    }
}
