//! Riskboard CLI - risk semaphore, alerts, rankings and projections

// Global invariants enforced:
// - Deterministic output ordering
// - Identical input yields byte-for-byte identical output
// - Logs go to stderr, results to stdout

mod telemetry;

use anyhow::Context;
use clap::{Parser, Subcommand};
use riskboard_core::alerts::{AlertSummary, Alerter};
use riskboard_core::config::{self, ResolvedConfig};
use riskboard_core::loader::{self, read_table_csv};
use riskboard_core::ranking::{gap_ratio, gap_ratio_by, rank_table};
use riskboard_core::report::{render_csv, render_json, render_text, Flatten, ReportRow};
use riskboard_core::scoring::Scorer;
use riskboard_core::thresholds::RATE_PER_500;
use riskboard_core::trends::{
    chronological_series, growth_statistics, project, projected_rate, ProjectedRate,
    ProjectionResult,
};
use riskboard_core::{build_dashboard, locality_profile_for, Aggregation, IndicatorBundle};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "riskboard")]
#[command(about = "Risk semaphore, alerts, rankings and projections over indicator tables")]
#[command(version)]
struct Cli {
    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every dashboard panel from a dataset directory
    Dashboard {
        /// Directory holding yearly.csv, morbidity.csv and optional inputs
        dir: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Entities counted by rankings (overrides config file)
        #[arg(long)]
        top: Option<usize>,

        /// Path to config file (default: auto-discover in DIR)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Score a bundle of indicators into a semaphore
    Score {
        /// Indicator observation as NAME=VALUE (repeatable)
        #[arg(long = "indicator", value_name = "NAME=VALUE", required = true)]
        indicators: Vec<String>,

        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Path to config file (default: auto-discover in current directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Evaluate alert rules against indicator observations
    Alerts {
        /// Indicator observation as NAME=VALUE (repeatable)
        #[arg(long = "indicator", value_name = "NAME=VALUE", required = true)]
        indicators: Vec<String>,

        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Path to config file (default: auto-discover in current directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Rank entities of a CSV table and report top-N concentration
    Rank {
        /// CSV file with a header row
        csv: PathBuf,

        /// Entity dimension to rank
        #[arg(long)]
        entity: String,

        /// Measure column to aggregate
        #[arg(long)]
        measure: String,

        #[arg(long, default_value = "sum")]
        aggregation: AggregationArg,

        #[arg(long, default_value = "3")]
        top: usize,

        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Gap ratio between the two categories of a dimension
    Gap {
        /// CSV file with a header row
        csv: PathBuf,

        /// Dimension with exactly two categories
        #[arg(long)]
        dimension: String,

        /// Measure column to sum
        #[arg(long)]
        measure: String,

        /// Keep only rows where DIM equals VALUE
        #[arg(long = "where", value_name = "DIM=VALUE")]
        filter: Option<String>,

        /// Compute one gap per value of this dimension
        #[arg(long)]
        by: Option<String>,

        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Project the next period of a series
    Project {
        /// CSV file with a header row (requires --time and --measure)
        #[arg(required_unless_present = "values")]
        csv: Option<PathBuf>,

        /// Period dimension of the CSV
        #[arg(long, requires = "csv")]
        time: Option<String>,

        /// Measure column of the CSV
        #[arg(long, requires = "csv")]
        measure: Option<String>,

        /// Series values in chronological order
        #[arg(long, value_delimiter = ',', conflicts_with = "csv")]
        values: Option<Vec<f64>>,

        /// Population used to express the projection as a rate
        #[arg(long)]
        enrollment: Option<f64>,

        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Path to config file (default: auto-discover in current directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Profile one locality of a dataset directory against the city
    Locality {
        /// Directory holding yearly.csv, morbidity.csv and optional inputs
        dir: PathBuf,

        /// Locality name (case-insensitive)
        name: String,

        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Validate or show the configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum AggregationArg {
    Sum,
    Mean,
    Max,
    Min,
    Count,
}

impl From<AggregationArg> for Aggregation {
    fn from(arg: AggregationArg) -> Self {
        match arg {
            AggregationArg::Sum => Aggregation::Sum,
            AggregationArg::Mean => Aggregation::Mean,
            AggregationArg::Max => Aggregation::Max,
            AggregationArg::Min => Aggregation::Min,
            AggregationArg::Count => Aggregation::Count,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level)?;

    match cli.command {
        Commands::Dashboard {
            dir,
            format,
            top,
            config: config_path,
        } => {
            let mut resolved = config::load_and_resolve(&dir, config_path.as_deref())
                .context("failed to load configuration")?;
            if let Some(config_path) = &resolved.config_path {
                eprintln!("Using config: {}", config_path.display());
            }

            // CLI flags override config file values
            if let Some(top) = top {
                if top == 0 {
                    anyhow::bail!("--top must be at least 1");
                }
                resolved.top_n = top;
            }

            tracing::debug!(dir = %dir.display(), top = resolved.top_n, "building dashboard");
            let data = loader::load_dataset_dir(&dir)?;
            let dashboard = build_dashboard(&data, &resolved);
            print_output(format, &dashboard.report_rows(), &dashboard)?;
        }
        Commands::Score {
            indicators,
            format,
            config: config_path,
        } => {
            let resolved = resolve_from_cwd(config_path.as_deref())?;
            let bundle = parse_indicators(&indicators)?;
            let scorer = Scorer::with_bands(&resolved.policy, resolved.bands);
            let breakdown = scorer.score(&bundle)?;
            print_output(format, &breakdown.report_rows("score"), &breakdown)?;
        }
        Commands::Alerts {
            indicators,
            format,
            config: config_path,
        } => {
            let resolved = resolve_from_cwd(config_path.as_deref())?;
            let bundle = parse_indicators(&indicators)?;
            let alerter = Alerter::new(&resolved.policy, resolved.alert_rules.clone());
            let alerts = alerter.evaluate(&bundle)?;
            let summary = AlertSummary::from_alerts(&alerts);

            let mut rows = summary.report_rows("alert_summary");
            rows.extend(alerts.report_rows("alerts"));
            print_output(format, &rows, &alerts)?;
        }
        Commands::Rank {
            csv,
            entity,
            measure,
            aggregation,
            top,
            format,
        } => {
            let table = read_table_csv(&csv)?;
            let ranking = rank_table(&table, &entity, &measure, aggregation.into(), top)?;
            print_output(format, &ranking.report_rows("ranking"), &ranking)?;
        }
        Commands::Gap {
            csv,
            dimension,
            measure,
            filter,
            by,
            format,
        } => {
            let mut table = read_table_csv(&csv)?;
            if let Some(filter) = filter {
                let (dim, value) = split_assignment(&filter)?;
                table = table.filter_eq(dim, value)?;
            }

            match by {
                Some(group_dim) => {
                    let gaps = gap_ratio_by(&table, &group_dim, &dimension, &measure)?;
                    let rows: Vec<ReportRow> = gaps
                        .iter()
                        .flat_map(|(group, gap)| gap.report_rows(group))
                        .collect();
                    print_output(format, &rows, &gaps)?;
                }
                None => {
                    let gap = gap_ratio(&table, &dimension, &measure)?;
                    print_output(format, &gap.report_rows("gap"), &gap)?;
                }
            }
        }
        Commands::Project {
            csv,
            time,
            measure,
            values,
            enrollment,
            format,
            config: config_path,
        } => {
            let series: Vec<f64> = match (csv, values) {
                (_, Some(values)) => values,
                (Some(csv), None) => {
                    let (Some(time), Some(measure)) = (time, measure) else {
                        anyhow::bail!("projecting a CSV requires --time and --measure");
                    };
                    let table = read_table_csv(&csv)?;
                    let points = chronological_series(&table, &time, &measure)?;
                    let stats = growth_statistics(&points).ok();
                    if let Some(stats) = stats {
                        eprintln!(
                            "Trend: {} (mean variation {:.1}%)",
                            stats.direction.as_str(),
                            stats.mean_variation_pct
                        );
                    }
                    points.into_iter().map(|p| p.value).collect()
                }
                (None, None) => anyhow::bail!("provide a CSV file or --values"),
            };

            let resolved = match enrollment {
                Some(_) => Some(resolve_from_cwd(config_path.as_deref())?),
                None => None,
            };
            let output = project_output(&series, enrollment.zip(resolved.as_ref()))?;
            print_output(format, &output.report_rows(), &output)?;
        }
        Commands::Locality { dir, name, format } => {
            let data = loader::load_dataset_dir(&dir)?;
            let profile = locality_profile_for(&data, &name)
                .with_context(|| format!("cannot profile locality '{}'", name))?;
            print_output(format, &profile.report_rows("locality"), &profile)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => match resolve_from_cwd(path.as_deref()) {
                Ok(config) => {
                    if let Some(ref p) = config.config_path {
                        println!("Config valid: {}", p.display());
                    } else {
                        println!("No config file found. Using defaults.");
                    }
                }
                Err(e) => {
                    eprintln!("Config validation failed: {:#}", e);
                    std::process::exit(1);
                }
            },
            ConfigAction::Show { path } => {
                let resolved = resolve_from_cwd(path.as_deref())?;
                print_config(&resolved);
            }
        },
    }

    Ok(())
}

/// Projection plus, when an enrollment was given, its rate reading
#[derive(Debug, Serialize)]
struct ProjectOutput {
    projection: ProjectionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    projected_rate: Option<ProjectedRate>,
}

impl ProjectOutput {
    fn report_rows(&self) -> Vec<ReportRow> {
        let mut rows = self.projection.report_rows("projection");
        if let Some(rate) = &self.projected_rate {
            rows.extend(rate.report_rows("projected_rate"));
        }
        rows
    }
}

fn project_output(
    series: &[f64],
    enrollment: Option<(f64, &ResolvedConfig)>,
) -> anyhow::Result<ProjectOutput> {
    let projection = project(series)?;
    let projected_rate = match enrollment {
        Some((enrollment, resolved)) => {
            let threshold = resolved.policy.get(RATE_PER_500)?;
            Some(projected_rate(
                &projection,
                enrollment,
                resolved.rate_base,
                threshold,
            )?)
        }
        None => None,
    };
    Ok(ProjectOutput {
        projection,
        projected_rate,
    })
}

fn resolve_from_cwd(config_path: Option<&Path>) -> anyhow::Result<ResolvedConfig> {
    let root = std::env::current_dir()?;
    config::load_and_resolve(&root, config_path).context("failed to load configuration")
}

fn split_assignment(raw: &str) -> anyhow::Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => anyhow::bail!("expected NAME=VALUE, got '{}'", raw),
    }
}

fn parse_indicators(raw: &[String]) -> anyhow::Result<IndicatorBundle> {
    let mut bundle = IndicatorBundle::new();
    for entry in raw {
        let (name, value) = split_assignment(entry)?;
        let value: f64 = value
            .parse()
            .with_context(|| format!("indicator '{}' has a non-numeric value", name))?;
        bundle.set(name, Some(value));
    }
    Ok(bundle)
}

fn print_output<T: Serialize + ?Sized>(
    format: OutputFormat,
    rows: &[ReportRow],
    value: &T,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => print!("{}", render_text(rows)),
        OutputFormat::Json => println!("{}", render_json(value)),
        OutputFormat::Csv => print!("{}", render_csv(rows)?),
    }
    Ok(())
}

fn print_config(resolved: &ResolvedConfig) {
    println!("Configuration:");
    if let Some(ref p) = resolved.config_path {
        println!("  Source: {}", p.display());
    } else {
        println!("  Source: defaults (no config file found)");
    }
    println!();
    println!("Thresholds:");
    for (name, threshold) in resolved.policy.iter() {
        println!(
            "  {}: warning {} / critical {} ({})",
            name,
            threshold.warning,
            threshold.critical,
            threshold.direction.as_str()
        );
    }
    println!();
    println!("Levels:");
    println!("  warning: {}", resolved.bands.warning);
    println!("  critical: {}", resolved.bands.critical);
    println!();
    println!("Alerts:");
    for rule in &resolved.alert_rules {
        println!("  {}: {}", rule.rule, rule.recommendation);
    }
    println!();
    println!("Dashboard:");
    println!("  semaphore_source: {}", resolved.semaphore_source.as_str());
    println!("  top: {}", resolved.top_n);
    println!(
        "  students_per_counselor: {}",
        resolved.students_per_counselor
    );
    println!("  rate_base: {}", resolved.rate_base);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_indicators() {
        let bundle = parse_indicators(&["rate_per_500=14".to_string(), " gap = 1.7".to_string()])
            .unwrap();
        assert_eq!(bundle.get("rate_per_500"), Some(14.0));
        assert_eq!(bundle.get("gap"), Some(1.7));
        assert!(parse_indicators(&["rate".to_string()]).is_err());
        assert!(parse_indicators(&["rate=high".to_string()]).is_err());
        assert!(parse_indicators(&["=3".to_string()]).is_err());
    }

    #[test]
    fn test_project_values_flag() {
        let cli = Cli::try_parse_from(["riskboard", "project", "--values", "1000,1100"]).unwrap();
        match cli.command {
            Commands::Project { values, .. } => assert_eq!(values, Some(vec![1000.0, 1100.0])),
            _ => panic!("expected project command"),
        }
    }

    #[test]
    fn test_project_json_carries_rate_with_enrollment() {
        let config = ResolvedConfig::defaults().unwrap();
        let output = project_output(&[1000.0, 1100.0], Some((50_000.0, &config))).unwrap();
        let json: serde_json::Value = serde_json::from_str(&render_json(&output)).unwrap();

        let point = json["projection"]["point_estimate"].as_f64().unwrap();
        assert!((point - 1207.25).abs() < 1e-9);
        let rate = &json["projected_rate"];
        assert!((rate["point_rate"].as_f64().unwrap() - 12.0725).abs() < 1e-9);
        assert_eq!(rate["level"], "WARNING");

        let sections: Vec<String> = output.report_rows().into_iter().map(|r| r.section).collect();
        assert!(sections.contains(&"projected_rate".to_string()));
    }

    #[test]
    fn test_project_json_omits_rate_without_enrollment() {
        let output = project_output(&[1000.0, 1100.0], None).unwrap();
        let json: serde_json::Value = serde_json::from_str(&render_json(&output)).unwrap();
        assert!(json["projection"].is_object());
        assert!(json.get("projected_rate").is_none());
    }

    #[test]
    fn test_locality_command_args() {
        let cli = Cli::try_parse_from([
            "riskboard", "locality", "data", "Kennedy", "--format", "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Locality { dir, name, format } => {
                assert_eq!(dir, PathBuf::from("data"));
                assert_eq!(name, "Kennedy");
                assert!(matches!(format, OutputFormat::Json));
            }
            _ => panic!("expected locality command"),
        }
    }
}
