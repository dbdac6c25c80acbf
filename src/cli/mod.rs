// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Three commands are supported:
//   1. `train`:   trains classifiers and stores a new version
//   2. `predict`: loads a version and stores predictions
//   3. `audit`:   summarises a pseudo-label export
//
// Train and predict print a per-unit summary table and exit
// non-zero when any unit failed.

pub mod commands;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser};
use commands::{AuditArgs, Commands, PredictArgs, TrainArgs};

use crate::application::{
    audit_use_case::audit_export,
    predict_use_case::{PredictConfig, PredictReport, PredictUseCase},
    train_use_case::{BatchReport, TrainConfig, TrainUseCase},
};

#[derive(Parser, Debug)]
#[command(
    name = "gregory-ml",
    version,
    about = "Train article relevance classifiers per team and subject, then score new articles."
)]
pub struct Cli {
    /// Log more: -v debug, -vv trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log directive for the crate at this verbosity.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "gregory_ml=info",
            1 => "gregory_ml=debug",
            _ => "gregory_ml=trace",
        }
    }

    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::Predict(args) => run_predict(args),
            Commands::Audit(args)   => run_audit(&args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = TrainConfig::try_from(args)?;
    let dry_run = config.dry_run;
    tracing::info!("Training from '{}' into '{}'", config.data_dir.display(), config.models_dir.display());

    let report = TrainUseCase::new(config).execute()?;
    print!("{}", train_table(&report));

    if !report.all_succeeded() {
        bail!("{} of {} training units failed", report.failures(), report.units.len());
    }
    if dry_run {
        println!("Dry run: nothing was written.");
    }
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    let report = PredictUseCase::new(PredictConfig::try_from(args)?).execute()?;
    print!("{}", predict_table(&report));

    let totals = report.totals();
    println!(
        "processed={} skipped={} failures={} new={}",
        totals.processed, totals.skipped, totals.failures, totals.new_predictions
    );
    if report.failures() > 0 {
        bail!("{} of {} prediction units failed", report.failures(), report.units.len());
    }
    Ok(())
}

fn run_audit(args: &AuditArgs) -> Result<()> {
    let s = audit_export(&args.file, &args.into())?;
    println!("annotated={} pseudo={} relevant={} not_relevant={}", s.original, s.pseudo, s.relevant, s.not_relevant);
    for (iteration, n) in &s.by_iteration {
        println!("  iteration {iteration}: {n} rows");
    }
    if let Some(c) = s.min_confidence {
        println!("lowest kept confidence: {c:.3}");
    }
    Ok(())
}

// ─── Summary tables ───────────────────────────────────────────────────────────

fn score(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v))
}

fn train_table(report: &BatchReport) -> String {
    let mut rows = vec![[
        "Team", "Subject", "Algorithm", "Val Acc", "Test Acc", "Val F1", "Test F1", "Status",
    ].map(String::from)];
    for u in &report.units {
        rows.push([
            u.unit.team.clone(),
            u.unit.subject.clone(),
            u.unit.algorithm.to_string(),
            score(u.metrics.get_f64("val_accuracy")),
            score(u.metrics.get_f64("test_accuracy")),
            score(u.metrics.get_f64("val_f1")),
            score(u.metrics.get_f64("test_f1")),
            status(u.version.as_deref(), u.error.as_deref()),
        ]);
    }
    render(&rows)
}

fn predict_table(report: &PredictReport) -> String {
    let mut rows = vec![[
        "Team", "Subject", "Algorithm", "Version", "Processed", "Skipped", "Failures", "Status",
    ].map(String::from)];
    for u in &report.units {
        rows.push([
            u.unit.team.clone(),
            u.unit.subject.clone(),
            u.unit.algorithm.to_string(),
            u.version.clone().unwrap_or_else(|| "-".into()),
            u.stats.processed.to_string(),
            u.stats.skipped.to_string(),
            u.stats.failures.to_string(),
            status(None, u.error.as_deref()),
        ]);
    }
    render(&rows)
}

fn status(version: Option<&str>, error: Option<&str>) -> String {
    match (error, version) {
        (Some(e), _) => format!("FAILED: {}", e.lines().next().unwrap_or_default()),
        (None, Some(v)) => format!("ok ({v})"),
        (None, None) => "ok".into(),
    }
}

/// Left-aligned columns separated by ` | `, header underlined.
fn render<const N: usize>(rows: &[[String; N]]) -> String {
    let mut widths = [0usize; N];
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let line = |row: &[String; N]| -> String {
        let cells: Vec<String> = row.iter().zip(&widths).map(|(c, w)| format!("{c:<w$}")).collect();
        cells.join(" | ").trim_end().to_string() + "\n"
    };

    let mut out = String::new();
    for (i, row) in rows.iter().enumerate() {
        out.push_str(&line(row));
        if i == 0 {
            let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            out.push_str(&rule.join("-+-"));
            out.push('\n');
        }
    }
    out
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{scope::WorkUnit, train_use_case::UnitReport};
    use crate::domain::algorithm::Algorithm;
    use crate::infra::metrics::MetricsRecord;

    fn unit(algorithm: Algorithm) -> WorkUnit {
        WorkUnit { team: "team-a".into(), subject: "ms".into(), algorithm }
    }

    #[test]
    fn test_train_table_shows_metrics_and_failures() {
        let mut metrics = MetricsRecord::new();
        metrics.insert_f64("val_accuracy", 0.8);
        metrics.insert_f64("test_accuracy", 0.75);
        metrics.insert_f64("val_f1", 0.5);
        metrics.insert_f64("test_f1", 0.6);
        let report = BatchReport {
            units: vec![
                UnitReport {
                    unit: unit(Algorithm::GbdtTfidf),
                    version: Some("20260101".into()),
                    dataset: None,
                    pseudo: None,
                    metrics,
                    error: None,
                },
                UnitReport {
                    unit: unit(Algorithm::Recurrent),
                    version: None,
                    dataset: None,
                    pseudo: None,
                    metrics: MetricsRecord::new(),
                    error: Some("data error: only 1 positive".into()),
                },
            ],
        };

        let table = train_table(&report);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Team"));
        assert!(lines[0].contains("Val Acc | Test Acc | Val F1 | Test F1 | Status"));
        assert!(lines[2].contains("0.800") && lines[2].contains("0.750") && lines[2].contains("ok (20260101)"));
        assert!(lines[3].contains("lstm") && lines[3].contains("FAILED: data error"));
    }

    #[test]
    fn test_verbosity_maps_to_directive() {
        let cli = Cli::try_parse_from(["gregory-ml", "-vv", "predict"]).unwrap();
        assert_eq!(cli.log_directive(), "gregory_ml=trace");
        let cli = Cli::try_parse_from(["gregory-ml", "predict"]).unwrap();
        assert_eq!(cli.log_directive(), "gregory_ml=info");
    }
}
