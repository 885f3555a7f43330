//! `watchtower`: drift monitoring from the command line.
//!
//! # Usage
//!
//! ```
//! watchtower ingest --project 1 --kind feature --file features.json
//! watchtower log-llm --project 1 --file interactions.json
//! watchtower windows --project 1
//! watchtower reports --project 1 --limit 5
//! ```
//!
//! Settings come from `watchtower.toml` (or `--config`) and `WATCHTOWER_*`
//! environment variables.

mod input;
mod narrator;
mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use narrator::HttpNarrator;
use settings::Settings;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;
use watchtower_core::{
  config::ProjectConfig,
  engine::{DriftEngine, IngestOutcome},
  row::{ProjectId, RecordKind},
  tokenizer::TokenizerService,
};
use watchtower_store_sqlite::SqliteStore;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "watchtower", version, about = "Data and model drift monitoring")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, value_name = "FILE", default_value = "watchtower.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Replace a project's configuration (defaults to the `[project]` table).
  Configure {
    #[arg(long)]
    project: ProjectId,
    /// TOML file holding a project configuration.
    #[arg(long, value_name = "FILE")]
    file:    Option<PathBuf>,
  },

  /// Ingest a JSON array of feature maps or predictions.
  Ingest {
    #[arg(long)]
    project: ProjectId,
    #[arg(long, value_enum)]
    kind:    LedgerKind,
    /// JSON file, or `-` for stdin.
    #[arg(long, value_name = "FILE")]
    file:    PathBuf,
    /// Batch timestamp (RFC 3339); defaults to now.
    #[arg(long)]
    at:      Option<DateTime<Utc>>,
  },

  /// Log a JSON array of `{input_text, response_text}` interactions.
  LogLlm {
    #[arg(long)]
    project: ProjectId,
    #[arg(long, value_name = "FILE")]
    file:    PathBuf,
    #[arg(long)]
    at:      Option<DateTime<Utc>>,
  },

  /// Recompute and print a project's windows.
  Windows {
    #[arg(long)]
    project: ProjectId,
  },

  /// Run a detector on the current windows.
  Detect {
    #[arg(long)]
    project: ProjectId,
    #[arg(long, value_enum)]
    kind:    DetectKind,
  },

  /// Print report history, newest first.
  Reports {
    #[arg(long)]
    project: ProjectId,
    #[arg(long, default_value_t = 20)]
    limit:   usize,
  },

  /// Print the effective settings as TOML.
  ShowConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LedgerKind {
  Feature,
  Prediction,
}

impl From<LedgerKind> for RecordKind {
  fn from(kind: LedgerKind) -> Self {
    match kind {
      LedgerKind::Feature => RecordKind::Feature,
      LedgerKind::Prediction => RecordKind::Prediction,
    }
  }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DetectKind {
  Feature,
  Prediction,
  Llm,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  if let Command::ShowConfig = cli.command {
    let rendered =
      toml::to_string_pretty(&settings).context("failed to render settings")?;
    println!("{rendered}");
    return Ok(());
  }

  let store = SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))?;

  let mut engine = DriftEngine::new(Arc::new(store))
    .with_tokenizer(Arc::new(TokenizerService::new()));
  if let Some(narrator) = settings.narrator.clone() {
    info!(endpoint = %narrator.endpoint, model = %narrator.model, "using HTTP narrator");
    engine = engine.with_narrator(Arc::new(HttpNarrator::new(narrator)?));
  }

  run(&engine, &settings, cli.command).await
}

async fn run(
  engine: &DriftEngine<SqliteStore>,
  settings: &Settings,
  command: Command,
) -> Result<()> {
  match command {
    Command::Configure { project, file } => {
      let config = match file {
        Some(path) => {
          let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading project config {}", path.display()))?;
          toml::from_str::<ProjectConfig>(&raw).context("parsing project config")?
        }
        None => settings.project.clone(),
      };
      engine
        .configure_project(project, config)
        .await
        .context("storing project config")?;
      println!("project {project} configured");
    }

    Command::Ingest { project, kind, file, at } => {
      let kind = RecordKind::from(kind);
      let payloads = input::read_payloads(&file, kind)?;
      engine
        .ensure_project(project, settings.project.clone())
        .await
        .context("seeding project config")?;
      let outcome = engine
        .ingest(project, kind, payloads, at.unwrap_or_else(Utc::now))
        .await
        .context("ingestion failed")?;
      print_outcome(&outcome)?;
    }

    Command::LogLlm { project, file, at } => {
      let interactions = input::read_interactions(&file)?;
      engine
        .ensure_project(project, settings.project.clone())
        .await
        .context("seeding project config")?;
      let outcome = engine
        .log_interactions(project, interactions, at.unwrap_or_else(Utc::now))
        .await
        .context("logging interactions failed")?;
      print_outcome(&outcome)?;
      let tagged = engine.drift_tagged_rows(project).await?;
      println!("drift-tagged interactions: {tagged}");
    }

    Command::Windows { project } => {
      let status = engine.recompute_windows(project).await?;
      println!(
        "baseline ready: {}, monitor ready: {}",
        status.baseline_ready, status.monitor_ready
      );
      for kind in RecordKind::ALL {
        let baseline = engine.get_baseline_window(project, kind).await?;
        let monitor = engine.get_monitor_window(project, kind).await?;
        println!(
          "{kind:<16} baseline: {:<24} monitor: {}",
          describe(baseline),
          describe(monitor)
        );
      }
    }

    Command::Detect { project, kind } => match kind {
      DetectKind::Feature => match engine.detect_feature_drift(project).await? {
        Some(detection) => {
          print_json(&detection.statistical)?;
          if let Some(model) = &detection.model {
            print_json(model)?;
          }
        }
        None => println!("feature windows not ready"),
      },
      DetectKind::Prediction => {
        match engine.detect_prediction_drift(project).await? {
          Some(record) => print_json(&record)?,
          None => println!("prediction windows not ready"),
        }
      }
      DetectKind::Llm => match engine.run_llm_token_drift(project).await? {
        Some(report) => print_json(&report)?,
        None => println!("no complete llm monitor window"),
      },
    },

    Command::Reports { project, limit } => {
      for record in engine.reports(project, limit).await? {
        println!(
          "{} {} {} drift={}",
          record.created_at.to_rfc3339(),
          record.report_id,
          record.kind(),
          record.body.drift_detected()
        );
        if let Some(text) = &record.narrative {
          println!("  {text}");
        }
      }
    }

    Command::ShowConfig => {}
  }
  Ok(())
}

fn describe(range: Option<watchtower_core::window::WindowRange>) -> String {
  range.map_or_else(|| "-".to_owned(), |r| r.to_string())
}

fn print_outcome(outcome: &IngestOutcome) -> Result<()> {
  println!(
    "appended {} rows{}",
    outcome.rows_appended(),
    outcome.appended.map(|r| format!(" ({r})")).unwrap_or_default()
  );
  println!(
    "baseline ready: {}, monitor ready: {}",
    outcome.status.baseline_ready, outcome.status.monitor_ready
  );
  for record in &outcome.reports {
    print_json(record)?;
  }
  if let Some(err) = &outcome.detection_error {
    eprintln!("detection failed: {err}");
  }
  Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  let rendered =
    serde_json::to_string_pretty(value).context("failed to render report")?;
  println!("{rendered}");
  Ok(())
}
