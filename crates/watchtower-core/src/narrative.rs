//! Human-readable summaries of drift reports.
//!
//! A [`Narrator`] turns a report into prose, typically by calling out to a
//! language model. Narration is best-effort: [`narrate_or_fallback`] always
//! produces text, falling back to [`TemplateNarrator`].

use std::{future::Future, pin::Pin};

use serde::Serialize;
use tracing::warn;

use crate::{
  config::TaskType,
  report::{ReportBody, ReportKind},
  stats::ColumnStats,
};

pub type NarrativeFuture<'a> =
  Pin<Box<dyn Future<Output = Result<String, NarrativeError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum NarrativeError {
  #[error("narrator is not configured")]
  Unavailable,

  #[error("narrator returned no text")]
  Empty,

  #[error("narrator request failed: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// What a narrator is asked to describe.
#[derive(Debug, Clone, Serialize)]
pub struct NarrativeRequest {
  pub kind:            ReportKind,
  pub body:            ReportBody,
  pub baseline_window: String,
  pub current_window:  String,
}

impl NarrativeRequest {
  /// A prompt that asks for interpretation, severity, likely causes and next
  /// steps, grounded in the report's numbers.
  pub fn prompt(&self) -> String {
    let mut out = String::from(
      "You are a data quality and drift detection expert. Analyze the drift \
       detection results below. Explain what the signals mean, assess \
       severity, suggest likely root causes and recommend next steps. Stick \
       to the facts in the results and keep it under 400 words.\n\n",
    );
    out.push_str(&format!("Report type: {}\n", self.kind));
    out.push_str(&format!("Baseline window: {}\n", self.baseline_window));
    out.push_str(&format!("Current window: {}\n", self.current_window));
    out.push_str(&format!(
      "Drift detected: {}\n\n",
      self.body.drift_detected()
    ));
    if let ReportBody::FeatureDrift(report) = &self.body {
      out.push_str("Feature statistics:\n");
      for (name, stats) in &report.feature_stats {
        out.push_str(&format!(
          "  - {name}: baseline {}, current {}\n",
          describe(stats.baseline.as_ref()),
          describe(stats.current.as_ref()),
        ));
      }
      out.push('\n');
    }
    let body = serde_json::to_string_pretty(&self.body)
      .unwrap_or_else(|e| format!("<unserialisable report: {e}>"));
    out.push_str("Results:\n");
    out.push_str(&body);
    out
  }
}

fn describe(stats: Option<&ColumnStats>) -> String {
  match stats {
    Some(s) => format!(
      "mean={:.4} median={:.4} std={:.4}",
      s.mean, s.median, s.std
    ),
    None => "n/a".into(),
  }
}

/// Produces narrative text for a report.
pub trait Narrator: Send + Sync {
  fn narrate<'a>(&'a self, request: &'a NarrativeRequest) -> NarrativeFuture<'a>;
}

/// Deterministic summaries built from the report's own numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrator;

impl TemplateNarrator {
  pub fn render(request: &NarrativeRequest) -> String {
    let (b, c) = (&request.baseline_window, &request.current_window);
    match &request.body {
      ReportBody::FeatureDrift(r) => format!(
        "Data Drift Analysis: Detected {} features with drift signals. \
         Overall drift score: {:.2}%. Baseline window: {b}. Current window: \
         {c}. Review the drift_tests and feature_stats for detailed \
         information.",
        r.alerts.len(),
        r.drift_score * 100.0,
      ),
      ReportBody::ModelDrift(r) => format!(
        "Model-Based Drift Analysis: a random forest separated baseline from \
         current rows with {:.2}% held-out accuracy (alert threshold \
         {:.2}%), drift {}. Baseline window: {b}. Current window: {c}.",
        r.test_accuracy * 100.0,
        r.alert_threshold * 100.0,
        if r.alert { "suspected" } else { "not detected" },
      ),
      ReportBody::PredictionDrift(r) => match &r.skipped {
        Some(reason) => format!(
          "Prediction Drift Analysis (Task: {}): skipped, {reason}. Baseline: \
           {b}. Current: {c}.",
          task_name(r.task_type),
        ),
        None => format!(
          "Prediction Drift Analysis (Task: {}): Detected {} alert signals. \
           Baseline: {b}. Current: {c}. Review mean_drift, median_drift, \
           variance_drift, and PSI metrics for details.",
          task_name(r.task_type),
          r.alerts.len(),
        ),
      },
      ReportBody::LlmTokenDrift(r) => format!(
        "LLM Response Drift Analysis: average response length moved from \
         {:.1} to {:.1} tokens ({:.2}% change, threshold {:.2}%), drift {}. \
         Baseline: {b}. Current: {c}.",
        r.baseline_avg,
        r.monitor_avg,
        r.change_pct * 100.0,
        r.threshold * 100.0,
        if r.has_drift { "detected" } else { "not detected" },
      ),
    }
  }
}

fn task_name(task: TaskType) -> &'static str {
  match task {
    TaskType::Regression => "regression",
    TaskType::Classification => "classification",
  }
}

impl Narrator for TemplateNarrator {
  fn narrate<'a>(&'a self, request: &'a NarrativeRequest) -> NarrativeFuture<'a> {
    Box::pin(async move { Ok(Self::render(request)) })
  }
}

/// Ask `narrator`, falling back to the template on any failure or empty
/// response.
pub async fn narrate_or_fallback(
  narrator: &dyn Narrator,
  request: &NarrativeRequest,
) -> String {
  match narrator.narrate(request).await {
    Ok(text) if !text.trim().is_empty() => text,
    Ok(_) => {
      warn!(kind = %request.kind, "narrator returned empty text, using template");
      TemplateNarrator::render(request)
    }
    Err(e) => {
      warn!(kind = %request.kind, "narration failed, using template: {e}");
      TemplateNarrator::render(request)
    }
  }
}
