//! Persisted drift records.
//!
//! A [`DriftRecord`] wraps one report body with the windows it compared and
//! an optional narrative. Bodies are stored as a discriminant plus JSON, the
//! same way row payloads are.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  battery::DriftReport,
  llm::LlmDriftReport,
  model_drift::ModelDriftReport,
  prediction::PredictionDriftReport,
  row::ProjectId,
  window::WindowRange,
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
  FeatureDrift,
  ModelDrift,
  PredictionDrift,
  LlmTokenDrift,
}

impl ReportKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::FeatureDrift => "feature_drift",
      Self::ModelDrift => "model_drift",
      Self::PredictionDrift => "prediction_drift",
      Self::LlmTokenDrift => "llm_token_drift",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "feature_drift" => Ok(Self::FeatureDrift),
      "model_drift" => Ok(Self::ModelDrift),
      "prediction_drift" => Ok(Self::PredictionDrift),
      "llm_token_drift" => Ok(Self::LlmTokenDrift),
      other => Err(Error::UnknownReportType(other.to_owned())),
    }
  }
}

impl fmt::Display for ReportKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum ReportBody {
  FeatureDrift(DriftReport),
  ModelDrift(ModelDriftReport),
  PredictionDrift(PredictionDriftReport),
  LlmTokenDrift(LlmDriftReport),
}

impl ReportBody {
  pub fn kind(&self) -> ReportKind {
    match self {
      Self::FeatureDrift(_) => ReportKind::FeatureDrift,
      Self::ModelDrift(_) => ReportKind::ModelDrift,
      Self::PredictionDrift(_) => ReportKind::PredictionDrift,
      Self::LlmTokenDrift(_) => ReportKind::LlmTokenDrift,
    }
  }

  /// Whether the report signals drift, whatever its type.
  pub fn drift_detected(&self) -> bool {
    match self {
      Self::FeatureDrift(r) => r.overall_drift,
      Self::ModelDrift(r) => r.alert,
      Self::PredictionDrift(r) => r.overall_drift,
      Self::LlmTokenDrift(r) => r.has_drift,
    }
  }

  /// The body without its type tag.
  pub fn to_json(&self) -> Result<serde_json::Value> {
    let full = serde_json::to_value(self)?;
    Ok(full.get("body").cloned().unwrap_or(serde_json::Value::Null))
  }

  pub fn from_parts(kind: &str, body: serde_json::Value) -> Result<Self> {
    let kind = ReportKind::parse(kind)?;
    let wrapped = serde_json::json!({ "type": kind.as_str(), "body": body });
    Ok(serde_json::from_value(wrapped)?)
  }
}

/// The slice of the ledger a report looked at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowDescriptor {
  pub range:       WindowRange,
  pub row_count:   usize,
  /// Batch timestamp of the newest row in the range.
  pub last_row_at: Option<DateTime<Utc>>,
}

impl fmt::Display for WindowDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({} rows)", self.range, self.row_count)?;
    if let Some(at) = self.last_row_at {
      write!(f, " up to {}", at.to_rfc3339())?;
    }
    Ok(())
  }
}

/// An immutable entry in a project's report history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftRecord {
  pub report_id:  Uuid,
  pub project_id: ProjectId,
  pub created_at: DateTime<Utc>,
  pub baseline:   WindowDescriptor,
  pub current:    WindowDescriptor,
  pub body:       ReportBody,
  pub narrative:  Option<String>,
}

impl DriftRecord {
  pub fn new(
    project_id: ProjectId,
    baseline: WindowDescriptor,
    current: WindowDescriptor,
    body: ReportBody,
  ) -> Self {
    Self {
      report_id: Uuid::new_v4(),
      project_id,
      created_at: Utc::now(),
      baseline,
      current,
      body,
      narrative: None,
    }
  }

  pub fn kind(&self) -> ReportKind { self.body.kind() }
}
