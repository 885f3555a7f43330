//! Per-project configuration with the documented defaults.
//!
//! Every struct is `#[serde(default)]`, so a partially specified TOML or JSON
//! document fills the remaining fields from [`Default`].

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Windows ─────────────────────────────────────────────────────────────────

/// How the baseline window moves as the ledger grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
  /// Baseline starts at row 1 and only ever extends by whole batches.
  #[default]
  Anchored,
  /// Baseline is always the most recent complete batch.
  Sliding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
  pub baseline_batch_size: i64,
  pub monitor_batch_size:  i64,
  pub policy:              WindowPolicy,
}

impl Default for WindowConfig {
  fn default() -> Self {
    Self {
      baseline_batch_size: 1000,
      monitor_batch_size:  500,
      policy:              WindowPolicy::Anchored,
    }
  }
}

// ─── Statistical battery ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftThresholds {
  pub mean_threshold:         f64,
  pub median_threshold:       f64,
  pub variance_threshold:     f64,
  /// Feature KS rule: drift when `p_value < ks_pvalue_threshold`.
  pub ks_pvalue_threshold:    f64,
  /// Prediction KS rule: drift when `statistic > ks_statistic_threshold`.
  pub ks_statistic_threshold: f64,
  pub psi_low:                f64,
  pub psi_high:               f64,
  pub psi_bins:               usize,
  pub min_samples:            usize,
  /// Number of fired signals needed to alert a column or prediction run.
  pub alert_threshold:        usize,
  /// Quantiles compared for regression predictions.
  pub quantiles:              Vec<f64>,
}

impl Default for DriftThresholds {
  fn default() -> Self {
    Self {
      mean_threshold:         0.10,
      median_threshold:       0.10,
      variance_threshold:     0.20,
      ks_pvalue_threshold:    0.05,
      ks_statistic_threshold: 0.10,
      psi_low:                0.10,
      psi_high:               0.25,
      psi_bins:               10,
      min_samples:            50,
      alert_threshold:        2,
      quantiles:              vec![0.25, 0.5, 0.75, 0.95],
    }
  }
}

// ─── Model-based detector ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelDriftConfig {
  pub n_trees:           usize,
  pub test_fraction:     f64,
  pub seed:              u64,
  /// Alert when held-out accuracy is at least this value.
  pub alert_threshold:   f64,
  /// `None` grows trees until leaves are pure.
  pub max_depth:         Option<usize>,
  pub min_samples_split: usize,
}

impl Default for ModelDriftConfig {
  fn default() -> Self {
    Self {
      n_trees:           200,
      test_fraction:     0.2,
      seed:              42,
      alert_threshold:   0.50,
      max_depth:         None,
      min_samples_split: 2,
    }
  }
}

// ─── LLM ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmDriftConfig {
  pub token_drift_threshold: f64,
}

impl Default for LlmDriftConfig {
  fn default() -> Self { Self { token_drift_threshold: 0.15 } }
}

// ─── Project ─────────────────────────────────────────────────────────────────

/// What the monitored model predicts; selects the prediction drift variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
  #[default]
  Regression,
  Classification,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
  pub window:    WindowConfig,
  pub drift:     DriftThresholds,
  pub model:     ModelDriftConfig,
  pub llm:       LlmDriftConfig,
  pub task_type: TaskType,
}

impl ProjectConfig {
  /// Reject configurations the window and detector maths cannot work with.
  pub fn validate(&self) -> Result<()> {
    let w = &self.window;
    if w.baseline_batch_size < 1 || w.monitor_batch_size < 1 {
      return Err(Error::InvalidConfig(
        "batch sizes must be at least 1".into(),
      ));
    }
    if self.drift.psi_bins < 1 {
      return Err(Error::InvalidConfig("psi_bins must be at least 1".into()));
    }
    if self.drift.psi_low > self.drift.psi_high {
      return Err(Error::InvalidConfig(
        "psi_low must not exceed psi_high".into(),
      ));
    }
    if !(0.0..1.0).contains(&self.model.test_fraction)
      || self.model.test_fraction == 0.0
    {
      return Err(Error::InvalidConfig(
        "test_fraction must be in (0, 1)".into(),
      ));
    }
    if self.model.n_trees == 0 {
      return Err(Error::InvalidConfig("n_trees must be at least 1".into()));
    }
    if self.drift.quantiles.iter().any(|q| !(0.0..=1.0).contains(q)) {
      return Err(Error::InvalidConfig(
        "quantiles must lie in [0, 1]".into(),
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_document_fills_defaults() {
    let cfg: ProjectConfig = serde_json::from_str(
      r#"{"window": {"policy": "sliding"}, "drift": {"min_samples": 10}}"#,
    )
    .unwrap();
    assert_eq!(cfg.window.policy, WindowPolicy::Sliding);
    assert_eq!(cfg.window.baseline_batch_size, 1000);
    assert_eq!(cfg.drift.min_samples, 10);
    assert_eq!(cfg.drift.alert_threshold, 2);
    assert_eq!(cfg.model.n_trees, 200);
    assert!(cfg.validate().is_ok());
  }

  #[test]
  fn zero_batch_size_is_rejected() {
    let mut cfg = ProjectConfig::default();
    cfg.window.monitor_batch_size = 0;
    assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
  }
}
