//! LLM response drift on average response token length.
//!
//! The LLM ledger has its own anchored baseline (with the average token
//! length over the whole range) and a monitor window that is consumed one
//! batch at a time: once the tip reaches the window's end the window is
//! checked and then jumps forward by a full batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  config::WindowConfig,
  row::{ProjectId, RowId},
  stats,
  window::{WindowRange, plan_anchored},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmBaseline {
  pub project_id:          ProjectId,
  pub range:               WindowRange,
  pub avg_response_tokens: f64,
  pub created_at:          DateTime<Utc>,
  pub updated_at:          DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMonitor {
  pub project_id: ProjectId,
  pub range:      WindowRange,
  pub updated_at: DateTime<Utc>,
}

/// Next LLM baseline and monitor ranges for a ledger tip.
pub fn plan_llm_windows(
  config: &WindowConfig,
  tip: RowId,
  baseline: Option<WindowRange>,
  monitor: Option<WindowRange>,
) -> (Option<WindowRange>, Option<WindowRange>) {
  plan_anchored(config, tip, baseline, monitor)
}

/// The monitor range after a completed check.
pub fn advance_monitor(range: WindowRange, monitor_batch_size: i64) -> WindowRange {
  WindowRange::new(range.end_row + 1, range.end_row + monitor_batch_size)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenDriftEvaluation {
  pub monitor_avg: f64,
  /// `|baseline - monitor| / baseline`.
  pub change_pct:  f64,
  pub has_drift:   bool,
}

/// Compare a monitor window's token lengths against the baseline average.
///
/// `None` when the baseline average is zero or the window is empty.
pub fn evaluate_token_drift(
  baseline_avg: f64,
  monitor_lengths: &[u32],
  threshold: f64,
) -> Option<TokenDriftEvaluation> {
  let lengths: Vec<f64> = monitor_lengths.iter().map(|&n| f64::from(n)).collect();
  let monitor_avg = stats::mean(&lengths)?;
  let change_pct = stats::relative_change(baseline_avg, monitor_avg)?;
  Some(TokenDriftEvaluation {
    monitor_avg,
    change_pct,
    has_drift: change_pct > threshold,
  })
}

/// A completed LLM token drift check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmDriftReport {
  pub baseline:     WindowRange,
  pub monitor:      WindowRange,
  pub baseline_avg: f64,
  pub monitor_avg:  f64,
  pub change_pct:   f64,
  pub threshold:    f64,
  pub has_drift:    bool,
  /// Rows tagged as drift-affected by this check.
  pub rows_tagged:  usize,
}
