//! Baseline and monitor windows, and the policies that move them.
//!
//! Window planning is a pure function of the ledger tip, the configured
//! batch sizes, and the current window state. The engine persists whatever
//! plan comes out; it never edits ranges by hand.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  config::{WindowConfig, WindowPolicy},
  row::{ProjectId, RecordKind, RowId},
};

// ─── Ranges ──────────────────────────────────────────────────────────────────

/// An inclusive row-id range, `start_row <= end_row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRange {
  pub start_row: RowId,
  pub end_row:   RowId,
}

impl WindowRange {
  pub fn new(start_row: RowId, end_row: RowId) -> Self {
    debug_assert!(start_row <= end_row, "inverted window {start_row}..{end_row}");
    Self { start_row, end_row }
  }

  /// Number of row ids covered by the range.
  pub fn len(&self) -> i64 { self.end_row - self.start_row + 1 }

  pub fn contains(&self, row_id: RowId) -> bool {
    (self.start_row..=self.end_row).contains(&row_id)
  }
}

impl fmt::Display for WindowRange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "rows {} to {}", self.start_row, self.end_row)
  }
}

/// Independent feature and prediction ranges held under one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindRanges {
  pub feature:    Option<WindowRange>,
  pub prediction: Option<WindowRange>,
}

impl KindRanges {
  /// Kinds that carry a feature/prediction range. LLM windows are separate.
  pub const KINDS: [RecordKind; 2] = [RecordKind::Feature, RecordKind::Prediction];

  pub fn get(&self, kind: RecordKind) -> Option<WindowRange> {
    match kind {
      RecordKind::Feature => self.feature,
      RecordKind::Prediction => self.prediction,
      RecordKind::LlmInteraction => None,
    }
  }

  pub fn set(&mut self, kind: RecordKind, range: Option<WindowRange>) {
    match kind {
      RecordKind::Feature => self.feature = range,
      RecordKind::Prediction => self.prediction = range,
      RecordKind::LlmInteraction => {}
    }
  }

  pub fn is_empty(&self) -> bool {
    self.feature.is_none() && self.prediction.is_none()
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// The persisted baseline of a project. At most one exists per project,
/// enforced by the store's unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
  pub project_id: ProjectId,
  pub ranges:     KindRanges,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// The persisted monitor windows of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorWindows {
  pub project_id: ProjectId,
  /// Target ranges; rows at the upper end may not have been ingested yet.
  pub ranges:     KindRanges,
  pub updated_at: DateTime<Utc>,
}

/// The highest row id per kind, `0` when a ledger is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTip {
  pub feature:         RowId,
  pub prediction:      RowId,
  pub llm_interaction: RowId,
}

impl LedgerTip {
  pub fn get(&self, kind: RecordKind) -> RowId {
    match kind {
      RecordKind::Feature => self.feature,
      RecordKind::Prediction => self.prediction,
      RecordKind::LlmInteraction => self.llm_interaction,
    }
  }

  pub fn set(&mut self, kind: RecordKind, row_id: RowId) {
    match kind {
      RecordKind::Feature => self.feature = row_id,
      RecordKind::Prediction => self.prediction = row_id,
      RecordKind::LlmInteraction => self.llm_interaction = row_id,
    }
  }
}

/// Readiness reported by [`crate::engine::DriftEngine::recompute_windows`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStatus {
  pub baseline_ready: bool,
  pub monitor_ready:  bool,
}

// ─── Planning ────────────────────────────────────────────────────────────────

/// The window state a project should be in after an ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowPlan {
  pub baseline: KindRanges,
  pub monitor:  KindRanges,
}

/// Compute the next window state for the feature and prediction ledgers.
///
/// `baseline` and `monitor` are the currently persisted ranges (empty when
/// no record exists). The result is the complete desired state; kinds that
/// are not ready stay `None`.
pub fn plan_windows(
  config: &WindowConfig,
  tip: &LedgerTip,
  baseline: &KindRanges,
  monitor: &KindRanges,
) -> WindowPlan {
  let mut plan = WindowPlan::default();
  for kind in KindRanges::KINDS {
    let (b, m) = match config.policy {
      WindowPolicy::Anchored => plan_anchored(
        config,
        tip.get(kind),
        baseline.get(kind),
        monitor.get(kind),
      ),
      WindowPolicy::Sliding => {
        plan_sliding(config, tip.get(kind), baseline.get(kind))
      }
    };
    plan.baseline.set(kind, b);
    plan.monitor.set(kind, m);
  }
  plan
}

/// One anchored step for a single ledger.
///
/// The baseline starts as `[1, B]` and grows by whole batches. After creation
/// or growth the monitor targets `[end + 1, end + M]` unless it already sits
/// past the baseline.
pub(crate) fn plan_anchored(
  config: &WindowConfig,
  tip: RowId,
  baseline: Option<WindowRange>,
  monitor: Option<WindowRange>,
) -> (Option<WindowRange>, Option<WindowRange>) {
  let b = config.baseline_batch_size;
  let m = config.monitor_batch_size;

  let mut range = match baseline {
    Some(range) => range,
    None if tip >= b => WindowRange::new(1, b),
    None => return (None, monitor),
  };
  while tip >= range.end_row + b {
    range.end_row += b;
  }

  let monitor = match monitor {
    Some(current) if current.start_row > range.end_row => current,
    _ => WindowRange::new(range.end_row + 1, range.end_row + m),
  };
  (Some(range), Some(monitor))
}

fn plan_sliding(
  config: &WindowConfig,
  tip: RowId,
  baseline: Option<WindowRange>,
) -> (Option<WindowRange>, Option<WindowRange>) {
  let b = config.baseline_batch_size;
  let m = config.monitor_batch_size;

  let range = match baseline {
    None if tip >= b => WindowRange::new(tip - b + 1, tip),
    None => return (None, None),
    Some(range) if tip >= range.end_row + b => WindowRange::new(tip - b + 1, tip),
    Some(range) => range,
  };

  let monitor = (tip > range.end_row).then(|| {
    WindowRange::new((range.end_row + 1).max(tip - m + 1), tip)
  });
  (Some(range), monitor)
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  fn config(policy: WindowPolicy, b: i64, m: i64) -> WindowConfig {
    WindowConfig {
      baseline_batch_size: b,
      monitor_batch_size:  m,
      policy,
    }
  }

  fn feature_tip(n: RowId) -> LedgerTip {
    LedgerTip { feature: n, ..LedgerTip::default() }
  }

  #[test]
  fn nothing_is_planned_below_the_creation_gate() {
    for policy in [WindowPolicy::Anchored, WindowPolicy::Sliding] {
      let plan = plan_windows(
        &config(policy, 1000, 500),
        &feature_tip(999),
        &KindRanges::default(),
        &KindRanges::default(),
      );
      assert!(plan.baseline.is_empty());
      assert!(plan.monitor.is_empty());
    }
  }

  #[test]
  fn anchored_scenario_1200_rows() {
    let plan = plan_windows(
      &config(WindowPolicy::Anchored, 1000, 500),
      &feature_tip(1200),
      &KindRanges::default(),
      &KindRanges::default(),
    );
    assert_eq!(plan.baseline.feature, Some(WindowRange::new(1, 1000)));
    assert_eq!(plan.monitor.feature, Some(WindowRange::new(1001, 1500)));
    assert_eq!(plan.baseline.prediction, None);
  }

  #[test]
  fn sliding_scenario_1200_rows() {
    let plan = plan_windows(
      &config(WindowPolicy::Sliding, 1000, 500),
      &feature_tip(1200),
      &KindRanges::default(),
      &KindRanges::default(),
    );
    assert_eq!(plan.baseline.feature, Some(WindowRange::new(201, 1200)));
    assert_eq!(plan.monitor.feature, None);
  }

  #[test]
  fn sliding_monitor_follows_the_tip() {
    let cfg = config(WindowPolicy::Sliding, 1000, 500);
    let baseline = KindRanges {
      feature: Some(WindowRange::new(201, 1200)),
      ..KindRanges::default()
    };
    let plan =
      plan_windows(&cfg, &feature_tip(1500), &baseline, &KindRanges::default());
    assert_eq!(plan.baseline.feature, Some(WindowRange::new(201, 1200)));
    assert_eq!(plan.monitor.feature, Some(WindowRange::new(1201, 1500)));

    let plan = plan_windows(&cfg, &feature_tip(1900), &plan.baseline, &plan.monitor);
    assert_eq!(plan.monitor.feature, Some(WindowRange::new(1401, 1900)));

    // Sliding the baseline onto the tip clears the monitor.
    let plan = plan_windows(&cfg, &feature_tip(2200), &plan.baseline, &plan.monitor);
    assert_eq!(plan.baseline.feature, Some(WindowRange::new(1201, 2200)));
    assert_eq!(plan.monitor.feature, None);
  }

  #[test]
  fn anchored_extension_moves_monitor_past_baseline() {
    let cfg = config(WindowPolicy::Anchored, 100, 50);
    let mut baseline = KindRanges::default();
    let mut monitor = KindRanges::default();
    for (tip, end, mon) in [(120, 100, 101), (199, 100, 101), (200, 200, 201), (450, 400, 401)] {
      let plan = plan_windows(&cfg, &feature_tip(tip), &baseline, &monitor);
      baseline = plan.baseline;
      monitor = plan.monitor;
      assert_eq!(baseline.feature, Some(WindowRange::new(1, end)));
      assert_eq!(monitor.feature.map(|r| r.start_row), Some(mon));
    }
  }

  #[test]
  fn prediction_and_feature_ranges_are_independent() {
    let cfg = config(WindowPolicy::Anchored, 100, 50);
    let tip = LedgerTip { feature: 40, prediction: 130, llm_interaction: 0 };
    let plan =
      plan_windows(&cfg, &tip, &KindRanges::default(), &KindRanges::default());
    assert_eq!(plan.baseline.feature, None);
    assert_eq!(plan.baseline.prediction, Some(WindowRange::new(1, 100)));

    let tip = LedgerTip { feature: 105, prediction: 130, llm_interaction: 0 };
    let plan = plan_windows(&cfg, &tip, &plan.baseline, &plan.monitor);
    assert_eq!(plan.baseline.feature, Some(WindowRange::new(1, 100)));
    assert_eq!(plan.monitor.prediction, Some(WindowRange::new(101, 150)));
  }

  proptest! {
    #[test]
    fn monitor_never_overlaps_baseline(
      sliding in any::<bool>(),
      b in 1i64..200,
      m in 1i64..200,
      batches in prop::collection::vec(1i64..400, 1..30),
    ) {
      let policy = if sliding { WindowPolicy::Sliding } else { WindowPolicy::Anchored };
      let cfg = config(policy, b, m);
      let mut tip = 0;
      let mut baseline = KindRanges::default();
      let mut monitor = KindRanges::default();
      for batch in batches {
        tip += batch;
        let previous = baseline.feature;
        let plan = plan_windows(&cfg, &feature_tip(tip), &baseline, &monitor);
        baseline = plan.baseline;
        monitor = plan.monitor;

        if let (Some(base), Some(mon)) = (baseline.feature, monitor.feature) {
          prop_assert!(mon.start_row > base.end_row);
        }
        if let Some(base) = baseline.feature {
          match policy {
            WindowPolicy::Sliding => prop_assert_eq!(base.len(), b),
            WindowPolicy::Anchored => {
              prop_assert_eq!(base.start_row, 1);
              prop_assert_eq!(base.end_row % b, 0);
              if let Some(prev) = previous {
                prop_assert!(base.end_row >= prev.end_row);
              }
            }
          }
        }
      }
    }
  }
}
