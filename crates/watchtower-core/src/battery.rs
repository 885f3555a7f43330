//! The statistical drift battery over feature columns.
//!
//! Each eligible column gets five tests: relative mean, median and variance
//! shifts, a two-sample KS test, and PSI. A column is alerted when enough of
//! them fire. The functions here are pure; the engine decides when to run
//! them and where to store the result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  config::DriftThresholds,
  frame::NumericFrame,
  stats::{
    self, ColumnStats, KsOutcome, PsiSeverity, ks_two_sample, relative_change,
  },
};

// ─── Test outcomes ───────────────────────────────────────────────────────────

/// A relative-change test against a fixed threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftTest {
  pub value:          f64,
  pub threshold:      f64,
  pub drift_detected: bool,
}

impl ShiftTest {
  /// `None` when the relative change is undefined (zero baseline).
  pub fn evaluate(base: f64, current: f64, threshold: f64) -> Option<Self> {
    let value = relative_change(base, current)?;
    Some(Self { value, threshold, drift_detected: value > threshold })
  }
}

/// Which half of a KS outcome decides drift.
///
/// Feature columns use the p-value; prediction outputs use the statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KsRule {
  PValueBelow,
  StatisticAbove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KsTest {
  pub statistic:      f64,
  pub p_value:        f64,
  pub threshold:      f64,
  pub rule:           KsRule,
  pub drift_detected: bool,
}

impl KsTest {
  pub fn evaluate(outcome: KsOutcome, rule: KsRule, threshold: f64) -> Self {
    let drift_detected = match rule {
      KsRule::PValueBelow => outcome.p_value < threshold,
      KsRule::StatisticAbove => outcome.statistic > threshold,
    };
    Self {
      statistic: outcome.statistic,
      p_value: outcome.p_value,
      threshold,
      rule,
      drift_detected,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsiTest {
  pub value:     f64,
  pub severity:  PsiSeverity,
  pub psi_low:   f64,
  pub psi_high:  f64,
}

impl PsiTest {
  pub fn evaluate(
    baseline: &[f64],
    current: &[f64],
    thresholds: &DriftThresholds,
  ) -> Option<Self> {
    let value = stats::psi(baseline, current, thresholds.psi_bins)?;
    Some(Self {
      value,
      severity: PsiSeverity::classify(
        value,
        thresholds.psi_low,
        thresholds.psi_high,
      ),
      psi_low: thresholds.psi_low,
      psi_high: thresholds.psi_high,
    })
  }

  pub fn is_high(&self) -> bool { self.severity == PsiSeverity::High }
}

/// All tests that ran on one eligible column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnTests {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mean_shift:     Option<ShiftTest>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub median_shift:   Option<ShiftTest>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variance_shift: Option<ShiftTest>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ks_test:        Option<KsTest>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub psi:            Option<PsiTest>,
}

impl ColumnTests {
  /// Number of fired signals: each shift, KS, and a high PSI.
  pub fn fired_signals(&self) -> usize {
    let shifts = [&self.mean_shift, &self.median_shift, &self.variance_shift]
      .into_iter()
      .flatten()
      .filter(|t| t.drift_detected)
      .count();
    shifts
      + usize::from(self.ks_test.as_ref().is_some_and(|t| t.drift_detected))
      + usize::from(self.psi.as_ref().is_some_and(PsiTest::is_high))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
  pub baseline: Option<ColumnStats>,
  pub current:  Option<ColumnStats>,
}

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriftReport {
  /// Descriptive statistics for every numeric column.
  pub feature_stats: BTreeMap<String, FeatureStats>,
  /// Test outcomes for columns with enough samples on both sides.
  pub drift_tests:   BTreeMap<String, ColumnTests>,
  /// Alerted column names, in column order.
  pub alerts:        Vec<String>,
  pub overall_drift: bool,
  /// Alerted columns over eligible columns.
  pub drift_score:   f64,
}

impl DriftReport {
  pub fn eligible_columns(&self) -> usize { self.drift_tests.len() }
}

/// Run the battery over every numeric column of `baseline`.
///
/// `current` must carry each baseline column; see [`NumericFrame::align`].
pub fn run_statistical_drift(
  baseline: &NumericFrame,
  current: &NumericFrame,
  thresholds: &DriftThresholds,
) -> Result<DriftReport> {
  let mut report = DriftReport::default();

  for base_col in baseline.columns() {
    let name = &base_col.name;
    let curr_col =
      current.column(name).ok_or_else(|| Error::SchemaMismatch {
        column: name.clone(),
        reason: "absent from the current batch".into(),
      })?;

    report.feature_stats.insert(name.clone(), FeatureStats {
      baseline: ColumnStats::describe(&base_col.values),
      current:  ColumnStats::describe(&curr_col.values),
    });

    let base = base_col.present();
    let curr = curr_col.present();
    if base.len() < thresholds.min_samples || curr.len() < thresholds.min_samples
    {
      continue;
    }

    let tests = column_tests(&base, &curr, thresholds);
    if tests.fired_signals() >= thresholds.alert_threshold {
      report.alerts.push(name.clone());
    }
    report.drift_tests.insert(name.clone(), tests);
  }

  report.overall_drift = !report.alerts.is_empty();
  if !report.drift_tests.is_empty() {
    report.drift_score =
      report.alerts.len() as f64 / report.drift_tests.len() as f64;
  }
  Ok(report)
}

fn column_tests(
  base: &[f64],
  curr: &[f64],
  t: &DriftThresholds,
) -> ColumnTests {
  let shift = |f: fn(&[f64]) -> Option<f64>, threshold| {
    ShiftTest::evaluate(f(base)?, f(curr)?, threshold)
  };
  let sample_variance = |xs: &[f64]| stats::variance(xs, 1);

  ColumnTests {
    mean_shift:     shift(stats::mean, t.mean_threshold),
    median_shift:   shift(stats::median, t.median_threshold),
    variance_shift: ShiftTest::evaluate(
      sample_variance(base).unwrap_or(0.0),
      sample_variance(curr).unwrap_or(0.0),
      t.variance_threshold,
    ),
    ks_test:        ks_two_sample(base, curr).map(|outcome| {
      KsTest::evaluate(outcome, KsRule::PValueBelow, t.ks_pvalue_threshold)
    }),
    psi:            PsiTest::evaluate(base, curr, t),
  }
}
