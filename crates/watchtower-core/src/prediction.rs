//! Drift of the model's own outputs.
//!
//! Regression outputs are compared like a single feature column, plus
//! quantile shifts. Classification outputs are compared through their class
//! proportions. Both variants alert when at least `alert_threshold` signals
//! fire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  battery::{KsRule, KsTest, PsiTest, ShiftTest},
  config::{DriftThresholds, TaskType},
  row::FieldValue,
  stats::{self, ks_two_sample, relative_change},
};

pub const REGRESSION_ALERT: &str = "regression_output_drift";
pub const CLASSIFICATION_ALERT: &str = "classification_output_drift";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileShift {
  pub quantile:       f64,
  pub value:          f64,
  pub threshold:      f64,
  pub drift_detected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassShift {
  pub class:          String,
  pub baseline_ratio: f64,
  pub current_ratio:  f64,
  pub value:          f64,
  pub threshold:      f64,
  pub drift_detected: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictionDriftReport {
  pub task_type:             TaskType,
  pub baseline_samples:      usize,
  pub current_samples:       usize,
  /// Set when the run was skipped; no test fields are populated then.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub skipped:               Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mean_shift:            Option<ShiftTest>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub median_shift:          Option<ShiftTest>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variance_shift:        Option<ShiftTest>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub quantile_shifts:       Vec<QuantileShift>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub baseline_distribution: BTreeMap<String, f64>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub current_distribution:  BTreeMap<String, f64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub class_shifts:          Vec<ClassShift>,
  /// Absent for classification when a label has no integer encoding.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ks_test:               Option<KsTest>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub psi:                   Option<PsiTest>,
  pub alerts:                Vec<String>,
  pub overall_drift:         bool,
}

/// Compare two batches of prediction values.
///
/// Null predictions are dropped. For regression every remaining value must
/// be a finite number.
pub fn run_prediction_drift(
  baseline: &[FieldValue],
  current: &[FieldValue],
  task_type: TaskType,
  thresholds: &DriftThresholds,
) -> Result<PredictionDriftReport> {
  let base: Vec<&FieldValue> = baseline.iter().filter(|v| !v.is_null()).collect();
  let curr: Vec<&FieldValue> = current.iter().filter(|v| !v.is_null()).collect();

  let mut report = PredictionDriftReport {
    task_type,
    baseline_samples: base.len(),
    current_samples: curr.len(),
    ..PredictionDriftReport::default()
  };

  if base.len() < thresholds.min_samples || curr.len() < thresholds.min_samples {
    report.skipped = Some(format!(
      "needs {} predictions on each side, got {} baseline and {} current",
      thresholds.min_samples,
      base.len(),
      curr.len()
    ));
    return Ok(report);
  }

  match task_type {
    TaskType::Regression => regression(&mut report, &base, &curr, thresholds)?,
    TaskType::Classification => {
      classification(&mut report, &base, &curr, thresholds)
    }
  }
  report.overall_drift = !report.alerts.is_empty();
  Ok(report)
}

fn numbers(values: &[&FieldValue]) -> Result<Vec<f64>> {
  values
    .iter()
    .enumerate()
    .map(|(index, v)| v.as_number().ok_or(Error::NonNumericPrediction { index }))
    .collect()
}

fn regression(
  report: &mut PredictionDriftReport,
  base: &[&FieldValue],
  curr: &[&FieldValue],
  t: &DriftThresholds,
) -> Result<()> {
  let base = numbers(base)?;
  let curr = numbers(curr)?;

  let shift = |f: fn(&[f64]) -> Option<f64>, threshold| {
    ShiftTest::evaluate(f(&base)?, f(&curr)?, threshold)
  };
  let population_variance = |xs: &[f64]| stats::variance(xs, 0);
  report.mean_shift = shift(stats::mean, t.mean_threshold);
  report.median_shift = shift(stats::median, t.median_threshold);
  report.variance_shift = ShiftTest::evaluate(
    population_variance(&base).unwrap_or(0.0),
    population_variance(&curr).unwrap_or(0.0),
    t.variance_threshold,
  );

  report.quantile_shifts = t
    .quantiles
    .iter()
    .filter_map(|&q| {
      let value =
        relative_change(stats::quantile(&base, q)?, stats::quantile(&curr, q)?)?;
      Some(QuantileShift {
        quantile: q,
        value,
        threshold: t.variance_threshold,
        drift_detected: value > t.variance_threshold,
      })
    })
    .collect();

  report.ks_test = ks_two_sample(&base, &curr).map(|outcome| {
    KsTest::evaluate(outcome, KsRule::StatisticAbove, t.ks_statistic_threshold)
  });
  report.psi = PsiTest::evaluate(&base, &curr, t);

  let fired = [&report.mean_shift, &report.median_shift, &report.variance_shift]
    .into_iter()
    .flatten()
    .filter(|s| s.drift_detected)
    .count()
    + usize::from(report.psi.as_ref().is_some_and(PsiTest::is_high))
    + usize::from(report.ks_test.as_ref().is_some_and(|k| k.drift_detected));
  if fired >= t.alert_threshold {
    report.alerts.push(REGRESSION_ALERT.to_owned());
  }
  Ok(())
}

fn classification(
  report: &mut PredictionDriftReport,
  base: &[&FieldValue],
  curr: &[&FieldValue],
  t: &DriftThresholds,
) {
  let base_labels: Vec<String> = base.iter().filter_map(|v| v.class_label()).collect();
  let curr_labels: Vec<String> = curr.iter().filter_map(|v| v.class_label()).collect();
  report.baseline_distribution = distribution(&base_labels);
  report.current_distribution = distribution(&curr_labels);

  report.class_shifts = report
    .baseline_distribution
    .iter()
    .filter_map(|(class, &b)| {
      let c = report.current_distribution.get(class).copied().unwrap_or(0.0);
      let value = relative_change(b, c)?;
      Some(ClassShift {
        class: class.clone(),
        baseline_ratio: b,
        current_ratio: c,
        value,
        threshold: t.mean_threshold,
        drift_detected: value > t.mean_threshold,
      })
    })
    .collect();

  let encoded = base
    .iter()
    .map(|v| encode_label(v))
    .collect::<Option<Vec<f64>>>()
    .zip(curr.iter().map(|v| encode_label(v)).collect::<Option<Vec<f64>>>());
  report.ks_test = encoded.and_then(|(b, c)| {
    ks_two_sample(&b, &c).map(|outcome| {
      KsTest::evaluate(outcome, KsRule::StatisticAbove, t.ks_statistic_threshold)
    })
  });

  let mapped = |labels: &[String], dist: &BTreeMap<String, f64>| -> Vec<f64> {
    labels.iter().map(|l| dist.get(l).copied().unwrap_or(0.0)).collect()
  };
  report.psi = PsiTest::evaluate(
    &mapped(&base_labels, &report.baseline_distribution),
    &mapped(&curr_labels, &report.current_distribution),
    t,
  );

  let fired = usize::from(report.class_shifts.iter().any(|s| s.drift_detected))
    + usize::from(report.psi.as_ref().is_some_and(PsiTest::is_high))
    + usize::from(report.ks_test.as_ref().is_some_and(|k| k.drift_detected));
  if fired >= t.alert_threshold {
    report.alerts.push(CLASSIFICATION_ALERT.to_owned());
  }
}

fn distribution(labels: &[String]) -> BTreeMap<String, f64> {
  let mut counts: BTreeMap<String, f64> = BTreeMap::new();
  for label in labels {
    *counts.entry(label.clone()).or_default() += 1.0;
  }
  let n = labels.len() as f64;
  counts.values_mut().for_each(|c| *c /= n);
  counts
}

/// Integer encoding of a class label: numbers truncate, booleans map to
/// 0/1, and text must parse as an integer.
fn encode_label(value: &FieldValue) -> Option<f64> {
  match value {
    FieldValue::Number(n) if n.is_finite() => Some(n.trunc()),
    FieldValue::Bool(b) => Some(f64::from(u8::from(*b))),
    FieldValue::Text(s) => s.trim().parse::<i64>().ok().map(|i| i as f64),
    _ => None,
  }
}
