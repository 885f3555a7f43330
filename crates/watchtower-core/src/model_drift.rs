//! Model-based drift: can a classifier tell baseline rows from current rows?
//!
//! Baseline rows are labelled `0` and current rows `1`. A random forest is
//! trained on a stratified split and its held-out accuracy becomes the drift
//! score; around `0.5` the two batches are indistinguishable.

use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
  config::ModelDriftConfig,
  forest::{ForestParams, RandomForest},
  frame::NumericFrame,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDriftReport {
  /// Held-out accuracy, identical to `test_accuracy`.
  pub drift_score:      f64,
  pub alert:            bool,
  pub alert_threshold:  f64,
  pub baseline_samples: usize,
  pub current_samples:  usize,
  pub train_samples:    usize,
  pub test_samples:     usize,
  pub test_accuracy:    f64,
  pub n_trees:          usize,
  pub model_type:       String,
  pub features:         Vec<String>,
}

/// Train and score the baseline-vs-current classifier.
///
/// `None` when there are no numeric columns or either batch has fewer than
/// two rows. Missing values are filled with `0`. CPU-bound; the engine calls
/// this on the blocking pool.
pub fn run_model_based_drift(
  baseline: &NumericFrame,
  current: &NumericFrame,
  config: &ModelDriftConfig,
) -> Option<ModelDriftReport> {
  if baseline.n_columns() == 0
    || baseline.n_rows() < 2
    || current.n_rows() < 2
  {
    return None;
  }

  let features: Vec<String> =
    baseline.column_names().map(str::to_owned).collect();
  let mut x = baseline.to_rows(0.0);
  x.extend(current_rows(baseline, current));
  let y: Vec<bool> = (0..x.len()).map(|i| i >= baseline.n_rows()).collect();

  let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
  let (train, test) = stratified_split(&y, config.test_fraction, &mut rng);

  let train_x: Vec<Vec<f64>> = train.iter().map(|&i| x[i].clone()).collect();
  let train_y: Vec<bool> = train.iter().map(|&i| y[i]).collect();
  let forest = RandomForest::fit(&train_x, &train_y, &ForestParams {
    n_trees:           config.n_trees,
    max_depth:         config.max_depth,
    min_samples_split: config.min_samples_split,
    seed:              config.seed,
  });

  let correct = test.iter().filter(|&&i| forest.predict(&x[i]) == y[i]).count();
  let accuracy = correct as f64 / test.len() as f64;

  Some(ModelDriftReport {
    drift_score: accuracy,
    alert: accuracy >= config.alert_threshold,
    alert_threshold: config.alert_threshold,
    baseline_samples: baseline.n_rows(),
    current_samples: current.n_rows(),
    train_samples: train.len(),
    test_samples: test.len(),
    test_accuracy: accuracy,
    n_trees: forest.n_trees(),
    model_type: "random_forest".into(),
    features,
  })
}

/// Current rows laid out in the baseline's column order.
fn current_rows(
  baseline: &NumericFrame,
  current: &NumericFrame,
) -> Vec<Vec<f64>> {
  let columns: Vec<Option<&[Option<f64>]>> = baseline
    .column_names()
    .map(|name| current.column(name).map(|c| c.values.as_slice()))
    .collect();
  (0..current.n_rows())
    .map(|i| {
      columns
        .iter()
        .map(|c| c.and_then(|values| values[i]).unwrap_or(0.0))
        .collect()
    })
    .collect()
}

/// Split indices so both classes keep their share in train and test. Each
/// class contributes at least one row to either side.
fn stratified_split(
  labels: &[bool],
  test_fraction: f64,
  rng: &mut ChaCha8Rng,
) -> (Vec<usize>, Vec<usize>) {
  let mut train = Vec::new();
  let mut test = Vec::new();
  for class in [false, true] {
    let mut idx: Vec<usize> = (0..labels.len())
      .filter(|&i| labels[i] == class)
      .collect();
    idx.shuffle(rng);
    let n_test = ((idx.len() as f64 * test_fraction).round() as usize)
      .clamp(1, idx.len().saturating_sub(1).max(1));
    test.extend_from_slice(&idx[..n_test]);
    train.extend_from_slice(&idx[n_test..]);
  }
  train.sort_unstable();
  test.sort_unstable();
  (train, test)
}

#[cfg(test)]
mod tests {
  use rand::Rng;
  use rand_distr::Normal;

  use super::*;
  use crate::row::FeatureMap;

  fn gaussian_frame(seed: u64, mean: f64, n: usize) -> NumericFrame {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let dist = Normal::new(mean, 1.0).unwrap();
    let rows: Vec<FeatureMap> = (0..n)
      .map(|_| {
        ["a", "b", "c"]
          .into_iter()
          .map(|k| (k.to_owned(), rng.sample(dist).into()))
          .collect()
      })
      .collect();
    NumericFrame::from_baseline(&rows)
  }

  fn quick_config() -> ModelDriftConfig {
    ModelDriftConfig { n_trees: 40, ..ModelDriftConfig::default() }
  }

  #[test]
  fn identical_distributions_score_near_chance() {
    let mut total = 0.0;
    for seed in 0..3 {
      let base = gaussian_frame(seed * 2, 0.0, 300);
      let curr = gaussian_frame(seed * 2 + 1, 0.0, 300);
      let report = run_model_based_drift(&base, &curr, &quick_config()).unwrap();
      total += report.test_accuracy;
    }
    let mean = total / 3.0;
    assert!((0.35..=0.65).contains(&mean), "mean accuracy {mean}");
  }

  #[test]
  fn shifted_distributions_are_separable() {
    let base = gaussian_frame(1, 0.0, 300);
    let curr = gaussian_frame(2, 3.0, 300);
    let report = run_model_based_drift(&base, &curr, &quick_config()).unwrap();
    assert!(report.test_accuracy > 0.9);
    assert!(report.alert);
    assert_eq!(report.test_samples, 120);
    assert_eq!(report.train_samples, 480);
    assert_eq!(report.model_type, "random_forest");
  }

  #[test]
  fn too_few_rows_is_skipped() {
    let base = gaussian_frame(1, 0.0, 1);
    let curr = gaussian_frame(2, 0.0, 50);
    assert!(run_model_based_drift(&base, &curr, &quick_config()).is_none());
  }

  #[test]
  fn runs_are_deterministic() {
    let base = gaussian_frame(5, 0.0, 100);
    let curr = gaussian_frame(6, 0.5, 100);
    let a = run_model_based_drift(&base, &curr, &quick_config()).unwrap();
    let b = run_model_based_drift(&base, &curr, &quick_config()).unwrap();
    assert_eq!(a, b);
  }
}
