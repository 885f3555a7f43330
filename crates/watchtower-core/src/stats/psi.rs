//! Population stability index.

use serde::{Deserialize, Serialize};

use super::describe::quantile_sorted;

/// Proportions are floored here before taking logarithms.
const PROPORTION_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsiSeverity {
  Low,
  Medium,
  High,
}

impl PsiSeverity {
  pub fn classify(value: f64, low: f64, high: f64) -> Self {
    if value < low {
      Self::Low
    } else if value < high {
      Self::Medium
    } else {
      Self::High
    }
  }
}

/// PSI of `current` against `baseline` over `bins` baseline-quantile bins.
///
/// Breakpoints are the baseline quantiles at `0, 1/bins, .., 1` with the outer
/// edges opened to infinity. Each bin is `[e_i, e_{i+1})`. `None` when either
/// sample is empty.
pub fn psi(baseline: &[f64], current: &[f64], bins: usize) -> Option<f64> {
  if baseline.is_empty() || current.is_empty() || bins == 0 {
    return None;
  }
  let mut sorted = baseline.to_vec();
  sorted.sort_by(f64::total_cmp);

  let mut edges = (0..=bins)
    .map(|i| quantile_sorted(&sorted, i as f64 / bins as f64))
    .collect::<Option<Vec<f64>>>()?;
  edges[0] = f64::NEG_INFINITY;
  edges[bins] = f64::INFINITY;

  let base = proportions(baseline, &edges);
  let curr = proportions(current, &edges);
  Some(
    base
      .iter()
      .zip(&curr)
      .map(|(b, c)| (b - c) * (b / c).ln())
      .sum(),
  )
}

fn proportions(xs: &[f64], edges: &[f64]) -> Vec<f64> {
  let bins = edges.len() - 1;
  let mut counts = vec![0usize; bins];
  for &x in xs {
    // Last bin whose left edge is <= x; edges[0] is -inf so this is >= 1.
    let idx = edges[..bins].partition_point(|e| *e <= x);
    counts[idx.saturating_sub(1)] += 1;
  }
  let n = xs.len() as f64;
  counts
    .into_iter()
    .map(|c| (c as f64 / n).max(PROPORTION_FLOOR))
    .collect()
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  #[test]
  fn identical_samples_have_zero_psi() {
    let xs: Vec<f64> = (0..500).map(|i| (i % 37) as f64).collect();
    assert!(psi(&xs, &xs, 10).unwrap().abs() < 1e-12);
  }

  #[test]
  fn shifted_sample_is_high() {
    let base: Vec<f64> = (0..1000).map(|i| i as f64 / 10.0).collect();
    let curr: Vec<f64> = base.iter().map(|x| x + 50.0).collect();
    let value = psi(&base, &curr, 10).unwrap();
    assert_eq!(PsiSeverity::classify(value, 0.1, 0.25), PsiSeverity::High);
  }

  #[test]
  fn psi_is_not_symmetric() {
    let a: Vec<f64> = (0..200).map(f64::from).collect();
    let b: Vec<f64> = (0..200).map(|i| f64::from(i).powi(2) / 200.0).collect();
    let ab = psi(&a, &b, 10).unwrap();
    let ba = psi(&b, &a, 10).unwrap();
    assert!((ab - ba).abs() > 1e-9);
  }

  #[test]
  fn severity_boundaries() {
    assert_eq!(PsiSeverity::classify(0.0999, 0.1, 0.25), PsiSeverity::Low);
    assert_eq!(PsiSeverity::classify(0.1, 0.1, 0.25), PsiSeverity::Medium);
    assert_eq!(PsiSeverity::classify(0.25, 0.1, 0.25), PsiSeverity::High);
  }

  proptest! {
    #[test]
    fn psi_is_non_negative(
      a in prop::collection::vec(-1e6f64..1e6, 1..200),
      b in prop::collection::vec(-1e6f64..1e6, 1..200),
      bins in 1usize..20,
    ) {
      let value = psi(&a, &b, bins).unwrap();
      prop_assert!(value >= 0.0);
    }
  }
}
