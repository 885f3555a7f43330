//! Two-sample Kolmogorov–Smirnov test.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KsOutcome {
  /// Largest absolute gap between the two empirical CDFs.
  pub statistic: f64,
  /// Asymptotic two-sided p-value.
  pub p_value:   f64,
}

/// Run the test on two unsorted samples. `None` if either is empty.
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> Option<KsOutcome> {
  if a.is_empty() || b.is_empty() {
    return None;
  }
  let mut a = a.to_vec();
  let mut b = b.to_vec();
  a.sort_by(f64::total_cmp);
  b.sort_by(f64::total_cmp);

  let (n, m) = (a.len() as f64, b.len() as f64);
  let (mut i, mut j) = (0, 0);
  let mut statistic: f64 = 0.0;
  while i < a.len() && j < b.len() {
    let x = a[i].min(b[j]);
    while i < a.len() && a[i] <= x {
      i += 1;
    }
    while j < b.len() && b[j] <= x {
      j += 1;
    }
    statistic = statistic.max((i as f64 / n - j as f64 / m).abs());
  }

  let en = (n * m / (n + m)).sqrt();
  let p_value = kolmogorov_q((en + 0.12 + 0.11 / en) * statistic);
  Some(KsOutcome { statistic, p_value })
}

/// Complementary Kolmogorov distribution, `Q_KS(lambda)`.
fn kolmogorov_q(lambda: f64) -> f64 {
  let a2 = -2.0 * lambda * lambda;
  let mut fac = 2.0;
  let mut sum = 0.0;
  let mut previous: f64 = 0.0;
  for j in 1..=100 {
    let jf = j as f64;
    let term = fac * (a2 * jf * jf).exp();
    sum += term;
    if term.abs() <= 0.001 * previous || term.abs() <= 1e-8 * sum {
      return sum.clamp(0.0, 1.0);
    }
    fac = -fac;
    previous = term.abs();
  }
  // The series only fails to converge for tiny lambda, where Q -> 1.
  1.0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identical_samples_have_zero_statistic() {
    let xs: Vec<f64> = (0..100).map(f64::from).collect();
    let out = ks_two_sample(&xs, &xs).unwrap();
    assert_eq!(out.statistic, 0.0);
    assert_eq!(out.p_value, 1.0);
  }

  #[test]
  fn disjoint_samples_have_unit_statistic() {
    let a: Vec<f64> = (0..100).map(f64::from).collect();
    let b: Vec<f64> = (1000..1100).map(f64::from).collect();
    let out = ks_two_sample(&a, &b).unwrap();
    assert_eq!(out.statistic, 1.0);
    assert!(out.p_value < 1e-10);
  }

  #[test]
  fn ties_are_stepped_together() {
    let out = ks_two_sample(&[1.0, 1.0, 2.0], &[1.0, 2.0, 2.0]).unwrap();
    assert!((out.statistic - 1.0 / 3.0).abs() < 1e-12);
  }

  #[test]
  fn empty_sample_is_skipped() {
    assert!(ks_two_sample(&[], &[1.0]).is_none());
  }
}
