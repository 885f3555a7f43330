//! Descriptive statistics over `f64` samples.
//!
//! Quantiles use linear interpolation between closest ranks, the default of
//! most dataframe libraries, so results line up with what analysts compute by
//! hand.

use serde::{Deserialize, Serialize};

pub fn mean(xs: &[f64]) -> Option<f64> {
  if xs.is_empty() {
    return None;
  }
  Some(xs.iter().sum::<f64>() / xs.len() as f64)
}

/// Variance with `ddof` delta degrees of freedom. `None` when there are not
/// more than `ddof` samples.
pub fn variance(xs: &[f64], ddof: usize) -> Option<f64> {
  if xs.len() <= ddof {
    return None;
  }
  let m = mean(xs)?;
  let ss: f64 = xs.iter().map(|x| (x - m) * (x - m)).sum();
  Some(ss / (xs.len() - ddof) as f64)
}

pub fn median(xs: &[f64]) -> Option<f64> { quantile(xs, 0.5) }

pub fn quantile(xs: &[f64], q: f64) -> Option<f64> {
  let mut sorted = xs.to_vec();
  sorted.sort_by(f64::total_cmp);
  quantile_sorted(&sorted, q)
}

/// Linear-interpolated quantile of an ascending slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
  if sorted.is_empty() {
    return None;
  }
  let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
  let lo = pos.floor() as usize;
  let hi = pos.ceil() as usize;
  let frac = pos - lo as f64;
  Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// `|current - base| / |base|`, or `None` when the base is zero.
pub fn relative_change(base: f64, current: f64) -> Option<f64> {
  if base == 0.0 {
    return None;
  }
  Some((current - base).abs() / base.abs())
}

// ─── Column summaries ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quartiles {
  pub q25: f64,
  pub q50: f64,
  pub q75: f64,
}

/// Summary of one side of one column, as shown in a drift report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
  pub mean:          f64,
  pub median:        f64,
  /// Sample standard deviation; `0.0` for a single value.
  pub std:           f64,
  pub quantiles:     Quartiles,
  pub missing_count: usize,
  pub total_count:   usize,
}

impl ColumnStats {
  /// Summarise a column with missing values. `None` when every value is
  /// missing.
  pub fn describe(values: &[Option<f64>]) -> Option<Self> {
    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
      return None;
    }
    present.sort_by(f64::total_cmp);

    let q = |p| quantile_sorted(&present, p);
    Some(Self {
      mean:          mean(&present)?,
      median:        q(0.5)?,
      std:           variance(&present, 1).map_or(0.0, f64::sqrt),
      quantiles:     Quartiles {
        q25: q(0.25)?,
        q50: q(0.5)?,
        q75: q(0.75)?,
      },
      missing_count: values.len() - present.len(),
      total_count:   values.len(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quantile_interpolates_linearly() {
    let xs = [1.0, 2.0, 3.0, 4.0];
    assert_eq!(quantile(&xs, 0.5), Some(2.5));
    assert_eq!(quantile(&xs, 0.25), Some(1.75));
    assert_eq!(quantile(&xs, 1.0), Some(4.0));
    assert_eq!(quantile(&[], 0.5), None);
  }

  #[test]
  fn variance_respects_ddof() {
    let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
    assert_eq!(variance(&xs, 0), Some(4.0));
    assert!((variance(&xs, 1).unwrap() - 32.0 / 7.0).abs() < 1e-12);
    assert_eq!(variance(&[1.0], 1), None);
  }

  #[test]
  fn relative_change_is_none_for_zero_base() {
    assert_eq!(relative_change(0.0, 5.0), None);
    assert!((relative_change(100.0, 111.0).unwrap() - 0.11).abs() < 1e-12);
    assert!((relative_change(-10.0, -12.0).unwrap() - 0.2).abs() < 1e-12);
  }

  #[test]
  fn describe_counts_missing_values() {
    let stats =
      ColumnStats::describe(&[Some(1.0), None, Some(3.0), None]).unwrap();
    assert_eq!(stats.mean, 2.0);
    assert_eq!(stats.missing_count, 2);
    assert_eq!(stats.total_count, 4);

    let single = ColumnStats::describe(&[Some(7.0)]).unwrap();
    assert_eq!(single.std, 0.0);
    assert!(ColumnStats::describe(&[None, None]).is_none());
  }
}
