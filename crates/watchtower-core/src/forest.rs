//! A small binary random-forest classifier.
//!
//! CART trees with Gini impurity, grown on bootstrap samples with a random
//! subset of `ceil(sqrt(features))` candidate features per split. Each tree
//! draws from its own ChaCha stream of the base seed, so a forest is fully
//! determined by its parameters and training data regardless of how rayon
//! schedules the trees.

use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
  pub n_trees:           usize,
  pub max_depth:         Option<usize>,
  pub min_samples_split: usize,
  pub seed:              u64,
}

#[derive(Debug)]
enum Node {
  Leaf {
    /// Fraction of class-1 samples that reached the leaf.
    positive: f64,
  },
  Split {
    feature:   usize,
    threshold: f64,
    left:      Box<Node>,
    right:     Box<Node>,
  },
}

impl Node {
  fn predict(&self, x: &[f64]) -> f64 {
    let mut node = self;
    loop {
      match node {
        Node::Leaf { positive } => return *positive,
        Node::Split { feature, threshold, left, right } => {
          node = if x[*feature] <= *threshold { &**left } else { &**right };
        }
      }
    }
  }
}

#[derive(Debug)]
pub struct RandomForest {
  trees: Vec<Node>,
}

impl RandomForest {
  /// Fit on row-major `x` with boolean labels. `x` must be non-empty and
  /// rectangular.
  pub fn fit(x: &[Vec<f64>], y: &[bool], params: &ForestParams) -> Self {
    debug_assert_eq!(x.len(), y.len());
    let n_features = x.first().map_or(0, Vec::len);
    let max_features = ((n_features as f64).sqrt().ceil() as usize).max(1);

    let trees = (0..params.n_trees)
      .into_par_iter()
      .map(|t| {
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        rng.set_stream(t as u64);
        let sample: Vec<usize> =
          (0..x.len()).map(|_| rng.gen_range(0..x.len())).collect();
        let mut builder = TreeBuilder {
          x,
          y,
          params,
          n_features,
          max_features,
          rng,
        };
        builder.grow(sample, 0)
      })
      .collect();
    Self { trees }
  }

  /// Averaged class-1 probability over all trees.
  pub fn predict_proba(&self, x: &[f64]) -> f64 {
    if self.trees.is_empty() {
      return 0.0;
    }
    self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
      / self.trees.len() as f64
  }

  /// Class-1 when the averaged probability is strictly above one half.
  pub fn predict(&self, x: &[f64]) -> bool { self.predict_proba(x) > 0.5 }

  pub fn n_trees(&self) -> usize { self.trees.len() }
}

struct TreeBuilder<'a> {
  x:            &'a [Vec<f64>],
  y:            &'a [bool],
  params:       &'a ForestParams,
  n_features:   usize,
  max_features: usize,
  rng:          ChaCha8Rng,
}

struct Candidate {
  feature:   usize,
  threshold: f64,
  impurity:  f64,
}

impl TreeBuilder<'_> {
  fn grow(&mut self, samples: Vec<usize>, depth: usize) -> Node {
    let positives = samples.iter().filter(|&&i| self.y[i]).count();
    let positive = positives as f64 / samples.len() as f64;

    let pure = positives == 0 || positives == samples.len();
    let too_small = samples.len() < self.params.min_samples_split;
    let too_deep = self.params.max_depth.is_some_and(|d| depth >= d);
    if pure || too_small || too_deep {
      return Node::Leaf { positive };
    }

    let Some(best) = self.best_split(&samples) else {
      return Node::Leaf { positive };
    };
    let (left, right): (Vec<usize>, Vec<usize>) = samples
      .into_iter()
      .partition(|&i| self.x[i][best.feature] <= best.threshold);

    Node::Split {
      feature:   best.feature,
      threshold: best.threshold,
      left:      Box::new(self.grow(left, depth + 1)),
      right:     Box::new(self.grow(right, depth + 1)),
    }
  }

  /// Search shuffled features until `max_features` non-constant ones have
  /// been examined. Constant features do not count towards the budget.
  fn best_split(&mut self, samples: &[usize]) -> Option<Candidate> {
    let mut features: Vec<usize> = (0..self.n_features).collect();
    features.shuffle(&mut self.rng);

    let mut best: Option<Candidate> = None;
    let mut examined = 0;
    for feature in features {
      if examined >= self.max_features {
        break;
      }
      let mut column: Vec<(f64, bool)> = samples
        .iter()
        .map(|&i| (self.x[i][feature], self.y[i]))
        .collect();
      column.sort_by(|a, b| a.0.total_cmp(&b.0));
      if column[0].0 == column[column.len() - 1].0 {
        continue;
      }
      examined += 1;

      if let Some(found) = sweep(feature, &column) {
        if best.as_ref().is_none_or(|b| found.impurity < b.impurity) {
          best = Some(found);
        }
      }
    }
    best
  }
}

/// Best threshold on one sorted feature by weighted Gini impurity.
fn sweep(feature: usize, column: &[(f64, bool)]) -> Option<Candidate> {
  let n = column.len() as f64;
  let total_pos = column.iter().filter(|c| c.1).count() as f64;

  let mut best: Option<Candidate> = None;
  let mut left_pos = 0.0;
  for i in 1..column.len() {
    if column[i - 1].1 {
      left_pos += 1.0;
    }
    if column[i - 1].0 == column[i].0 {
      continue;
    }
    let nl = i as f64;
    let nr = n - nl;
    let impurity =
      (nl * gini(left_pos, nl) + nr * gini(total_pos - left_pos, nr)) / n;
    if best.as_ref().is_none_or(|b| impurity < b.impurity) {
      best = Some(Candidate {
        feature,
        threshold: column[i - 1].0 + (column[i].0 - column[i - 1].0) / 2.0,
        impurity,
      });
    }
  }
  best
}

fn gini(positives: f64, n: f64) -> f64 {
  let p = positives / n;
  1.0 - p * p - (1.0 - p) * (1.0 - p)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params(n_trees: usize) -> ForestParams {
    ForestParams {
      n_trees,
      max_depth: None,
      min_samples_split: 2,
      seed: 7,
    }
  }

  #[test]
  fn separable_data_is_learned() {
    let x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64, 1.0]).collect();
    let y: Vec<bool> = (0..100).map(|i| i >= 50).collect();
    let forest = RandomForest::fit(&x, &y, &params(25));
    assert!(!forest.predict(&[3.0, 1.0]));
    assert!(forest.predict(&[97.0, 1.0]));
  }

  #[test]
  fn same_seed_same_forest() {
    let x: Vec<Vec<f64>> =
      (0..60).map(|i| vec![(i * 7 % 13) as f64, (i % 5) as f64]).collect();
    let y: Vec<bool> = (0..60).map(|i| i % 3 == 0).collect();
    let a = RandomForest::fit(&x, &y, &params(10));
    let b = RandomForest::fit(&x, &y, &params(10));
    for row in &x {
      assert_eq!(a.predict_proba(row), b.predict_proba(row));
    }
  }

  #[test]
  fn constant_features_make_a_single_leaf() {
    let x = vec![vec![1.0]; 10];
    let y: Vec<bool> = (0..10).map(|i| i < 1).collect();
    let forest = RandomForest::fit(&x, &y, &params(3));
    assert!(!forest.predict(&[1.0]));
  }
}
