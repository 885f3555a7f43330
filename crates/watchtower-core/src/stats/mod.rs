//! Numeric primitives shared by every detector.

pub mod describe;
pub mod ks;
pub mod psi;

pub use self::{
  describe::{
    ColumnStats, Quartiles, mean, median, quantile, relative_change, variance,
  },
  ks::{KsOutcome, ks_two_sample},
  psi::{PsiSeverity, psi},
};
