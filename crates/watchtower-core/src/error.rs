//! Error types for `watchtower-core`.
//!
//! Only fatal conditions live here. "Not ready" states (missing config, too
//! few rows, no window yet) are expressed as `Option`/`bool` returns, and
//! skipped computations as absent results.

use thiserror::Error;

use crate::row::RecordKind;

#[derive(Debug, Error)]
pub enum Error {
  /// Baseline and current batches disagree on the shape of a column.
  #[error("column {column:?} cannot be compared: {reason}")]
  SchemaMismatch { column: String, reason: String },

  #[error("regression prediction at position {index} is not numeric")]
  NonNumericPrediction { index: usize },

  #[error("payload of kind {found} cannot be stored in the {expected} ledger")]
  PayloadKind { expected: RecordKind, found: RecordKind },

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("concurrent write conflict for project {0} could not be resolved")]
  Conflict(i64),

  #[error("unknown report type discriminant: {0:?}")]
  UnknownReportType(String),

  #[error("detector worker failed: {0}")]
  Worker(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap a backend error from a [`crate::store::MonitorStore`].
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
