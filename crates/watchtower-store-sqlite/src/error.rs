//! Error type for `watchtower-store-sqlite`.

use thiserror::Error;
use watchtower_core::row::ProjectId;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] watchtower_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown record kind in ledger: {0:?}")]
  UnknownKind(String),

  /// A window column pair was half-populated or inverted.
  #[error("corrupt window range {start:?}..{end:?}")]
  CorruptRange { start: Option<i64>, end: Option<i64> },

  /// Insert-if-absent neither inserted nor found a record, twice.
  #[error("could not create or read the {table} record for project {project_id}")]
  Conflict { table: &'static str, project_id: ProjectId },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
