//! The `MonitorStore` trait.
//!
//! Backends (e.g. `watchtower-store-sqlite`) persist the row ledger, window
//! records, drift tags and report history. The engine depends only on this
//! abstraction.
//!
//! Rows and reports are append-only. Window records are single rows per
//! project whose creation is an atomic insert-if-absent; later updates are
//! serialised by the engine's per-project lock.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  config::ProjectConfig,
  llm::{LlmBaseline, LlmMonitor},
  report::DriftRecord,
  row::{Payload, ProjectId, RecordKind, Row},
  window::{Baseline, KindRanges, LedgerTip, MonitorWindows, WindowRange},
};

/// Outcome of an insert-if-absent write.
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion<T> {
  /// This call created the record.
  Inserted(T),
  /// Another writer got there first; this is their record.
  Existing(T),
}

impl<T> Insertion<T> {
  pub fn into_inner(self) -> T {
    match self {
      Self::Inserted(t) | Self::Existing(t) => t,
    }
  }

  pub fn was_inserted(&self) -> bool { matches!(self, Self::Inserted(_)) }
}

/// The side effects of one LLM monitor check, applied atomically.
#[derive(Debug, Clone)]
pub struct LlmCheckOutcome {
  /// Report to append; absent when the check was skipped.
  pub record:       Option<DriftRecord>,
  /// Rows to tag as drift-affected under the record's id.
  pub tag_range:    Option<WindowRange>,
  pub next_monitor: WindowRange,
  pub at:           DateTime<Utc>,
}

/// Abstraction over a drift-monitoring store backend.
///
/// All methods return `Send` futures so the engine can run on a
/// multi-threaded tokio runtime.
pub trait MonitorStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Project configuration ─────────────────────────────────────────────

  fn get_project_config(
    &self,
    project_id: ProjectId,
  ) -> impl Future<Output = Result<Option<ProjectConfig>, Self::Error>> + Send + '_;

  /// Create or replace a project's configuration.
  fn put_project_config(
    &self,
    project_id: ProjectId,
    config: ProjectConfig,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Store `config` only if the project has none yet.
  fn insert_project_config_if_absent(
    &self,
    project_id: ProjectId,
    config: ProjectConfig,
  ) -> impl Future<Output = Result<Insertion<ProjectConfig>, Self::Error>>
  + Send
  + '_;

  // ── Row ledger ────────────────────────────────────────────────────────

  /// Append payloads in one transaction and return the assigned id range,
  /// or `None` for an empty batch. Every payload must be of `kind`.
  fn append_rows(
    &self,
    project_id: ProjectId,
    kind: RecordKind,
    payloads: Vec<Payload>,
    batch_timestamp: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<WindowRange>, Self::Error>> + Send + '_;

  /// Highest row id per kind.
  fn ledger_tip(
    &self,
    project_id: ProjectId,
  ) -> impl Future<Output = Result<LedgerTip, Self::Error>> + Send + '_;

  /// Rows of `kind` whose ids fall in `range`, ascending. Ids that have not
  /// been ingested yet are simply absent.
  fn rows_in_range(
    &self,
    project_id: ProjectId,
    kind: RecordKind,
    range: WindowRange,
  ) -> impl Future<Output = Result<Vec<Row>, Self::Error>> + Send + '_;

  // ── Feature / prediction windows ──────────────────────────────────────

  fn get_baseline(
    &self,
    project_id: ProjectId,
  ) -> impl Future<Output = Result<Option<Baseline>, Self::Error>> + Send + '_;

  /// Create the project's baseline unless one exists; a lost race returns
  /// the winner's record.
  fn insert_baseline_if_absent(
    &self,
    project_id: ProjectId,
    ranges: KindRanges,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Insertion<Baseline>, Self::Error>> + Send + '_;

  fn update_baseline(
    &self,
    project_id: ProjectId,
    ranges: KindRanges,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_monitor(
    &self,
    project_id: ProjectId,
  ) -> impl Future<Output = Result<Option<MonitorWindows>, Self::Error>> + Send + '_;

  fn put_monitor(
    &self,
    project_id: ProjectId,
    ranges: KindRanges,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── LLM windows ───────────────────────────────────────────────────────

  fn get_llm_baseline(
    &self,
    project_id: ProjectId,
  ) -> impl Future<Output = Result<Option<LlmBaseline>, Self::Error>> + Send + '_;

  fn insert_llm_baseline_if_absent(
    &self,
    project_id: ProjectId,
    range: WindowRange,
    avg_response_tokens: f64,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Insertion<LlmBaseline>, Self::Error>> + Send + '_;

  fn update_llm_baseline(
    &self,
    project_id: ProjectId,
    range: WindowRange,
    avg_response_tokens: f64,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_llm_monitor(
    &self,
    project_id: ProjectId,
  ) -> impl Future<Output = Result<Option<LlmMonitor>, Self::Error>> + Send + '_;

  fn put_llm_monitor(
    &self,
    project_id: ProjectId,
    range: WindowRange,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Append the check's report, tag rows and advance the monitor in one
  /// transaction. Returns the number of rows tagged.
  fn record_llm_check(
    &self,
    project_id: ProjectId,
    outcome: LlmCheckOutcome,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Number of LLM rows tagged as drift-affected.
  fn count_drift_tagged(
    &self,
    project_id: ProjectId,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Reports ───────────────────────────────────────────────────────────

  /// Append all records of one detection trigger in one transaction.
  fn insert_records(
    &self,
    records: Vec<DriftRecord>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Report history, newest first.
  fn list_records(
    &self,
    project_id: ProjectId,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<DriftRecord>, Self::Error>> + Send + '_;
}
