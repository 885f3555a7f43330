//! The drift engine: append → recompute windows → detect → persist.
//!
//! Window read-modify-write cycles run under a per-project async lock.
//! Detection itself is pure over in-memory batches and runs outside the lock;
//! random-forest training goes to the blocking pool.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  battery::run_statistical_drift,
  config::ProjectConfig,
  frame::NumericFrame,
  llm::{
    LlmDriftReport, advance_monitor, evaluate_token_drift, plan_llm_windows,
  },
  model_drift::run_model_based_drift,
  narrative::{NarrativeRequest, Narrator, TemplateNarrator, narrate_or_fallback},
  prediction::run_prediction_drift,
  report::{DriftRecord, ReportBody, WindowDescriptor},
  row::{
    FeatureMap, FieldValue, LlmInteraction, NewInteraction, Payload, ProjectId,
    RecordKind, Row,
  },
  store::{Insertion, LlmCheckOutcome, MonitorStore},
  tokenizer::TokenizerService,
  window::{KindRanges, LedgerTip, WindowRange, WindowStatus, plan_windows},
};

// ─── Window data ─────────────────────────────────────────────────────────────

/// Rows of one window for one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowData {
  /// The stored range. For a monitor this may extend past the ledger tip.
  pub target:      WindowRange,
  /// First and last row ids actually present.
  pub retrieved:   Option<WindowRange>,
  pub rows:        Vec<Row>,
  pub last_row_at: Option<DateTime<Utc>>,
}

impl WindowData {
  fn new(target: WindowRange, rows: Vec<Row>) -> Self {
    let retrieved = rows
      .first()
      .zip(rows.last())
      .map(|(first, last)| WindowRange::new(first.row_id, last.row_id));
    let last_row_at = rows.last().map(|r| r.created_at);
    Self { target, retrieved, rows, last_row_at }
  }

  pub fn descriptor(&self) -> WindowDescriptor {
    WindowDescriptor {
      range:       self.retrieved.unwrap_or(self.target),
      row_count:   self.rows.len(),
      last_row_at: self.last_row_at,
    }
  }

  fn features(&self) -> impl Iterator<Item = &FeatureMap> {
    self.rows.iter().filter_map(|r| r.payload.as_features())
  }

  fn predictions(&self) -> Vec<FieldValue> {
    self
      .rows
      .iter()
      .filter_map(|r| r.payload.as_prediction().cloned())
      .collect()
  }
}

/// Window rows per kind. Kinds without a window (or, for monitors, without
/// any ingested rows) are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSnapshot {
  pub feature:    Option<WindowData>,
  pub prediction: Option<WindowData>,
}

impl WindowSnapshot {
  fn get(&self, kind: RecordKind) -> Option<&WindowData> {
    match kind {
      RecordKind::Feature => self.feature.as_ref(),
      RecordKind::Prediction => self.prediction.as_ref(),
      RecordKind::LlmInteraction => None,
    }
  }
}

pub type BaselineData = WindowSnapshot;
pub type MonitorData = WindowSnapshot;

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Records produced by one feature detection run.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDetection {
  pub statistical: DriftRecord,
  pub model:       Option<DriftRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOutcome {
  /// Row ids assigned to the batch.
  pub appended:        Option<WindowRange>,
  pub status:          WindowStatus,
  /// Records persisted by detection triggered from this ingestion.
  pub reports:         Vec<DriftRecord>,
  /// Detection failure, logged and not retried. The rows stay ingested.
  pub detection_error: Option<String>,
}

impl IngestOutcome {
  pub fn rows_appended(&self) -> usize {
    self.appended.map_or(0, |r| r.len() as usize)
  }
}

enum LlmCheck {
  NotDue,
  Skipped,
  Checked(LlmDriftReport, DriftRecord),
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct DriftEngine<S> {
  store:     Arc<S>,
  narrator:  Arc<dyn Narrator>,
  tokenizer: Arc<TokenizerService>,
  locks:     parking_lot::Mutex<HashMap<ProjectId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: MonitorStore> DriftEngine<S> {
  /// An engine with the template narrator and a lazily loaded BPE tokenizer.
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      narrator: Arc::new(TemplateNarrator),
      tokenizer: Arc::new(TokenizerService::new()),
      locks: parking_lot::Mutex::new(HashMap::new()),
    }
  }

  pub fn with_narrator(mut self, narrator: Arc<dyn Narrator>) -> Self {
    self.narrator = narrator;
    self
  }

  pub fn with_tokenizer(mut self, tokenizer: Arc<TokenizerService>) -> Self {
    self.tokenizer = tokenizer;
    self
  }

  pub fn store(&self) -> &S { &self.store }

  fn project_lock(&self, project_id: ProjectId) -> Arc<tokio::sync::Mutex<()>> {
    self.locks.lock().entry(project_id).or_default().clone()
  }

  async fn config(&self, project_id: ProjectId) -> Result<Option<ProjectConfig>> {
    self.store.get_project_config(project_id).await.map_err(Error::store)
  }

  // ── Configuration ─────────────────────────────────────────────────────

  /// Seed a project's configuration unless it already has one, returning
  /// whichever configuration is in effect.
  pub async fn ensure_project(
    &self,
    project_id: ProjectId,
    config: ProjectConfig,
  ) -> Result<ProjectConfig> {
    config.validate()?;
    let insertion = self
      .store
      .insert_project_config_if_absent(project_id, config)
      .await
      .map_err(Error::store)?;
    if insertion.was_inserted() {
      info!(project_id, "seeded default project configuration");
    }
    Ok(insertion.into_inner())
  }

  /// Replace a project's configuration.
  pub async fn configure_project(
    &self,
    project_id: ProjectId,
    config: ProjectConfig,
  ) -> Result<()> {
    config.validate()?;
    self
      .store
      .put_project_config(project_id, config)
      .await
      .map_err(Error::store)
  }

  // ── Ledger ────────────────────────────────────────────────────────────

  /// Append a batch to a ledger. Returns the number of rows written.
  pub async fn append_rows(
    &self,
    project_id: ProjectId,
    kind: RecordKind,
    payloads: Vec<Payload>,
    batch_timestamp: DateTime<Utc>,
  ) -> Result<usize> {
    Ok(
      self
        .append(project_id, kind, payloads, batch_timestamp)
        .await?
        .map_or(0, |r| r.len() as usize),
    )
  }

  async fn append(
    &self,
    project_id: ProjectId,
    kind: RecordKind,
    payloads: Vec<Payload>,
    batch_timestamp: DateTime<Utc>,
  ) -> Result<Option<WindowRange>> {
    if let Some(bad) = payloads.iter().find(|p| p.kind() != kind) {
      return Err(Error::PayloadKind { expected: kind, found: bad.kind() });
    }
    let range = self
      .store
      .append_rows(project_id, kind, payloads, batch_timestamp)
      .await
      .map_err(Error::store)?;
    if let Some(range) = range {
      debug!(project_id, %kind, %range, "appended rows");
    }
    Ok(range)
  }

  // ── Windows ───────────────────────────────────────────────────────────

  /// Bring the feature and prediction windows up to date with the ledger.
  pub async fn recompute_windows(
    &self,
    project_id: ProjectId,
  ) -> Result<WindowStatus> {
    let Some(config) = self.config(project_id).await? else {
      debug!(project_id, "no configuration, windows not ready");
      return Ok(WindowStatus::default());
    };
    let lock = self.project_lock(project_id);
    let _guard = lock.lock().await;
    self.recompute_locked(project_id, &config).await
  }

  async fn recompute_locked(
    &self,
    project_id: ProjectId,
    config: &ProjectConfig,
  ) -> Result<WindowStatus> {
    let tip = self.store.ledger_tip(project_id).await.map_err(Error::store)?;
    let baseline =
      self.store.get_baseline(project_id).await.map_err(Error::store)?;
    let monitor = self.store.get_monitor(project_id).await.map_err(Error::store)?;

    let current_baseline = baseline.as_ref().map(|b| b.ranges).unwrap_or_default();
    let current_monitor = monitor.as_ref().map(|m| m.ranges).unwrap_or_default();
    let mut plan =
      plan_windows(&config.window, &tip, &current_baseline, &current_monitor);
    let now = Utc::now();

    if plan.baseline != current_baseline {
      if baseline.is_some() {
        self.write_baseline(project_id, plan.baseline, now).await?;
      } else {
        let insertion = self
          .store
          .insert_baseline_if_absent(project_id, plan.baseline, now)
          .await
          .map_err(Error::store)?;
        match insertion {
          Insertion::Inserted(b) => {
            info!(project_id, ranges = ?b.ranges, "baseline created");
          }
          Insertion::Existing(winner) => {
            debug!(project_id, "baseline created concurrently, replanning");
            plan = plan_windows(&config.window, &tip, &winner.ranges, &current_monitor);
            if plan.baseline != winner.ranges {
              self.write_baseline(project_id, plan.baseline, now).await?;
            }
          }
        }
      }
    }

    if plan.monitor != current_monitor {
      self
        .store
        .put_monitor(project_id, plan.monitor, now)
        .await
        .map_err(Error::store)?;
      debug!(project_id, ranges = ?plan.monitor, "monitor windows moved");
    }

    Ok(WindowStatus {
      baseline_ready: !plan.baseline.is_empty(),
      monitor_ready:  monitor_has_rows(&plan.monitor, &tip),
    })
  }

  async fn write_baseline(
    &self,
    project_id: ProjectId,
    ranges: KindRanges,
    at: DateTime<Utc>,
  ) -> Result<()> {
    self
      .store
      .update_baseline(project_id, ranges, at)
      .await
      .map_err(Error::store)?;
    info!(project_id, ranges = ?ranges, "baseline moved");
    Ok(())
  }

  pub async fn get_baseline_window(
    &self,
    project_id: ProjectId,
    kind: RecordKind,
  ) -> Result<Option<WindowRange>> {
    if kind == RecordKind::LlmInteraction {
      let baseline =
        self.store.get_llm_baseline(project_id).await.map_err(Error::store)?;
      return Ok(baseline.map(|b| b.range));
    }
    let baseline =
      self.store.get_baseline(project_id).await.map_err(Error::store)?;
    Ok(baseline.and_then(|b| b.ranges.get(kind)))
  }

  pub async fn get_monitor_window(
    &self,
    project_id: ProjectId,
    kind: RecordKind,
  ) -> Result<Option<WindowRange>> {
    if kind == RecordKind::LlmInteraction {
      let monitor =
        self.store.get_llm_monitor(project_id).await.map_err(Error::store)?;
      return Ok(monitor.map(|m| m.range));
    }
    let monitor = self.store.get_monitor(project_id).await.map_err(Error::store)?;
    Ok(monitor.and_then(|m| m.ranges.get(kind)))
  }

  /// Baseline rows per kind. `None` until a baseline exists.
  pub async fn get_baseline_data(
    &self,
    project_id: ProjectId,
  ) -> Result<Option<BaselineData>> {
    let Some(baseline) =
      self.store.get_baseline(project_id).await.map_err(Error::store)?
    else {
      return Ok(None);
    };
    Ok(Some(self.snapshot(project_id, &baseline.ranges, false).await?))
  }

  /// Monitor rows per kind. Kinds whose monitor holds no rows yet are
  /// `None`; `None` overall when no kind has any.
  pub async fn get_monitor_data(
    &self,
    project_id: ProjectId,
  ) -> Result<Option<MonitorData>> {
    let Some(monitor) =
      self.store.get_monitor(project_id).await.map_err(Error::store)?
    else {
      return Ok(None);
    };
    let snapshot = self.snapshot(project_id, &monitor.ranges, true).await?;
    if snapshot.feature.is_none() && snapshot.prediction.is_none() {
      return Ok(None);
    }
    Ok(Some(snapshot))
  }

  async fn snapshot(
    &self,
    project_id: ProjectId,
    ranges: &KindRanges,
    skip_empty: bool,
  ) -> Result<WindowSnapshot> {
    let mut snapshot = WindowSnapshot::default();
    for kind in KindRanges::KINDS {
      let Some(range) = ranges.get(kind) else { continue };
      let rows = self
        .store
        .rows_in_range(project_id, kind, range)
        .await
        .map_err(Error::store)?;
      if skip_empty && rows.is_empty() {
        continue;
      }
      let data = Some(WindowData::new(range, rows));
      match kind {
        RecordKind::Feature => snapshot.feature = data,
        RecordKind::Prediction => snapshot.prediction = data,
        RecordKind::LlmInteraction => {}
      }
    }
    Ok(snapshot)
  }

  // ── Ingestion ─────────────────────────────────────────────────────────

  /// Append a batch, recompute windows and run whatever detection the new
  /// window state allows.
  ///
  /// Detection failures are logged and reported in the outcome; they never
  /// undo the append.
  pub async fn ingest(
    &self,
    project_id: ProjectId,
    kind: RecordKind,
    payloads: Vec<Payload>,
    batch_timestamp: DateTime<Utc>,
  ) -> Result<IngestOutcome> {
    let appended = self.append(project_id, kind, payloads, batch_timestamp).await?;
    let mut outcome = IngestOutcome { appended, ..IngestOutcome::default() };

    let Some(config) = self.config(project_id).await? else {
      debug!(project_id, "no configuration, skipping window recompute");
      return Ok(outcome);
    };

    if kind == RecordKind::LlmInteraction {
      let result = self.llm_cycle(project_id, &config).await;
      match result {
        Ok((status, records)) => {
          outcome.status = status;
          outcome.reports = records;
        }
        Err(e) => {
          warn!(project_id, "llm drift check failed: {e}");
          outcome.detection_error = Some(e.to_string());
        }
      }
      return Ok(outcome);
    }

    outcome.status = {
      let lock = self.project_lock(project_id);
      let _guard = lock.lock().await;
      self.recompute_locked(project_id, &config).await?
    };
    if !outcome.status.monitor_ready {
      return Ok(outcome);
    }

    let detection = self.detect_after_ingest(project_id, kind, &config).await;
    match detection {
      Ok(records) => outcome.reports = records,
      Err(e) => {
        warn!(project_id, %kind, "drift detection failed: {e}");
        outcome.detection_error = Some(e.to_string());
      }
    }
    Ok(outcome)
  }

  /// Token-count interactions and ingest them into the LLM ledger.
  pub async fn log_interactions(
    &self,
    project_id: ProjectId,
    interactions: Vec<NewInteraction>,
    batch_timestamp: DateTime<Utc>,
  ) -> Result<IngestOutcome> {
    let payloads = interactions
      .into_iter()
      .map(|i| {
        let response_token_length = self.tokenizer.count(&i.response_text);
        Payload::LlmInteraction(LlmInteraction {
          input_text: i.input_text,
          response_text: i.response_text,
          response_token_length,
        })
      })
      .collect();
    self
      .ingest(project_id, RecordKind::LlmInteraction, payloads, batch_timestamp)
      .await
  }

  async fn detect_after_ingest(
    &self,
    project_id: ProjectId,
    kind: RecordKind,
    config: &ProjectConfig,
  ) -> Result<Vec<DriftRecord>> {
    let (Some(baseline), Some(monitor)) = (
      self.get_baseline_data(project_id).await?,
      self.get_monitor_data(project_id).await?,
    ) else {
      return Ok(Vec::new());
    };
    let min = config.drift.min_samples;
    let enough = |s: &WindowSnapshot| s.get(kind).is_some_and(|d| d.rows.len() >= min);
    if !enough(&baseline) || !enough(&monitor) {
      debug!(project_id, %kind, "windows below min_samples, skipping detection");
      return Ok(Vec::new());
    }

    match kind {
      RecordKind::Feature => {
        let detection =
          self.feature_drift(project_id, &baseline, &monitor, config).await?;
        Ok(detection.map_or_else(Vec::new, |d| {
          std::iter::once(d.statistical).chain(d.model).collect()
        }))
      }
      RecordKind::Prediction => Ok(
        self
          .prediction_drift(project_id, &baseline, &monitor, config)
          .await?
          .into_iter()
          .collect(),
      ),
      RecordKind::LlmInteraction => Ok(Vec::new()),
    }
  }

  // ── Detection ─────────────────────────────────────────────────────────

  /// Run the statistical battery and the model-based detector on the
  /// current feature windows and persist both records.
  pub async fn detect_feature_drift(
    &self,
    project_id: ProjectId,
  ) -> Result<Option<FeatureDetection>> {
    let Some(config) = self.config(project_id).await? else {
      return Ok(None);
    };
    let (Some(baseline), Some(monitor)) = (
      self.get_baseline_data(project_id).await?,
      self.get_monitor_data(project_id).await?,
    ) else {
      return Ok(None);
    };
    self.feature_drift(project_id, &baseline, &monitor, &config).await
  }

  async fn feature_drift(
    &self,
    project_id: ProjectId,
    baseline: &BaselineData,
    monitor: &MonitorData,
    config: &ProjectConfig,
  ) -> Result<Option<FeatureDetection>> {
    let (Some(base_data), Some(curr_data)) = (&baseline.feature, &monitor.feature)
    else {
      return Ok(None);
    };

    let base = NumericFrame::from_baseline(base_data.features());
    let curr = base.align(curr_data.features())?;
    let report = run_statistical_drift(&base, &curr, &config.drift)?;

    let model_config = config.model.clone();
    let model = tokio::task::spawn_blocking(move || {
      run_model_based_drift(&base, &curr, &model_config)
    })
    .await
    .map_err(|e| Error::Worker(e.to_string()))?;

    let (b, c) = (base_data.descriptor(), curr_data.descriptor());
    info!(
      project_id,
      drift = report.overall_drift,
      score = report.drift_score,
      model_accuracy = model.as_ref().map(|m| m.test_accuracy),
      "feature drift evaluated"
    );

    let statistical = self
      .narrated(DriftRecord::new(
        project_id,
        b.clone(),
        c.clone(),
        ReportBody::FeatureDrift(report),
      ))
      .await;
    let model = match model {
      Some(m) => Some(
        self
          .narrated(DriftRecord::new(project_id, b, c, ReportBody::ModelDrift(m)))
          .await,
      ),
      None => None,
    };

    let mut records = vec![statistical.clone()];
    records.extend(model.clone());
    self.store.insert_records(records).await.map_err(Error::store)?;
    Ok(Some(FeatureDetection { statistical, model }))
  }

  /// Compare the prediction windows and persist the record.
  pub async fn detect_prediction_drift(
    &self,
    project_id: ProjectId,
  ) -> Result<Option<DriftRecord>> {
    let Some(config) = self.config(project_id).await? else {
      return Ok(None);
    };
    let (Some(baseline), Some(monitor)) = (
      self.get_baseline_data(project_id).await?,
      self.get_monitor_data(project_id).await?,
    ) else {
      return Ok(None);
    };
    self.prediction_drift(project_id, &baseline, &monitor, &config).await
  }

  async fn prediction_drift(
    &self,
    project_id: ProjectId,
    baseline: &BaselineData,
    monitor: &MonitorData,
    config: &ProjectConfig,
  ) -> Result<Option<DriftRecord>> {
    let (Some(base_data), Some(curr_data)) =
      (&baseline.prediction, &monitor.prediction)
    else {
      return Ok(None);
    };
    let report = run_prediction_drift(
      &base_data.predictions(),
      &curr_data.predictions(),
      config.task_type,
      &config.drift,
    )?;
    info!(
      project_id,
      drift = report.overall_drift,
      alerts = ?report.alerts,
      "prediction drift evaluated"
    );

    let record = self
      .narrated(DriftRecord::new(
        project_id,
        base_data.descriptor(),
        curr_data.descriptor(),
        ReportBody::PredictionDrift(report),
      ))
      .await;
    self
      .store
      .insert_records(vec![record.clone()])
      .await
      .map_err(Error::store)?;
    Ok(Some(record))
  }

  /// Run one LLM token drift check if the monitor window is complete.
  ///
  /// Returns the report of a completed check; `None` when no check was due
  /// or the check was skipped. Either way a due window is consumed.
  pub async fn run_llm_token_drift(
    &self,
    project_id: ProjectId,
  ) -> Result<Option<LlmDriftReport>> {
    let Some(config) = self.config(project_id).await? else {
      return Ok(None);
    };
    let lock = self.project_lock(project_id);
    let _guard = lock.lock().await;
    match self.llm_check_locked(project_id, &config).await? {
      LlmCheck::Checked(report, _) => Ok(Some(report)),
      LlmCheck::NotDue | LlmCheck::Skipped => Ok(None),
    }
  }

  /// Number of LLM rows tagged as drift-affected.
  pub async fn drift_tagged_rows(&self, project_id: ProjectId) -> Result<usize> {
    self
      .store
      .count_drift_tagged(project_id)
      .await
      .map_err(Error::store)
  }

  /// Recompute LLM windows and consume every complete monitor window.
  async fn llm_cycle(
    &self,
    project_id: ProjectId,
    config: &ProjectConfig,
  ) -> Result<(WindowStatus, Vec<DriftRecord>)> {
    let lock = self.project_lock(project_id);
    let _guard = lock.lock().await;

    let status = self.recompute_llm_locked(project_id, config).await?;
    let mut records = Vec::new();
    loop {
      match self.llm_check_locked(project_id, config).await? {
        LlmCheck::NotDue => break,
        LlmCheck::Skipped => {}
        LlmCheck::Checked(_, record) => records.push(record),
      }
    }
    Ok((status, records))
  }

  async fn recompute_llm_locked(
    &self,
    project_id: ProjectId,
    config: &ProjectConfig,
  ) -> Result<WindowStatus> {
    let tip = self.store.ledger_tip(project_id).await.map_err(Error::store)?;
    let baseline =
      self.store.get_llm_baseline(project_id).await.map_err(Error::store)?;
    let monitor =
      self.store.get_llm_monitor(project_id).await.map_err(Error::store)?;
    let current_baseline = baseline.as_ref().map(|b| b.range);
    let current_monitor = monitor.as_ref().map(|m| m.range);

    let (next_baseline, next_monitor) = plan_llm_windows(
      &config.window,
      tip.llm_interaction,
      current_baseline,
      current_monitor,
    );
    let now = Utc::now();

    if let Some(range) = next_baseline.filter(|r| Some(*r) != current_baseline) {
      let avg = self.average_tokens(project_id, range).await?;
      if baseline.is_some() {
        self
          .store
          .update_llm_baseline(project_id, range, avg, now)
          .await
          .map_err(Error::store)?;
        info!(project_id, %range, avg, "llm baseline extended");
      } else {
        let insertion = self
          .store
          .insert_llm_baseline_if_absent(project_id, range, avg, now)
          .await
          .map_err(Error::store)?;
        if insertion.was_inserted() {
          info!(project_id, %range, avg, "llm baseline created");
        }
      }
    }

    if let Some(range) = next_monitor.filter(|r| Some(*r) != current_monitor) {
      self
        .store
        .put_llm_monitor(project_id, range, now)
        .await
        .map_err(Error::store)?;
      debug!(project_id, %range, "llm monitor moved");
    }

    Ok(WindowStatus {
      baseline_ready: next_baseline.is_some(),
      monitor_ready:  next_monitor
        .is_some_and(|m| tip.llm_interaction >= m.start_row),
    })
  }

  async fn average_tokens(
    &self,
    project_id: ProjectId,
    range: WindowRange,
  ) -> Result<f64> {
    let rows = self
      .store
      .rows_in_range(project_id, RecordKind::LlmInteraction, range)
      .await
      .map_err(Error::store)?;
    let lengths: Vec<f64> =
      token_lengths(&rows).into_iter().map(f64::from).collect();
    Ok(crate::stats::mean(&lengths).unwrap_or(0.0))
  }

  async fn llm_check_locked(
    &self,
    project_id: ProjectId,
    config: &ProjectConfig,
  ) -> Result<LlmCheck> {
    let (Some(baseline), Some(monitor)) = (
      self.store.get_llm_baseline(project_id).await.map_err(Error::store)?,
      self.store.get_llm_monitor(project_id).await.map_err(Error::store)?,
    ) else {
      return Ok(LlmCheck::NotDue);
    };
    let tip = self.store.ledger_tip(project_id).await.map_err(Error::store)?;
    if tip.llm_interaction < monitor.range.end_row {
      return Ok(LlmCheck::NotDue);
    }

    let rows = self
      .store
      .rows_in_range(project_id, RecordKind::LlmInteraction, monitor.range)
      .await
      .map_err(Error::store)?;
    let next_monitor =
      advance_monitor(monitor.range, config.window.monitor_batch_size);
    let now = Utc::now();
    let threshold = config.llm.token_drift_threshold;

    let Some(eval) =
      evaluate_token_drift(baseline.avg_response_tokens, &token_lengths(&rows), threshold)
    else {
      debug!(project_id, range = %monitor.range, "llm check skipped");
      self
        .store
        .record_llm_check(project_id, LlmCheckOutcome {
          record: None,
          tag_range: None,
          next_monitor,
          at: now,
        })
        .await
        .map_err(Error::store)?;
      return Ok(LlmCheck::Skipped);
    };

    let report = LlmDriftReport {
      baseline:     baseline.range,
      monitor:      monitor.range,
      baseline_avg: baseline.avg_response_tokens,
      monitor_avg:  eval.monitor_avg,
      change_pct:   eval.change_pct,
      threshold,
      has_drift:    eval.has_drift,
      rows_tagged:  if eval.has_drift { rows.len() } else { 0 },
    };
    let last_baseline_row = self
      .store
      .rows_in_range(
        project_id,
        RecordKind::LlmInteraction,
        WindowRange::new(baseline.range.end_row, baseline.range.end_row),
      )
      .await
      .map_err(Error::store)?;
    let current = WindowData::new(monitor.range, rows);
    let record = self
      .narrated(DriftRecord::new(
        project_id,
        WindowDescriptor {
          range:       baseline.range,
          row_count:   baseline.range.len() as usize,
          last_row_at: last_baseline_row.last().map(|r| r.created_at),
        },
        current.descriptor(),
        ReportBody::LlmTokenDrift(report.clone()),
      ))
      .await;

    let tagged = self
      .store
      .record_llm_check(project_id, LlmCheckOutcome {
        record: Some(record.clone()),
        tag_range: report.has_drift.then_some(monitor.range),
        next_monitor,
        at: now,
      })
      .await
      .map_err(Error::store)?;
    info!(
      project_id,
      range = %monitor.range,
      change_pct = report.change_pct,
      drift = report.has_drift,
      tagged,
      "llm token drift evaluated"
    );
    Ok(LlmCheck::Checked(report, record))
  }

  // ── History ───────────────────────────────────────────────────────────

  /// Report history, newest first.
  pub async fn reports(
    &self,
    project_id: ProjectId,
    limit: usize,
  ) -> Result<Vec<DriftRecord>> {
    self
      .store
      .list_records(project_id, limit)
      .await
      .map_err(Error::store)
  }

  async fn narrated(&self, mut record: DriftRecord) -> DriftRecord {
    let request = NarrativeRequest {
      kind:            record.kind(),
      body:            record.body.clone(),
      baseline_window: record.baseline.to_string(),
      current_window:  record.current.to_string(),
    };
    record.narrative =
      Some(narrate_or_fallback(self.narrator.as_ref(), &request).await);
    record
  }
}

fn token_lengths(rows: &[Row]) -> Vec<u32> {
  rows
    .iter()
    .filter_map(|r| r.payload.as_interaction())
    .map(|i| i.response_token_length)
    .collect()
}

fn monitor_has_rows(monitor: &KindRanges, tip: &LedgerTip) -> bool {
  KindRanges::KINDS.into_iter().any(|kind| {
    monitor.get(kind).is_some_and(|m| tip.get(kind) >= m.start_row)
  })
}
