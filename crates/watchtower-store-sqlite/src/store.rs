//! [`SqliteStore`], the SQLite implementation of [`MonitorStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tracing::debug;

use watchtower_core::{
  config::ProjectConfig,
  llm::{LlmBaseline, LlmMonitor},
  report::DriftRecord,
  row::{Payload, ProjectId, RecordKind, Row, RowId},
  store::{Insertion, LlmCheckOutcome, MonitorStore},
  window::{Baseline, KindRanges, LedgerTip, MonitorWindows, WindowRange},
};

use crate::{
  Error, Result,
  encode::{
    RawLlmBaseline, RawLlmMonitor, RawRecord, RawRow, RawWindows, decode_kind,
    encode_dt, encode_uuid, split_range,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Watchtower store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted and every
/// call runs on the connection's own thread, one at a time.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Statements ──────────────────────────────────────────────────────────────

const SELECT_BASELINE: &str = "
  SELECT project_id, feature_start, feature_end, prediction_start,
         prediction_end, created_at, updated_at
  FROM baselines WHERE project_id = ?1";

const SELECT_LLM_BASELINE: &str = "
  SELECT project_id, start_row, end_row, avg_response_tokens, created_at,
         updated_at
  FROM llm_baselines WHERE project_id = ?1";

const INSERT_RECORD: &str = "
  INSERT INTO drift_reports
    (report_id, project_id, report_type, body_json, baseline_json,
     current_json, narrative, created_at)
  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

fn insert_raw_record(
  conn: &rusqlite::Connection,
  raw: &RawRecord,
) -> rusqlite::Result<()> {
  conn.execute(
    INSERT_RECORD,
    rusqlite::params![
      raw.report_id,
      raw.project_id,
      raw.report_type,
      raw.body_json,
      raw.baseline_json,
      raw.current_json,
      raw.narrative,
      raw.created_at,
    ],
  )?;
  Ok(())
}

fn read_baseline(
  conn: &rusqlite::Connection,
  project_id: ProjectId,
) -> rusqlite::Result<Option<RawWindows>> {
  conn
    .query_row(SELECT_BASELINE, rusqlite::params![project_id], |r| {
      Ok(RawWindows {
        project_id:       r.get(0)?,
        feature_start:    r.get(1)?,
        feature_end:      r.get(2)?,
        prediction_start: r.get(3)?,
        prediction_end:   r.get(4)?,
        created_at:       Some(r.get(5)?),
        updated_at:       r.get(6)?,
      })
    })
    .optional()
}

fn read_llm_baseline(
  conn: &rusqlite::Connection,
  project_id: ProjectId,
) -> rusqlite::Result<Option<RawLlmBaseline>> {
  conn
    .query_row(SELECT_LLM_BASELINE, rusqlite::params![project_id], |r| {
      Ok(RawLlmBaseline {
        project_id:          r.get(0)?,
        start_row:           r.get(1)?,
        end_row:             r.get(2)?,
        avg_response_tokens: r.get(3)?,
        created_at:          r.get(4)?,
        updated_at:          r.get(5)?,
      })
    })
    .optional()
}

/// Number of attempts an insert-if-absent makes before reporting a conflict.
const INSERT_ATTEMPTS: usize = 2;

// ─── MonitorStore impl ───────────────────────────────────────────────────────

impl MonitorStore for SqliteStore {
  type Error = Error;

  // ── Project configuration ─────────────────────────────────────────────────

  async fn get_project_config(
    &self,
    project_id: ProjectId,
  ) -> Result<Option<ProjectConfig>> {
    let json: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT config_json FROM project_configs WHERE project_id = ?1",
              rusqlite::params![project_id],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    json.map(|s| serde_json::from_str(&s).map_err(Error::Json)).transpose()
  }

  async fn put_project_config(
    &self,
    project_id: ProjectId,
    config: ProjectConfig,
  ) -> Result<()> {
    config.validate()?;
    let json = serde_json::to_string(&config)?;
    let now = encode_dt(Utc::now());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO project_configs (project_id, config_json, updated_at)
           VALUES (?1, ?2, ?3)
           ON CONFLICT(project_id) DO UPDATE SET
             config_json = excluded.config_json,
             updated_at  = excluded.updated_at",
          rusqlite::params![project_id, json, now],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn insert_project_config_if_absent(
    &self,
    project_id: ProjectId,
    config: ProjectConfig,
  ) -> Result<Insertion<ProjectConfig>> {
    config.validate()?;
    let json = serde_json::to_string(&config)?;
    let now = encode_dt(Utc::now());
    let (inserted, stored): (bool, String) = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT INTO project_configs (project_id, config_json, updated_at)
           VALUES (?1, ?2, ?3)
           ON CONFLICT(project_id) DO NOTHING",
          rusqlite::params![project_id, json, now],
        )? == 1;
        let stored: String = conn.query_row(
          "SELECT config_json FROM project_configs WHERE project_id = ?1",
          rusqlite::params![project_id],
          |r| r.get(0),
        )?;
        Ok((inserted, stored))
      })
      .await?;
    let stored: ProjectConfig = serde_json::from_str(&stored)?;
    Ok(if inserted {
      Insertion::Inserted(stored)
    } else {
      Insertion::Existing(stored)
    })
  }

  // ── Row ledger ────────────────────────────────────────────────────────────

  async fn append_rows(
    &self,
    project_id: ProjectId,
    kind: RecordKind,
    payloads: Vec<Payload>,
    batch_timestamp: DateTime<Utc>,
  ) -> Result<Option<WindowRange>> {
    if payloads.is_empty() {
      return Ok(None);
    }
    let mut encoded = Vec::with_capacity(payloads.len());
    for payload in &payloads {
      if payload.kind() != kind {
        return Err(
          watchtower_core::Error::PayloadKind { expected: kind, found: payload.kind() }
            .into(),
        );
      }
      encoded.push(serde_json::to_string(&payload.to_json()?)?);
    }
    let kind_str = kind.as_str();
    let at = encode_dt(batch_timestamp);

    let range = self
      .conn
      .call(move |conn| {
        // IMMEDIATE takes the write lock before the MAX read, so the ids
        // below cannot collide with another writer's.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let tip: RowId = tx.query_row(
          "SELECT COALESCE(MAX(row_id), 0) FROM rows
           WHERE project_id = ?1 AND kind = ?2",
          rusqlite::params![project_id, kind_str],
          |r| r.get(0),
        )?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO rows (project_id, kind, row_id, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
          )?;
          for (offset, json) in encoded.iter().enumerate() {
            let row_id = tip + 1 + offset as RowId;
            stmt.execute(rusqlite::params![project_id, kind_str, row_id, json, at])?;
          }
        }
        tx.commit()?;
        Ok(WindowRange::new(tip + 1, tip + encoded.len() as RowId))
      })
      .await?;
    debug!(project_id, %kind, %range, "appended rows");
    Ok(Some(range))
  }

  async fn ledger_tip(&self, project_id: ProjectId) -> Result<LedgerTip> {
    let tips: Vec<(String, RowId)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT kind, MAX(row_id) FROM rows WHERE project_id = ?1 GROUP BY kind",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![project_id], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    let mut tip = LedgerTip::default();
    for (kind, max) in tips {
      tip.set(decode_kind(&kind)?, max);
    }
    Ok(tip)
  }

  async fn rows_in_range(
    &self,
    project_id: ProjectId,
    kind: RecordKind,
    range: WindowRange,
  ) -> Result<Vec<Row>> {
    let kind_str = kind.as_str();
    let raws: Vec<RawRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT project_id, kind, row_id, payload_json, created_at FROM rows
           WHERE project_id = ?1 AND kind = ?2 AND row_id BETWEEN ?3 AND ?4
           ORDER BY row_id ASC",
        )?;
        let rows = stmt
          .query_map(
            rusqlite::params![project_id, kind_str, range.start_row, range.end_row],
            |r| {
              Ok(RawRow {
                project_id:   r.get(0)?,
                kind:         r.get(1)?,
                row_id:       r.get(2)?,
                payload_json: r.get(3)?,
                created_at:   r.get(4)?,
              })
            },
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawRow::into_row).collect()
  }

  // ── Feature / prediction windows ──────────────────────────────────────────

  async fn get_baseline(&self, project_id: ProjectId) -> Result<Option<Baseline>> {
    let raw = self
      .conn
      .call(move |conn| Ok(read_baseline(conn, project_id)?))
      .await?;
    raw.map(RawWindows::into_baseline).transpose()
  }

  async fn insert_baseline_if_absent(
    &self,
    project_id: ProjectId,
    ranges: KindRanges,
    at: DateTime<Utc>,
  ) -> Result<Insertion<Baseline>> {
    let (fs, fe) = split_range(ranges.feature);
    let (ps, pe) = split_range(ranges.prediction);
    let at = encode_dt(at);

    for attempt in 1..=INSERT_ATTEMPTS {
      let at = at.clone();
      let (inserted, raw) = self
        .conn
        .call(move |conn| {
          let inserted = conn.execute(
            "INSERT INTO baselines
               (project_id, feature_start, feature_end, prediction_start,
                prediction_end, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(project_id) DO NOTHING",
            rusqlite::params![project_id, fs, fe, ps, pe, at],
          )? == 1;
          Ok((inserted, read_baseline(conn, project_id)?))
        })
        .await?;
      match raw {
        Some(raw) => {
          let baseline = raw.into_baseline()?;
          return Ok(if inserted {
            Insertion::Inserted(baseline)
          } else {
            Insertion::Existing(baseline)
          });
        }
        None => debug!(project_id, attempt, "baseline vanished after insert, retrying"),
      }
    }
    Err(Error::Conflict { table: "baselines", project_id })
  }

  async fn update_baseline(
    &self,
    project_id: ProjectId,
    ranges: KindRanges,
    at: DateTime<Utc>,
  ) -> Result<()> {
    let (fs, fe) = split_range(ranges.feature);
    let (ps, pe) = split_range(ranges.prediction);
    let at = encode_dt(at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE baselines SET
             feature_start = ?2, feature_end = ?3,
             prediction_start = ?4, prediction_end = ?5,
             updated_at = ?6
           WHERE project_id = ?1",
          rusqlite::params![project_id, fs, fe, ps, pe, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_monitor(
    &self,
    project_id: ProjectId,
  ) -> Result<Option<MonitorWindows>> {
    let raw: Option<RawWindows> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT project_id, feature_start, feature_end, prediction_start,
                      prediction_end, updated_at
               FROM monitor_windows WHERE project_id = ?1",
              rusqlite::params![project_id],
              |r| {
                Ok(RawWindows {
                  project_id:       r.get(0)?,
                  feature_start:    r.get(1)?,
                  feature_end:      r.get(2)?,
                  prediction_start: r.get(3)?,
                  prediction_end:   r.get(4)?,
                  created_at:       None,
                  updated_at:       r.get(5)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawWindows::into_monitor).transpose()
  }

  async fn put_monitor(
    &self,
    project_id: ProjectId,
    ranges: KindRanges,
    at: DateTime<Utc>,
  ) -> Result<()> {
    let (fs, fe) = split_range(ranges.feature);
    let (ps, pe) = split_range(ranges.prediction);
    let at = encode_dt(at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO monitor_windows
             (project_id, feature_start, feature_end, prediction_start,
              prediction_end, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT(project_id) DO UPDATE SET
             feature_start    = excluded.feature_start,
             feature_end      = excluded.feature_end,
             prediction_start = excluded.prediction_start,
             prediction_end   = excluded.prediction_end,
             updated_at       = excluded.updated_at",
          rusqlite::params![project_id, fs, fe, ps, pe, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── LLM windows ───────────────────────────────────────────────────────────

  async fn get_llm_baseline(
    &self,
    project_id: ProjectId,
  ) -> Result<Option<LlmBaseline>> {
    let raw = self
      .conn
      .call(move |conn| Ok(read_llm_baseline(conn, project_id)?))
      .await?;
    raw.map(RawLlmBaseline::into_baseline).transpose()
  }

  async fn insert_llm_baseline_if_absent(
    &self,
    project_id: ProjectId,
    range: WindowRange,
    avg_response_tokens: f64,
    at: DateTime<Utc>,
  ) -> Result<Insertion<LlmBaseline>> {
    let at = encode_dt(at);
    for attempt in 1..=INSERT_ATTEMPTS {
      let at = at.clone();
      let (inserted, raw) = self
        .conn
        .call(move |conn| {
          let inserted = conn.execute(
            "INSERT INTO llm_baselines
               (project_id, start_row, end_row, avg_response_tokens,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(project_id) DO NOTHING",
            rusqlite::params![
              project_id,
              range.start_row,
              range.end_row,
              avg_response_tokens,
              at
            ],
          )? == 1;
          Ok((inserted, read_llm_baseline(conn, project_id)?))
        })
        .await?;
      match raw {
        Some(raw) => {
          let baseline = raw.into_baseline()?;
          return Ok(if inserted {
            Insertion::Inserted(baseline)
          } else {
            Insertion::Existing(baseline)
          });
        }
        None => {
          debug!(project_id, attempt, "llm baseline vanished after insert, retrying")
        }
      }
    }
    Err(Error::Conflict { table: "llm_baselines", project_id })
  }

  async fn update_llm_baseline(
    &self,
    project_id: ProjectId,
    range: WindowRange,
    avg_response_tokens: f64,
    at: DateTime<Utc>,
  ) -> Result<()> {
    let at = encode_dt(at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE llm_baselines SET
             start_row = ?2, end_row = ?3, avg_response_tokens = ?4,
             updated_at = ?5
           WHERE project_id = ?1",
          rusqlite::params![
            project_id,
            range.start_row,
            range.end_row,
            avg_response_tokens,
            at
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_llm_monitor(&self, project_id: ProjectId) -> Result<Option<LlmMonitor>> {
    let raw: Option<RawLlmMonitor> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT project_id, start_row, end_row, updated_at
               FROM llm_monitor_windows WHERE project_id = ?1",
              rusqlite::params![project_id],
              |r| {
                Ok(RawLlmMonitor {
                  project_id: r.get(0)?,
                  start_row:  r.get(1)?,
                  end_row:    r.get(2)?,
                  updated_at: r.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawLlmMonitor::into_monitor).transpose()
  }

  async fn put_llm_monitor(
    &self,
    project_id: ProjectId,
    range: WindowRange,
    at: DateTime<Utc>,
  ) -> Result<()> {
    let at = encode_dt(at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO llm_monitor_windows (project_id, start_row, end_row, updated_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(project_id) DO UPDATE SET
             start_row  = excluded.start_row,
             end_row    = excluded.end_row,
             updated_at = excluded.updated_at",
          rusqlite::params![project_id, range.start_row, range.end_row, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn record_llm_check(
    &self,
    project_id: ProjectId,
    outcome: LlmCheckOutcome,
  ) -> Result<usize> {
    let raw = outcome.record.as_ref().map(RawRecord::from_record).transpose()?;
    let at = encode_dt(outcome.at);
    let next = outcome.next_monitor;
    let tag_range = outcome.tag_range;
    let kind_str = RecordKind::LlmInteraction.as_str();

    let tagged = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut tagged = 0;
        if let Some(raw) = &raw {
          insert_raw_record(&tx, raw)?;
          if let Some(range) = tag_range {
            tagged = tx.execute(
              "INSERT OR IGNORE INTO llm_drift_tags
                 (project_id, row_id, report_id, tagged_at)
               SELECT project_id, row_id, ?2, ?3 FROM rows
               WHERE project_id = ?1 AND kind = ?4
                 AND row_id BETWEEN ?5 AND ?6",
              rusqlite::params![
                project_id,
                raw.report_id,
                at,
                kind_str,
                range.start_row,
                range.end_row
              ],
            )?;
          }
        }
        tx.execute(
          "INSERT INTO llm_monitor_windows (project_id, start_row, end_row, updated_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(project_id) DO UPDATE SET
             start_row  = excluded.start_row,
             end_row    = excluded.end_row,
             updated_at = excluded.updated_at",
          rusqlite::params![project_id, next.start_row, next.end_row, at],
        )?;
        tx.commit()?;
        Ok(tagged)
      })
      .await?;
    debug!(project_id, tagged, next = %next, "recorded llm check");
    Ok(tagged)
  }

  async fn count_drift_tagged(&self, project_id: ProjectId) -> Result<usize> {
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(DISTINCT row_id) FROM llm_drift_tags WHERE project_id = ?1",
          rusqlite::params![project_id],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(usize::try_from(n).unwrap_or(0))
  }

  // ── Reports ───────────────────────────────────────────────────────────────

  async fn insert_records(&self, records: Vec<DriftRecord>) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }
    let raws = records
      .iter()
      .map(RawRecord::from_record)
      .collect::<Result<Vec<_>>>()?;
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for raw in &raws {
          insert_raw_record(&tx, raw)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_records(
    &self,
    project_id: ProjectId,
    limit: usize,
  ) -> Result<Vec<DriftRecord>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT report_id, project_id, report_type, body_json, baseline_json,
                  current_json, narrative, created_at
           FROM drift_reports WHERE project_id = ?1
           ORDER BY created_at DESC, rowid DESC
           LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![project_id, limit], |r| {
            Ok(RawRecord {
              report_id:     r.get(0)?,
              project_id:    r.get(1)?,
              report_type:   r.get(2)?,
              body_json:     r.get(3)?,
              baseline_json: r.get(4)?,
              current_json:  r.get(5)?,
              narrative:     r.get(6)?,
              created_at:    r.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawRecord::into_record).collect()
  }
}
