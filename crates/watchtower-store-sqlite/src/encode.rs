//! Conversions between domain types and the plain values stored in SQLite
//! columns.
//!
//! Timestamps are RFC 3339 strings with fixed microsecond precision so that
//! text ordering matches time ordering. Payloads and report bodies are JSON
//! without their discriminant, which lives in its own column. Window ranges
//! are pairs of nullable integer columns.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;
use watchtower_core::{
  llm::{LlmBaseline, LlmMonitor},
  report::{DriftRecord, ReportBody, WindowDescriptor},
  row::{Payload, ProjectId, RecordKind, Row, RowId},
  window::{Baseline, KindRanges, MonitorWindows, WindowRange},
};

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Kinds ───────────────────────────────────────────────────────────────────

pub fn decode_kind(s: &str) -> Result<RecordKind> {
  RecordKind::parse(s).ok_or_else(|| Error::UnknownKind(s.to_owned()))
}

// ─── Ranges ──────────────────────────────────────────────────────────────────

pub fn split_range(range: Option<WindowRange>) -> (Option<RowId>, Option<RowId>) {
  match range {
    Some(r) => (Some(r.start_row), Some(r.end_row)),
    None => (None, None),
  }
}

pub fn join_range(
  start: Option<RowId>,
  end: Option<RowId>,
) -> Result<Option<WindowRange>> {
  match (start, end) {
    (None, None) => Ok(None),
    (Some(s), Some(e)) if s <= e => Ok(Some(WindowRange::new(s, e))),
    _ => Err(Error::CorruptRange { start, end }),
  }
}

fn checked_range(start: RowId, end: RowId) -> Result<WindowRange> {
  join_range(Some(start), Some(end))?
    .ok_or(Error::CorruptRange { start: Some(start), end: Some(end) })
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// A `rows` row as read from SQLite, before JSON decoding.
pub struct RawRow {
  pub project_id:   ProjectId,
  pub kind:         String,
  pub row_id:       RowId,
  pub payload_json: String,
  pub created_at:   String,
}

impl RawRow {
  pub fn into_row(self) -> Result<Row> {
    let kind = decode_kind(&self.kind)?;
    let data: serde_json::Value = serde_json::from_str(&self.payload_json)?;
    Ok(Row {
      project_id: self.project_id,
      row_id:     self.row_id,
      payload:    Payload::from_parts(kind, data)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// A `baselines` or `monitor_windows` row. `created_at` is absent for
/// monitor windows.
pub struct RawWindows {
  pub project_id:       ProjectId,
  pub feature_start:    Option<RowId>,
  pub feature_end:      Option<RowId>,
  pub prediction_start: Option<RowId>,
  pub prediction_end:   Option<RowId>,
  pub created_at:       Option<String>,
  pub updated_at:       String,
}

impl RawWindows {
  fn ranges(&self) -> Result<KindRanges> {
    Ok(KindRanges {
      feature:    join_range(self.feature_start, self.feature_end)?,
      prediction: join_range(self.prediction_start, self.prediction_end)?,
    })
  }

  pub fn into_baseline(self) -> Result<Baseline> {
    let ranges = self.ranges()?;
    let updated_at = decode_dt(&self.updated_at)?;
    let created_at = match &self.created_at {
      Some(s) => decode_dt(s)?,
      None => updated_at,
    };
    Ok(Baseline { project_id: self.project_id, ranges, created_at, updated_at })
  }

  pub fn into_monitor(self) -> Result<MonitorWindows> {
    Ok(MonitorWindows {
      project_id: self.project_id,
      ranges:     self.ranges()?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawLlmBaseline {
  pub project_id:          ProjectId,
  pub start_row:           RowId,
  pub end_row:             RowId,
  pub avg_response_tokens: f64,
  pub created_at:          String,
  pub updated_at:          String,
}

impl RawLlmBaseline {
  pub fn into_baseline(self) -> Result<LlmBaseline> {
    Ok(LlmBaseline {
      project_id:          self.project_id,
      range:               checked_range(self.start_row, self.end_row)?,
      avg_response_tokens: self.avg_response_tokens,
      created_at:          decode_dt(&self.created_at)?,
      updated_at:          decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawLlmMonitor {
  pub project_id: ProjectId,
  pub start_row:  RowId,
  pub end_row:    RowId,
  pub updated_at: String,
}

impl RawLlmMonitor {
  pub fn into_monitor(self) -> Result<LlmMonitor> {
    Ok(LlmMonitor {
      project_id: self.project_id,
      range:      checked_range(self.start_row, self.end_row)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Drift records ───────────────────────────────────────────────────────────

/// A `drift_reports` row, ready to insert or just read.
pub struct RawRecord {
  pub report_id:     String,
  pub project_id:    ProjectId,
  pub report_type:   String,
  pub body_json:     String,
  pub baseline_json: String,
  pub current_json:  String,
  pub narrative:     Option<String>,
  pub created_at:    String,
}

impl RawRecord {
  pub fn from_record(record: &DriftRecord) -> Result<Self> {
    Ok(Self {
      report_id:     encode_uuid(record.report_id),
      project_id:    record.project_id,
      report_type:   record.kind().as_str().to_owned(),
      body_json:     serde_json::to_string(&record.body.to_json()?)?,
      baseline_json: serde_json::to_string(&record.baseline)?,
      current_json:  serde_json::to_string(&record.current)?,
      narrative:     record.narrative.clone(),
      created_at:    encode_dt(record.created_at),
    })
  }

  pub fn into_record(self) -> Result<DriftRecord> {
    let body: serde_json::Value = serde_json::from_str(&self.body_json)?;
    let baseline: WindowDescriptor = serde_json::from_str(&self.baseline_json)?;
    let current: WindowDescriptor = serde_json::from_str(&self.current_json)?;
    Ok(DriftRecord {
      report_id: decode_uuid(&self.report_id)?,
      project_id: self.project_id,
      created_at: decode_dt(&self.created_at)?,
      baseline,
      current,
      body: ReportBody::from_parts(&self.report_type, body)?,
      narrative: self.narrative,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_sort_as_text() {
    let a = DateTime::parse_from_rfc3339("2026-01-01T00:00:00.5Z")
      .unwrap()
      .with_timezone(&Utc);
    let b = DateTime::parse_from_rfc3339("2026-01-01T00:00:00.123456Z")
      .unwrap()
      .with_timezone(&Utc);
    assert!(encode_dt(b) < encode_dt(a));
    assert_eq!(decode_dt(&encode_dt(a)).unwrap(), a);
  }

  #[test]
  fn half_populated_range_is_corrupt() {
    assert!(join_range(None, None).unwrap().is_none());
    assert_eq!(join_range(Some(3), Some(5)).unwrap(), Some(WindowRange::new(3, 5)));
    assert!(matches!(
      join_range(Some(3), None),
      Err(Error::CorruptRange { .. })
    ));
    assert!(join_range(Some(9), Some(5)).is_err());
  }
}
