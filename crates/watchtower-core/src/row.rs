//! Row types, the unit of the append-only ledger.
//!
//! A row is an immutable record ingested for a project. Row ids are assigned
//! by the store, strictly increasing and gap-free per (project, kind). Rows
//! are never updated; LLM drift tagging lives in a separate append-only
//! table.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

pub type ProjectId = i64;

/// A ledger row index; the first row of every (project, kind) is `1`.
pub type RowId = i64;

// ─── Kind ────────────────────────────────────────────────────────────────────

/// Which ledger a row belongs to. Each kind has its own row-id sequence.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
  Feature,
  Prediction,
  LlmInteraction,
}

impl RecordKind {
  pub const ALL: [RecordKind; 3] =
    [Self::Feature, Self::Prediction, Self::LlmInteraction];

  /// The discriminant stored in the `kind` column.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Feature => "feature",
      Self::Prediction => "prediction",
      Self::LlmInteraction => "llm_interaction",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "feature" => Some(Self::Feature),
      "prediction" => Some(Self::Prediction),
      "llm_interaction" => Some(Self::LlmInteraction),
      _ => None,
    }
  }
}

impl fmt::Display for RecordKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// A schema-flexible field value. JSON numbers, strings, booleans and nulls
/// map onto the variants one-to-one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
  Number(f64),
  Bool(bool),
  Text(String),
  Null,
}

impl FieldValue {
  pub fn as_number(&self) -> Option<f64> {
    match self {
      Self::Number(n) if n.is_finite() => Some(*n),
      _ => None,
    }
  }

  pub fn is_null(&self) -> bool {
    match self {
      Self::Null => true,
      Self::Number(n) => n.is_nan(),
      _ => false,
    }
  }

  /// A stable label used when the value is treated as a class.
  pub fn class_label(&self) -> Option<String> {
    match self {
      Self::Number(n) if n.is_finite() => Some(n.to_string()),
      Self::Bool(b) => Some(b.to_string()),
      Self::Text(s) => Some(s.clone()),
      _ => None,
    }
  }
}

impl From<f64> for FieldValue {
  fn from(n: f64) -> Self { Self::Number(n) }
}

impl From<&str> for FieldValue {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

/// Named feature values of a single row.
pub type FeatureMap = BTreeMap<String, FieldValue>;

/// One logged LLM call. The token length is computed at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmInteraction {
  pub input_text:            String,
  pub response_text:         String,
  pub response_token_length: u32,
}

/// Caller input for [`crate::engine::DriftEngine::log_interactions`]; the
/// engine fills in the token length.
#[derive(Debug, Clone, Deserialize)]
pub struct NewInteraction {
  pub input_text:    String,
  pub response_text: String,
}

// ─── Payload ─────────────────────────────────────────────────────────────────

/// The typed payload of a row. The variant doubles as the row's kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
  Feature(FeatureMap),
  Prediction(FieldValue),
  LlmInteraction(LlmInteraction),
}

impl Payload {
  pub fn kind(&self) -> RecordKind {
    match self {
      Self::Feature(_) => RecordKind::Feature,
      Self::Prediction(_) => RecordKind::Prediction,
      Self::LlmInteraction(_) => RecordKind::LlmInteraction,
    }
  }

  /// Serialise the inner payload (without the kind tag) for storage.
  pub fn to_json(&self) -> Result<serde_json::Value> {
    let full = serde_json::to_value(self)?;
    Ok(full.get("data").cloned().unwrap_or(serde_json::Value::Null))
  }

  /// Rebuild a payload from its stored kind and JSON body.
  pub fn from_parts(kind: RecordKind, data: serde_json::Value) -> Result<Self> {
    let wrapped = serde_json::json!({ "kind": kind.as_str(), "data": data });
    Ok(serde_json::from_value(wrapped)?)
  }

  pub fn as_features(&self) -> Option<&FeatureMap> {
    match self {
      Self::Feature(map) => Some(map),
      _ => None,
    }
  }

  pub fn as_prediction(&self) -> Option<&FieldValue> {
    match self {
      Self::Prediction(value) => Some(value),
      _ => None,
    }
  }

  pub fn as_interaction(&self) -> Option<&LlmInteraction> {
    match self {
      Self::LlmInteraction(interaction) => Some(interaction),
      _ => None,
    }
  }
}

// ─── Row ─────────────────────────────────────────────────────────────────────

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
  pub project_id: ProjectId,
  pub row_id:     RowId,
  pub payload:    Payload,
  /// Batch timestamp supplied at ingestion.
  pub created_at: DateTime<Utc>,
}

impl Row {
  pub fn kind(&self) -> RecordKind { self.payload.kind() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn field_values_follow_json_types() {
    let map: FeatureMap = serde_json::from_str(
      r#"{"age": 41, "city": "Oslo", "vip": true, "score": null, "ratio": 0.5}"#,
    )
    .unwrap();
    assert_eq!(map["age"], FieldValue::Number(41.0));
    assert_eq!(map["city"], FieldValue::Text("Oslo".into()));
    assert_eq!(map["vip"], FieldValue::Bool(true));
    assert_eq!(map["score"], FieldValue::Null);
    assert_eq!(map["ratio"].as_number(), Some(0.5));
  }

  #[test]
  fn payload_parts_roundtrip() {
    let payload = Payload::Prediction(FieldValue::Number(3.5));
    let json = payload.to_json().unwrap();
    assert_eq!(json, serde_json::json!(3.5));
    let back = Payload::from_parts(RecordKind::Prediction, json).unwrap();
    assert_eq!(back, payload);
  }

  #[test]
  fn record_kind_parse_matches_as_str() {
    for kind in RecordKind::ALL {
      assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(RecordKind::parse("facts"), None);
  }
}
