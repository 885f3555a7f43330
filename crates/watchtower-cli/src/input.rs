//! JSON batch files accepted by the ingestion subcommands.

use std::{io::Read as _, path::Path};

use anyhow::{Context as _, Result};
use watchtower_core::row::{FeatureMap, FieldValue, NewInteraction, Payload, RecordKind};

fn read_source(path: &Path) -> Result<String> {
  if path == Path::new("-") {
    let mut buf = String::new();
    std::io::stdin()
      .read_to_string(&mut buf)
      .context("reading batch from stdin")?;
    return Ok(buf);
  }
  std::fs::read_to_string(path)
    .with_context(|| format!("reading batch file {}", path.display()))
}

/// Parse a batch for the feature or prediction ledger.
pub fn parse_payloads(raw: &str, kind: RecordKind) -> Result<Vec<Payload>> {
  match kind {
    RecordKind::Feature => {
      let rows: Vec<FeatureMap> =
        serde_json::from_str(raw).context("expected a JSON array of objects")?;
      Ok(rows.into_iter().map(Payload::Feature).collect())
    }
    RecordKind::Prediction => {
      let values: Vec<FieldValue> =
        serde_json::from_str(raw).context("expected a JSON array of values")?;
      Ok(values.into_iter().map(Payload::Prediction).collect())
    }
    RecordKind::LlmInteraction => {
      anyhow::bail!("llm interactions are logged with `log-llm`")
    }
  }
}

pub fn read_payloads(path: &Path, kind: RecordKind) -> Result<Vec<Payload>> {
  parse_payloads(&read_source(path)?, kind)
}

pub fn read_interactions(path: &Path) -> Result<Vec<NewInteraction>> {
  serde_json::from_str(&read_source(path)?)
    .context("expected a JSON array of {input_text, response_text}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn feature_batch_keeps_mixed_values() {
    let payloads = parse_payloads(
      r#"[{"age": 31, "city": "Oslo", "vip": true, "score": null}]"#,
      RecordKind::Feature,
    )
    .unwrap();
    let map = payloads[0].as_features().unwrap();
    assert_eq!(map["age"], FieldValue::Number(31.0));
    assert_eq!(map["city"], FieldValue::Text("Oslo".into()));
    assert_eq!(map["vip"], FieldValue::Bool(true));
    assert_eq!(map["score"], FieldValue::Null);
  }

  #[test]
  fn prediction_batch_is_flat() {
    let payloads = parse_payloads(r#"[0.4, "cat", null]"#, RecordKind::Prediction).unwrap();
    assert_eq!(payloads.len(), 3);
    assert_eq!(payloads[1].as_prediction(), Some(&FieldValue::Text("cat".into())));
  }

  #[test]
  fn object_is_not_a_prediction_batch() {
    assert!(parse_payloads(r#"{"a": 1}"#, RecordKind::Prediction).is_err());
  }
}
