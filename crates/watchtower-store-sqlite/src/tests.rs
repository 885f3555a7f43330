use std::sync::Arc;

use chrono::{Duration, SubsecRound as _, Utc};
use watchtower_core::{
  config::{ModelDriftConfig, ProjectConfig, WindowConfig, WindowPolicy},
  engine::DriftEngine,
  llm::LlmDriftReport,
  report::{DriftRecord, ReportBody, ReportKind, WindowDescriptor},
  row::{FeatureMap, FieldValue, LlmInteraction, NewInteraction, Payload, RecordKind},
  store::{Insertion, LlmCheckOutcome, MonitorStore},
  tokenizer::TokenizerService,
  window::{KindRanges, WindowRange},
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory().await.expect("in-memory store")
}

fn feature_rows(n: usize, offset: f64) -> Vec<Payload> {
  (0..n)
    .map(|i| {
      Payload::Feature(FeatureMap::from([
        ("x".to_owned(), FieldValue::Number((i % 100) as f64 + offset)),
        ("y".to_owned(), FieldValue::Number(((i * 7) % 50) as f64)),
      ]))
    })
    .collect()
}

fn prediction_rows(n: usize, offset: f64) -> Vec<Payload> {
  (0..n)
    .map(|i| Payload::Prediction(FieldValue::Number((i % 40) as f64 + offset)))
    .collect()
}

fn interaction(words: usize) -> NewInteraction {
  NewInteraction {
    input_text:    "question".into(),
    response_text: vec!["word"; words].join(" "),
  }
}

fn llm_row(tokens: u32) -> Payload {
  Payload::LlmInteraction(LlmInteraction {
    input_text:            "q".into(),
    response_text:         "a".into(),
    response_token_length: tokens,
  })
}

fn test_config(policy: WindowPolicy) -> ProjectConfig {
  ProjectConfig {
    window: WindowConfig { policy, ..WindowConfig::default() },
    model: ModelDriftConfig { n_trees: 20, ..ModelDriftConfig::default() },
    ..ProjectConfig::default()
  }
}

fn llm_config() -> ProjectConfig {
  ProjectConfig {
    window: WindowConfig {
      baseline_batch_size: 10,
      monitor_batch_size:  3,
      policy:              WindowPolicy::Anchored,
    },
    ..ProjectConfig::default()
  }
}

fn engine(store: SqliteStore) -> DriftEngine<SqliteStore> {
  DriftEngine::new(Arc::new(store))
    .with_tokenizer(Arc::new(TokenizerService::whitespace()))
}

fn llm_record(project_id: i64, offset_secs: i64) -> DriftRecord {
  let mut record = DriftRecord::new(
    project_id,
    WindowDescriptor {
      range:       WindowRange::new(1, 10),
      row_count:   10,
      last_row_at: None,
    },
    WindowDescriptor {
      range:       WindowRange::new(11, 13),
      row_count:   3,
      last_row_at: None,
    },
    ReportBody::LlmTokenDrift(LlmDriftReport {
      baseline:     WindowRange::new(1, 10),
      monitor:      WindowRange::new(11, 13),
      baseline_avg: 4.0,
      monitor_avg:  8.0,
      change_pct:   1.0,
      threshold:    0.15,
      has_drift:    true,
      rows_tagged:  3,
    }),
  );
  // Stored timestamps keep microseconds.
  record.created_at = (record.created_at + Duration::seconds(offset_secs)).trunc_subsecs(6);
  record.narrative = Some(format!("record {offset_secs}"));
  record
}

// ─── Project configuration ───────────────────────────────────────────────────

#[tokio::test]
async fn config_roundtrip_and_replace() {
  let s = store().await;
  assert!(s.get_project_config(1).await.unwrap().is_none());

  let config = test_config(WindowPolicy::Sliding);
  s.put_project_config(1, config.clone()).await.unwrap();
  assert_eq!(s.get_project_config(1).await.unwrap(), Some(config));

  s.put_project_config(1, ProjectConfig::default()).await.unwrap();
  assert_eq!(
    s.get_project_config(1).await.unwrap(),
    Some(ProjectConfig::default())
  );
}

#[tokio::test]
async fn config_insert_if_absent_keeps_first() {
  let s = store().await;
  let first = test_config(WindowPolicy::Sliding);
  let inserted = s.insert_project_config_if_absent(7, first.clone()).await.unwrap();
  assert_eq!(inserted, Insertion::Inserted(first.clone()));

  let second = s
    .insert_project_config_if_absent(7, ProjectConfig::default())
    .await
    .unwrap();
  assert_eq!(second, Insertion::Existing(first));
}

#[tokio::test]
async fn invalid_config_is_rejected() {
  let s = store().await;
  let mut config = ProjectConfig::default();
  config.window.baseline_batch_size = 0;
  let err = s.put_project_config(1, config).await.unwrap_err();
  assert!(matches!(err, Error::Core(watchtower_core::Error::InvalidConfig(_))));
}

// ─── Row ledger ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn append_assigns_gap_free_ids() {
  let s = store().await;
  let now = Utc::now();
  let first = s
    .append_rows(1, RecordKind::Feature, feature_rows(3, 0.0), now)
    .await
    .unwrap();
  assert_eq!(first, Some(WindowRange::new(1, 3)));
  let second = s
    .append_rows(1, RecordKind::Feature, feature_rows(2, 0.0), now)
    .await
    .unwrap();
  assert_eq!(second, Some(WindowRange::new(4, 5)));

  let empty = s.append_rows(1, RecordKind::Feature, vec![], now).await.unwrap();
  assert!(empty.is_none());
}

#[tokio::test]
async fn kinds_and_projects_have_independent_sequences() {
  let s = store().await;
  let now = Utc::now();
  s.append_rows(1, RecordKind::Feature, feature_rows(4, 0.0), now).await.unwrap();
  s.append_rows(1, RecordKind::Prediction, prediction_rows(2, 0.0), now)
    .await
    .unwrap();
  s.append_rows(2, RecordKind::Feature, feature_rows(1, 0.0), now).await.unwrap();

  let tip = s.ledger_tip(1).await.unwrap();
  assert_eq!((tip.feature, tip.prediction, tip.llm_interaction), (4, 2, 0));
  assert_eq!(s.ledger_tip(2).await.unwrap().feature, 1);
  assert_eq!(s.ledger_tip(3).await.unwrap().feature, 0);
}

#[tokio::test]
async fn append_rejects_foreign_payloads() {
  let s = store().await;
  let err = s
    .append_rows(1, RecordKind::Prediction, feature_rows(1, 0.0), Utc::now())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(watchtower_core::Error::PayloadKind { .. })
  ));
  assert_eq!(s.ledger_tip(1).await.unwrap().prediction, 0);
}

#[tokio::test]
async fn rows_in_range_returns_present_rows_in_order() {
  let s = store().await;
  let at = Utc::now();
  s.append_rows(1, RecordKind::Prediction, prediction_rows(5, 0.0), at)
    .await
    .unwrap();

  let rows = s
    .rows_in_range(1, RecordKind::Prediction, WindowRange::new(4, 10))
    .await
    .unwrap();
  let ids: Vec<_> = rows.iter().map(|r| r.row_id).collect();
  assert_eq!(ids, vec![4, 5]);
  assert_eq!(rows[0].payload, Payload::Prediction(FieldValue::Number(3.0)));
  assert_eq!(rows[0].created_at.timestamp_micros(), at.timestamp_micros());
}

#[tokio::test]
async fn concurrent_appends_stay_gap_free() {
  let s = store().await;
  let mut handles = Vec::new();
  for _ in 0..8 {
    let s = s.clone();
    handles.push(tokio::spawn(async move {
      s.append_rows(1, RecordKind::Feature, feature_rows(25, 0.0), Utc::now())
        .await
        .unwrap()
        .unwrap()
    }));
  }
  let mut ranges = Vec::new();
  for h in handles {
    ranges.push(h.await.unwrap());
  }
  ranges.sort_by_key(|r| r.start_row);
  for pair in ranges.windows(2) {
    assert_eq!(pair[1].start_row, pair[0].end_row + 1);
  }

  let rows = s
    .rows_in_range(1, RecordKind::Feature, WindowRange::new(1, 200))
    .await
    .unwrap();
  assert_eq!(rows.len(), 200);
  assert!(rows.iter().enumerate().all(|(i, r)| r.row_id == i as i64 + 1));
}

#[tokio::test]
async fn file_store_persists_across_reopen() {
  let path = std::env::temp_dir()
    .join(format!("watchtower-{}.db", uuid::Uuid::new_v4()));
  {
    let s = SqliteStore::open(&path).await.unwrap();
    s.append_rows(3, RecordKind::Feature, feature_rows(2, 0.0), Utc::now())
      .await
      .unwrap();
  }
  let s = SqliteStore::open(&path).await.unwrap();
  assert_eq!(s.ledger_tip(3).await.unwrap().feature, 2);
  let _ = std::fs::remove_file(&path);
}

// ─── Windows ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn baseline_insert_if_absent_has_one_winner() {
  let s = store().await;
  let mut handles = Vec::new();
  for i in 0..8_i64 {
    let s = s.clone();
    handles.push(tokio::spawn(async move {
      let ranges = KindRanges {
        feature:    Some(WindowRange::new(1, 1000 + i)),
        prediction: None,
      };
      s.insert_baseline_if_absent(1, ranges, Utc::now()).await.unwrap()
    }));
  }
  let mut winners = 0;
  let mut seen = Vec::new();
  for h in handles {
    let insertion = h.await.unwrap();
    if insertion.was_inserted() {
      winners += 1;
    }
    seen.push(insertion.into_inner().ranges);
  }
  assert_eq!(winners, 1);
  assert!(seen.windows(2).all(|w| w[0] == w[1]));

  let stored = s.get_baseline(1).await.unwrap().unwrap();
  assert_eq!(stored.ranges, seen[0]);
}

#[tokio::test]
async fn baseline_update_and_monitor_upsert() {
  let s = store().await;
  let at = Utc::now();
  let ranges = KindRanges {
    feature:    Some(WindowRange::new(1, 1000)),
    prediction: Some(WindowRange::new(1, 1000)),
  };
  s.insert_baseline_if_absent(1, ranges, at).await.unwrap();

  let extended = KindRanges { feature: Some(WindowRange::new(1, 2000)), ..ranges };
  s.update_baseline(1, extended, at + Duration::seconds(5)).await.unwrap();
  let baseline = s.get_baseline(1).await.unwrap().unwrap();
  assert_eq!(baseline.ranges, extended);
  assert!(baseline.updated_at > baseline.created_at);

  assert!(s.get_monitor(1).await.unwrap().is_none());
  let monitor = KindRanges { feature: Some(WindowRange::new(2001, 2500)), prediction: None };
  s.put_monitor(1, monitor, at).await.unwrap();
  s.put_monitor(1, monitor, at).await.unwrap();
  assert_eq!(s.get_monitor(1).await.unwrap().unwrap().ranges, monitor);
}

// ─── LLM ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn llm_check_tags_rows_and_advances_atomically() {
  let s = store().await;
  let at = Utc::now();
  let rows: Vec<_> = (0..13).map(|_| llm_row(4)).collect();
  s.append_rows(1, RecordKind::LlmInteraction, rows, at).await.unwrap();
  s.insert_llm_baseline_if_absent(1, WindowRange::new(1, 10), 4.0, at)
    .await
    .unwrap();
  s.put_llm_monitor(1, WindowRange::new(11, 13), at).await.unwrap();

  let record = llm_record(1, 0);
  let tagged = s
    .record_llm_check(1, LlmCheckOutcome {
      record:       Some(record.clone()),
      tag_range:    Some(WindowRange::new(11, 13)),
      next_monitor: WindowRange::new(14, 16),
      at,
    })
    .await
    .unwrap();
  assert_eq!(tagged, 3);
  assert_eq!(s.count_drift_tagged(1).await.unwrap(), 3);
  assert_eq!(
    s.get_llm_monitor(1).await.unwrap().unwrap().range,
    WindowRange::new(14, 16)
  );
  assert_eq!(s.list_records(1, 10).await.unwrap(), vec![record]);

  let skipped = s
    .record_llm_check(1, LlmCheckOutcome {
      record:       None,
      tag_range:    None,
      next_monitor: WindowRange::new(17, 19),
      at,
    })
    .await
    .unwrap();
  assert_eq!(skipped, 0);
  assert_eq!(s.list_records(1, 10).await.unwrap().len(), 1);
  assert_eq!(
    s.get_llm_monitor(1).await.unwrap().unwrap().range,
    WindowRange::new(17, 19)
  );
}

#[tokio::test]
async fn llm_baseline_insert_if_absent_and_update() {
  let s = store().await;
  let at = Utc::now();
  let first = s
    .insert_llm_baseline_if_absent(1, WindowRange::new(1, 10), 4.0, at)
    .await
    .unwrap();
  assert!(first.was_inserted());
  let second = s
    .insert_llm_baseline_if_absent(1, WindowRange::new(1, 10), 9.0, at)
    .await
    .unwrap();
  assert_eq!(second.into_inner().avg_response_tokens, 4.0);

  s.update_llm_baseline(1, WindowRange::new(1, 20), 5.0, at).await.unwrap();
  let baseline = s.get_llm_baseline(1).await.unwrap().unwrap();
  assert_eq!(baseline.range, WindowRange::new(1, 20));
  assert_eq!(baseline.avg_response_tokens, 5.0);
}

// ─── Reports ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn records_list_newest_first_with_limit() {
  let s = store().await;
  let records: Vec<_> = (0..5).map(|i| llm_record(1, i)).collect();
  s.insert_records(records.clone()).await.unwrap();
  s.insert_records(vec![llm_record(2, 0)]).await.unwrap();

  let listed = s.list_records(1, 3).await.unwrap();
  let narratives: Vec<_> =
    listed.iter().filter_map(|r| r.narrative.clone()).collect();
  assert_eq!(narratives, vec!["record 4", "record 3", "record 2"]);
  assert_eq!(listed[0].kind(), ReportKind::LlmTokenDrift);
  assert_eq!(listed[0].report_id, records[4].report_id);
  assert_eq!(s.list_records(2, 10).await.unwrap().len(), 1);
}

// ─── Engine over SQLite ──────────────────────────────────────────────────────

#[tokio::test]
async fn anchored_first_detection_after_1200_rows() {
  let e = engine(store().await);
  e.ensure_project(1, test_config(WindowPolicy::Anchored)).await.unwrap();

  let mut rows = feature_rows(1000, 0.0);
  rows.extend(feature_rows(200, 50.0));
  let outcome = e.ingest(1, RecordKind::Feature, rows, Utc::now()).await.unwrap();

  assert_eq!(outcome.rows_appended(), 1200);
  assert!(outcome.status.baseline_ready && outcome.status.monitor_ready);
  assert!(outcome.detection_error.is_none());
  assert_eq!(
    e.get_baseline_window(1, RecordKind::Feature).await.unwrap(),
    Some(WindowRange::new(1, 1000))
  );
  assert_eq!(
    e.get_monitor_window(1, RecordKind::Feature).await.unwrap(),
    Some(WindowRange::new(1001, 1500))
  );

  let monitor = e.get_monitor_data(1).await.unwrap().unwrap();
  let feature = monitor.feature.unwrap();
  assert_eq!(feature.retrieved, Some(WindowRange::new(1001, 1200)));
  assert!(monitor.prediction.is_none());

  let kinds: Vec<_> = outcome.reports.iter().map(DriftRecord::kind).collect();
  assert_eq!(kinds, vec![ReportKind::FeatureDrift, ReportKind::ModelDrift]);
  let ReportBody::FeatureDrift(report) = &outcome.reports[0].body else {
    panic!("expected a feature drift report");
  };
  assert!(report.alerts.contains(&"x".to_owned()));
  assert!(!report.alerts.contains(&"y".to_owned()));
  assert_eq!(outcome.reports[0].current.row_count, 200);
  assert!(outcome.reports.iter().all(|r| r.narrative.is_some()));

  assert_eq!(e.reports(1, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn sliding_baseline_follows_the_tip() {
  let e = engine(store().await);
  e.ensure_project(1, test_config(WindowPolicy::Sliding)).await.unwrap();

  let outcome = e
    .ingest(1, RecordKind::Feature, feature_rows(1200, 0.0), Utc::now())
    .await
    .unwrap();
  assert!(outcome.status.baseline_ready);
  assert!(!outcome.status.monitor_ready);
  assert!(outcome.reports.is_empty());
  assert_eq!(
    e.get_baseline_window(1, RecordKind::Feature).await.unwrap(),
    Some(WindowRange::new(201, 1200))
  );

  let outcome = e
    .ingest(1, RecordKind::Feature, feature_rows(100, 0.0), Utc::now())
    .await
    .unwrap();
  assert!(outcome.status.monitor_ready);
  assert_eq!(
    e.get_monitor_window(1, RecordKind::Feature).await.unwrap(),
    Some(WindowRange::new(1201, 1300))
  );
  assert_eq!(outcome.reports.len(), 2);
}

#[tokio::test]
async fn unconfigured_project_is_not_ready() {
  let e = engine(store().await);
  let outcome = e
    .ingest(9, RecordKind::Feature, feature_rows(1200, 0.0), Utc::now())
    .await
    .unwrap();
  assert_eq!(outcome.rows_appended(), 1200);
  assert!(!outcome.status.baseline_ready);
  assert!(e.get_baseline_window(9, RecordKind::Feature).await.unwrap().is_none());
  assert!(e.get_baseline_data(9).await.unwrap().is_none());
}

#[tokio::test]
async fn prediction_drift_runs_on_prediction_ingest() {
  let e = engine(store().await);
  e.ensure_project(1, test_config(WindowPolicy::Anchored)).await.unwrap();

  let mut rows = prediction_rows(1000, 0.0);
  rows.extend(prediction_rows(120, 30.0));
  let outcome = e.ingest(1, RecordKind::Prediction, rows, Utc::now()).await.unwrap();

  assert_eq!(outcome.reports.len(), 1);
  let ReportBody::PredictionDrift(report) = &outcome.reports[0].body else {
    panic!("expected a prediction drift report");
  };
  assert!(report.overall_drift);
  assert_eq!(report.current_samples, 120);
}

#[tokio::test]
async fn competing_engines_agree_on_one_baseline() {
  let s = Arc::new(store().await);
  s.put_project_config(1, test_config(WindowPolicy::Anchored)).await.unwrap();
  s.append_rows(1, RecordKind::Feature, feature_rows(1100, 0.0), Utc::now())
    .await
    .unwrap();

  let mut handles = Vec::new();
  for _ in 0..4 {
    let e = DriftEngine::new(s.clone());
    handles.push(tokio::spawn(async move { e.recompute_windows(1).await.unwrap() }));
  }
  for h in handles {
    assert!(h.await.unwrap().baseline_ready);
  }
  let baseline = s.get_baseline(1).await.unwrap().unwrap();
  assert_eq!(baseline.ranges.feature, Some(WindowRange::new(1, 1000)));
  let monitor = s.get_monitor(1).await.unwrap().unwrap();
  assert_eq!(monitor.ranges.feature, Some(WindowRange::new(1001, 1500)));
}

#[tokio::test]
async fn llm_windows_are_consumed_and_tagged() {
  let e = engine(store().await);
  e.ensure_project(1, llm_config()).await.unwrap();

  let baseline: Vec<_> = (0..10).map(|_| interaction(4)).collect();
  let outcome = e.log_interactions(1, baseline, Utc::now()).await.unwrap();
  assert!(outcome.status.baseline_ready);
  assert!(outcome.reports.is_empty());
  assert_eq!(
    e.get_monitor_window(1, RecordKind::LlmInteraction).await.unwrap(),
    Some(WindowRange::new(11, 13))
  );

  let longer: Vec<_> = (0..3).map(|_| interaction(8)).collect();
  let outcome = e.log_interactions(1, longer, Utc::now()).await.unwrap();
  assert_eq!(outcome.reports.len(), 1);
  let ReportBody::LlmTokenDrift(report) = &outcome.reports[0].body else {
    panic!("expected an llm report");
  };
  assert!(report.has_drift);
  assert_eq!(report.baseline_avg, 4.0);
  assert_eq!(report.monitor_avg, 8.0);
  assert_eq!(e.drift_tagged_rows(1).await.unwrap(), 3);
  assert_eq!(
    e.get_monitor_window(1, RecordKind::LlmInteraction).await.unwrap(),
    Some(WindowRange::new(14, 16))
  );

  let stable: Vec<_> = (0..3).map(|_| interaction(4)).collect();
  let outcome = e.log_interactions(1, stable, Utc::now()).await.unwrap();
  assert_eq!(outcome.reports.len(), 1);
  assert!(!outcome.reports[0].body.drift_detected());
  assert_eq!(e.drift_tagged_rows(1).await.unwrap(), 3);
  assert_eq!(e.reports(1, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn large_llm_batch_consumes_every_complete_window() {
  let e = engine(store().await);
  e.ensure_project(1, llm_config()).await.unwrap();

  let baseline: Vec<_> = (0..10).map(|_| interaction(4)).collect();
  e.log_interactions(1, baseline, Utc::now()).await.unwrap();

  let burst: Vec<_> = (0..8).map(|_| interaction(4)).collect();
  let outcome = e.log_interactions(1, burst, Utc::now()).await.unwrap();
  assert_eq!(outcome.reports.len(), 2);
  assert_eq!(
    e.get_monitor_window(1, RecordKind::LlmInteraction).await.unwrap(),
    Some(WindowRange::new(17, 19))
  );
  assert!(e.run_llm_token_drift(1).await.unwrap().is_none());
}
