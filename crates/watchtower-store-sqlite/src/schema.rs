//! SQL schema for the Watchtower SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS project_configs (
    project_id  INTEGER PRIMARY KEY,
    config_json TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- The row ledger is strictly append-only.
-- row_id is gap-free per (project_id, kind), assigned inside one transaction.
CREATE TABLE IF NOT EXISTS rows (
    project_id   INTEGER NOT NULL,
    kind         TEXT    NOT NULL,   -- 'feature' | 'prediction' | 'llm_interaction'
    row_id       INTEGER NOT NULL,
    payload_json TEXT    NOT NULL,   -- JSON payload (inner data only)
    created_at   TEXT    NOT NULL,   -- batch timestamp, RFC 3339 UTC
    PRIMARY KEY (project_id, kind, row_id)
);

-- One baseline per project; the primary key backs insert-if-absent.
CREATE TABLE IF NOT EXISTS baselines (
    project_id       INTEGER PRIMARY KEY,
    feature_start    INTEGER,
    feature_end      INTEGER,
    prediction_start INTEGER,
    prediction_end   INTEGER,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS monitor_windows (
    project_id       INTEGER PRIMARY KEY,
    feature_start    INTEGER,
    feature_end      INTEGER,
    prediction_start INTEGER,
    prediction_end   INTEGER,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS llm_baselines (
    project_id          INTEGER PRIMARY KEY,
    start_row           INTEGER NOT NULL,
    end_row             INTEGER NOT NULL,
    avg_response_tokens REAL    NOT NULL,
    created_at          TEXT    NOT NULL,
    updated_at          TEXT    NOT NULL,
    CHECK (start_row <= end_row)
);

CREATE TABLE IF NOT EXISTS llm_monitor_windows (
    project_id INTEGER PRIMARY KEY,
    start_row  INTEGER NOT NULL,
    end_row    INTEGER NOT NULL,
    updated_at TEXT    NOT NULL,
    CHECK (start_row <= end_row)
);

-- Reports are append-only.
CREATE TABLE IF NOT EXISTS drift_reports (
    report_id     TEXT PRIMARY KEY,
    project_id    INTEGER NOT NULL,
    report_type   TEXT    NOT NULL,   -- discriminant of ReportBody
    body_json     TEXT    NOT NULL,   -- JSON body (inner data only)
    baseline_json TEXT    NOT NULL,   -- WindowDescriptor
    current_json  TEXT    NOT NULL,   -- WindowDescriptor
    narrative     TEXT,
    created_at    TEXT    NOT NULL
);

-- Drift-affected LLM rows, tagged by the check that found them.
CREATE TABLE IF NOT EXISTS llm_drift_tags (
    project_id INTEGER NOT NULL,
    row_id     INTEGER NOT NULL,
    report_id  TEXT    NOT NULL REFERENCES drift_reports(report_id),
    tagged_at  TEXT    NOT NULL,
    PRIMARY KEY (project_id, row_id, report_id)
);

CREATE INDEX IF NOT EXISTS drift_reports_project_idx
    ON drift_reports(project_id, created_at);

PRAGMA user_version = 1;
";
