//! Core of the Watchtower drift engine.
//!
//! Data model, window policies, the statistical and model-based detectors,
//! and the [`engine::DriftEngine`] that ties them to a [`store::MonitorStore`].
//! This crate has no database or HTTP dependencies; backends and front ends
//! depend on it.

pub mod battery;
pub mod config;
pub mod engine;
pub mod error;
pub mod forest;
pub mod frame;
pub mod llm;
pub mod model_drift;
pub mod narrative;
pub mod prediction;
pub mod report;
pub mod row;
pub mod stats;
pub mod store;
pub mod tokenizer;
pub mod window;

pub use error::{Error, Result};
