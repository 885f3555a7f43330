//! Binary configuration: `watchtower.toml` layered under `WATCHTOWER_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use watchtower_core::config::ProjectConfig;

/// Everything the binary reads from its config sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store_path: PathBuf,
  /// Seeded into projects that have no configuration yet.
  pub project:    ProjectConfig,
  /// Absent means narratives come from the built-in template.
  pub narrator:   Option<NarratorSettings>,
}

/// An OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarratorSettings {
  pub endpoint:     String,
  pub model:        String,
  pub api_key:      Option<String>,
  pub timeout_secs: u64,
  pub max_tokens:   u32,
}

impl Default for NarratorSettings {
  fn default() -> Self {
    Self {
      endpoint:     "https://api.openai.com/v1/chat/completions".into(),
      model:        "gpt-4o-mini".into(),
      api_key:      None,
      timeout_secs: 30,
      max_tokens:   600,
    }
  }
}

impl Settings {
  /// Read `path` (optional) and the environment. Nested keys use a double
  /// underscore, e.g. `WATCHTOWER_PROJECT__WINDOW__POLICY=sliding`.
  pub fn load(path: &Path) -> Result<Self> {
    let raw = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("WATCHTOWER")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .with_context(|| format!("failed to read config from {}", path.display()))?;
    let mut settings: Settings =
      raw.try_deserialize().context("failed to deserialise settings")?;
    if settings.store_path.as_os_str().is_empty() {
      settings.store_path = PathBuf::from("watchtower.db");
    }
    settings.store_path = expand_tilde(&settings.store_path);
    settings
      .project
      .validate()
      .context("invalid [project] defaults")?;
    Ok(settings)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
