//! [`HttpNarrator`]: narratives from an OpenAI-compatible chat completions
//! endpoint.

use std::time::Duration;

use anyhow::{Context as _, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use watchtower_core::narrative::{
  NarrativeError, NarrativeFuture, NarrativeRequest, Narrator,
};

use crate::settings::NarratorSettings;

const SYSTEM_PROMPT: &str = "You are a data quality and ML monitoring expert. \
                             Provide clear, actionable insights about drift \
                             detection results.";

#[derive(Serialize)]
struct ChatRequest<'a> {
  model:       &'a str,
  messages:    [ChatMessage<'a>; 2],
  temperature: f32,
  max_tokens:  u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
  role:    &'a str,
  content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
  choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
  message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
  content: Option<String>,
}

impl ChatResponse {
  fn into_text(self) -> Option<String> {
    self
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .map(|t| t.trim().to_owned())
      .filter(|t| !t.is_empty())
  }
}

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpNarrator {
  client:   Client,
  settings: NarratorSettings,
}

impl HttpNarrator {
  pub fn new(settings: NarratorSettings) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(settings.timeout_secs))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, settings })
  }

  async fn complete(&self, request: &NarrativeRequest) -> Result<String, NarrativeError> {
    let prompt = request.prompt();
    let body = ChatRequest {
      model:       &self.settings.model,
      messages:    [
        ChatMessage { role: "system", content: SYSTEM_PROMPT },
        ChatMessage { role: "user", content: &prompt },
      ],
      temperature: 0.3,
      max_tokens:  self.settings.max_tokens,
    };

    let mut req = self.client.post(&self.settings.endpoint).json(&body);
    if let Some(key) = &self.settings.api_key {
      req = req.bearer_auth(key);
    }
    let resp = req
      .send()
      .await
      .map_err(|e| NarrativeError::Backend(Box::new(e)))?;
    if !resp.status().is_success() {
      return Err(NarrativeError::Backend(
        format!("POST {} → {}", self.settings.endpoint, resp.status()).into(),
      ));
    }
    let parsed: ChatResponse = resp
      .json()
      .await
      .map_err(|e| NarrativeError::Backend(Box::new(e)))?;
    parsed.into_text().ok_or(NarrativeError::Empty)
  }
}

impl Narrator for HttpNarrator {
  fn narrate<'a>(&'a self, request: &'a NarrativeRequest) -> NarrativeFuture<'a> {
    Box::pin(self.complete(request))
  }
}
