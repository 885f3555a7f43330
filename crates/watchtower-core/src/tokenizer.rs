//! Response token counting.
//!
//! The BPE tables are large, so the encoder is loaded on first use and
//! shared through an `Arc`. If loading fails the service falls back to a
//! whitespace word count for the rest of its life.

use std::sync::Arc;

use parking_lot::Mutex;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

#[derive(Clone)]
enum Encoder {
  Bpe(Arc<CoreBPE>),
  Whitespace,
}

/// Shared token counter. Construct once and hand out `Arc<TokenizerService>`.
pub struct TokenizerService {
  encoder: Mutex<Option<Encoder>>,
}

impl TokenizerService {
  /// GPT-2 `r50k_base` encoding, loaded lazily.
  pub fn new() -> Self { Self { encoder: Mutex::new(None) } }

  /// A service that never loads BPE tables and counts whitespace words.
  pub fn whitespace() -> Self {
    Self { encoder: Mutex::new(Some(Encoder::Whitespace)) }
  }

  fn encoder(&self) -> Encoder {
    let mut slot = self.encoder.lock();
    if let Some(encoder) = slot.as_ref() {
      return encoder.clone();
    }
    let encoder = match tiktoken_rs::r50k_base() {
      Ok(bpe) => {
        debug!("loaded r50k_base encoder");
        Encoder::Bpe(Arc::new(bpe))
      }
      Err(e) => {
        warn!("failed to load r50k_base encoder, counting words instead: {e}");
        Encoder::Whitespace
      }
    };
    *slot = Some(encoder.clone());
    encoder
  }

  /// Number of tokens in `text`.
  pub fn count(&self, text: &str) -> u32 {
    let n = match self.encoder() {
      Encoder::Bpe(bpe) => bpe.encode_with_special_tokens(text).len(),
      Encoder::Whitespace => text.split_whitespace().count(),
    };
    u32::try_from(n).unwrap_or(u32::MAX)
  }
}

impl Default for TokenizerService {
  fn default() -> Self { Self::new() }
}
