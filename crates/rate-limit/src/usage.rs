//! Token usage reported by LLM upstreams.

use serde::Deserialize;

/// Plain bodies above this size are not scanned.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Token counts of one completion.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens in the completion.
    #[serde(default)]
    pub completion_tokens: u64,
}

impl TokenUsage {
    /// Prompt and completion tokens together.
    pub fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Deserialize)]
struct Envelope {
    usage: Option<TokenUsage>,
}

/// Collects the `usage` object of an upstream response.
///
/// A plain JSON body is fed chunk by chunk and parsed once in [`UsageTracker::finish`]. The
/// payloads of a server-sent event stream are recorded one event at a time, and the last event
/// carrying a usage object wins.
#[derive(Debug, Default)]
pub struct UsageTracker {
    body: Vec<u8>,
    overflowed: bool,
    usage: Option<TokenUsage>,
}

impl UsageTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a chunk of a plain body.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.overflowed {
            return;
        }

        if self.body.len() + chunk.len() > MAX_BODY_BYTES {
            log::debug!("Response body too large to scan for token usage");

            self.body = Vec::new();
            self.overflowed = true;

            return;
        }

        self.body.extend_from_slice(chunk);
    }

    /// Records the data of one server-sent event.
    pub fn record_event(&mut self, data: &str) {
        if data == "[DONE]" {
            return;
        }

        if let Ok(envelope) = serde_json::from_str::<Envelope>(data) {
            self.record(envelope);
        }
    }

    /// Parses the buffered body, if any, and returns the last usage seen.
    pub fn finish(mut self) -> Option<TokenUsage> {
        if !self.body.is_empty()
            && let Ok(envelope) = serde_json::from_slice::<Envelope>(&self.body)
        {
            self.record(envelope);
        }

        self.usage
    }

    fn record(&mut self, envelope: Envelope) {
        if let Some(usage) = envelope.usage {
            self.usage = Some(usage);
        }
    }
}
