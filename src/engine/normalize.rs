use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One recognition callback from speech capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Turns raw recognition events into accepted utterances.
///
/// Interim text is held until either a final event arrives or the silence
/// window elapses with no newer interim; then it is promoted to final. An
/// accepted utterance identical to the previous one within the same window is
/// dropped as a repeated callback.
///
/// Time is passed in by the caller so the debounce is deterministic under test.
#[derive(Debug)]
pub struct TranscriptNormalizer {
    window: Duration,
    pending: Option<(String, Instant)>,
    last_accepted: Option<(String, Instant)>,
}

impl TranscriptNormalizer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            last_accepted: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Feed one capture event; returns an utterance when one is accepted
    pub fn on_event(&mut self, event: &TranscriptEvent, now: Instant) -> Option<String> {
        let text = event.text.trim();

        if event.is_final {
            // A final supersedes whatever interim was pending
            self.pending = None;
            return self.accept(text, now);
        }

        if text.is_empty() {
            return None;
        }
        self.pending = Some((text.to_string(), now));
        None
    }

    /// Promote the pending interim if the silence window has elapsed
    pub fn poll_silence(&mut self, now: Instant) -> Option<String> {
        let due = matches!(&self.pending, Some((_, at)) if now.saturating_duration_since(*at) >= self.window);
        if !due {
            return None;
        }
        let (text, _) = self.pending.take()?;
        debug!("Silence window elapsed, promoting interim: {:?}", text);
        self.accept(&text, now)
    }

    /// When the pending interim becomes due, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, at)| *at + self.window)
    }

    /// Promote the pending interim immediately (capture ended mid-utterance)
    pub fn flush(&mut self, now: Instant) -> Option<String> {
        let (text, _) = self.pending.take()?;
        self.accept(&text, now)
    }

    /// Drop pending text, used while the assistant is speaking
    pub fn discard_pending(&mut self) {
        self.pending = None;
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.last_accepted = None;
    }

    fn accept(&mut self, text: &str, now: Instant) -> Option<String> {
        if text.is_empty() {
            return None;
        }

        if let Some((last, at)) = &self.last_accepted {
            if last == text && now.saturating_duration_since(*at) < self.window {
                debug!("Dropping repeated transcript: {:?}", text);
                return None;
            }
        }

        self.last_accepted = Some((text.to_string(), now));
        Some(text.to_string())
    }
}
