use std::time::{Duration, Instant};

use crate::theme::ThemeRules;
use crate::tokenizer::{tokenize, HighlightToken};

/// Quiescence window applied when no preference overrides it.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Debounces edit notifications into at most one highlight pass per window.
/// （將連續編輯合併，每個靜止區間最多觸發一次上色。）
///
/// The scheduler is driven by the interactive loop: `note_edit` on every
/// buffer change and `poll` on every tick. It never holds buffer text; the
/// caller hands over whatever content is current when the pass fires.
#[derive(Debug, Clone)]
pub struct HighlightScheduler {
    debounce: Duration,
    deadline: Option<Instant>,
    passes: u64,
}

impl Default for HighlightScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl HighlightScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            deadline: None,
            passes: 0,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Changes the window for edits recorded from now on.
    pub fn set_debounce(&mut self, debounce: Duration) {
        self.debounce = debounce;
    }

    /// Records an edit, replacing any pending deadline.
    pub fn note_edit(&mut self, now: Instant) {
        self.deadline = Some(now + self.debounce);
    }

    /// Requests a pass on the next poll regardless of the window.
    pub fn request_immediate(&mut self, now: Instant) {
        self.deadline = Some(now);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Number of passes fired so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Returns `true` exactly once per elapsed window and clears the deadline.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.passes += 1;
                true
            }
            _ => false,
        }
    }

    /// Tokenizes `content` when a pass is due.
    pub fn highlight_if_due(
        &mut self,
        now: Instant,
        content: &str,
        rules: &ThemeRules,
    ) -> Option<Vec<HighlightToken>> {
        if !self.poll(now) {
            return None;
        }
        let tokens = tokenize(content, rules);
        tracing::debug!(pass = self.passes, tokens = tokens.len(), "highlight pass");
        Some(tokens)
    }
}
