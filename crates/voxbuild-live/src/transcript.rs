//! Turn transcripts.
//!
//! The live service streams partial transcription fragments for both the user's
//! microphone and the model's speech. Fragments accumulate per role until the
//! service marks the turn complete; then one finalized entry per non-empty role
//! is emitted, user first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A finalized line of the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-turn accumulator for input and output transcription fragments.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    user_text: String,
    model_text: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an input-channel (user) fragment.
    pub fn push_input(&mut self, fragment: &str) {
        self.user_text.push_str(fragment);
    }

    /// Append an output-channel (model) fragment.
    pub fn push_output(&mut self, fragment: &str) {
        self.model_text.push_str(fragment);
    }

    /// Finalize the turn stamped with the current time.
    pub fn complete_turn(&mut self) -> Vec<TranscriptEntry> {
        self.complete_turn_at(Utc::now())
    }

    /// Finalize the turn: user entry then model entry, each only when non-blank.
    /// Text is kept as accumulated. Both accumulators are reset.
    pub fn complete_turn_at(&mut self, timestamp: DateTime<Utc>) -> Vec<TranscriptEntry> {
        let user = std::mem::take(&mut self.user_text);
        let model = std::mem::take(&mut self.model_text);

        let entries: Vec<TranscriptEntry> = [(Role::User, user), (Role::Model, model)]
            .into_iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(role, text)| TranscriptEntry {
                role,
                text,
                timestamp,
            })
            .collect();

        debug!(target: "voxbuild::live", "Turn complete: {} transcript entries", entries.len());
        entries
    }

    /// Drop whatever is buffered (session teardown).
    pub fn reset(&mut self) {
        self.user_text.clear();
        self.model_text.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.user_text.is_empty() && self.model_text.is_empty()
    }
}
