use tracing::warn;
use webbridge_protocol::FinishReason;

use crate::monitor::{Observation, Settlement};

/// Text appended since the previous observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaChunk {
    pub text: String,
    pub is_final: bool,
    /// The page text stopped extending what was already sent; `text` is
    /// the whole new text rather than a suffix.
    pub corrective: bool,
    /// Present on the final chunk.
    pub finish: Option<FinishReason>,
}

impl DeltaChunk {
    pub fn new(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
            corrective: false,
            finish: is_final.then_some(FinishReason::Stop),
        }
    }
}

/// Turns full-text snapshots into append-only deltas.
#[derive(Debug, Default)]
pub struct DeltaEmitter {
    last_emitted: String,
    corrections: usize,
}

impl DeltaEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observation: &Observation) -> DeltaChunk {
        let finish = observation.settlement.map(|s| match s {
            Settlement::Settled => FinishReason::Stop,
            Settlement::TimedOut => FinishReason::Timeout,
        });
        let is_final = finish.is_some();

        let (text, corrective) = match observation.text.strip_prefix(self.last_emitted.as_str()) {
            Some(suffix) => (suffix.to_string(), false),
            None => {
                self.corrections += 1;
                warn!(
                    sent_chars = self.last_emitted.len(),
                    observed_chars = observation.text.len(),
                    "Observed text diverged from what was already sent; resending in full"
                );
                (observation.text.clone(), true)
            }
        };

        self.last_emitted.clone_from(&observation.text);
        DeltaChunk {
            text,
            is_final,
            corrective,
            finish,
        }
    }

    /// Full text as of the last observation.
    pub fn emitted_text(&self) -> &str {
        &self.last_emitted
    }

    pub fn corrections(&self) -> usize {
        self.corrections
    }
}
