use crate::models::{AttemptOutcome, CapabilityMode};

/// Substrings that mark an error as coming from the speech pipeline.
pub const DEFAULT_VOICE_MARKERS: &[&str] = &["elevenlabs", "voiceover", "api"];

/// Decides whether a failed attempt may be retried without narration.
#[derive(Debug, Clone)]
pub struct VoiceFailureClassifier {
    markers: Vec<String>,
}

impl Default for VoiceFailureClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_VOICE_MARKERS.iter().copied())
    }
}

impl VoiceFailureClassifier {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn is_voice_failure(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.markers.iter().any(|m| message.contains(m.as_str()))
    }

    pub fn classify(&self, mode: CapabilityMode, message: &str) -> AttemptOutcome {
        if mode.has_voice() && self.is_voice_failure(message) {
            AttemptOutcome::RetriableFailure
        } else {
            AttemptOutcome::FatalFailure
        }
    }
}
