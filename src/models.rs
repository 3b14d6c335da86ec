use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;

pub const SUCCESS_MESSAGE: &str = "Video generated and uploaded successfully!";

/// Inbound `/generate` body. Every field is optional on the wire so the
/// handler can report missing fields by name instead of a generic rejection.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GenerateRequest {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub blocks: Option<Vec<String>>,
}

impl GenerateRequest {
    /// Returns the validated course, or the names of the missing fields.
    pub fn validate(self) -> Result<CourseRequest, Vec<&'static str>> {
        let title = self.title.filter(|t| !t.trim().is_empty());
        let blocks = self.blocks.filter(|b| !b.is_empty());

        match (title, blocks) {
            (Some(title), Some(blocks)) => Ok(CourseRequest {
                title,
                subject: self.subject.filter(|s| !s.trim().is_empty()),
                blocks,
            }),
            (title, blocks) => {
                let mut missing = Vec::new();
                if title.is_none() {
                    missing.push("title");
                }
                if blocks.is_none() {
                    missing.push("blocks");
                }
                Err(missing)
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CourseRequest {
    pub title: String,
    pub subject: Option<String>,
    pub blocks: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityMode {
    WithVoice,
    WithoutVoice,
}

impl CapabilityMode {
    pub fn initial(voice_credential: Option<&str>) -> Self {
        match voice_credential {
            Some(_) => CapabilityMode::WithVoice,
            None => CapabilityMode::WithoutVoice,
        }
    }

    pub fn has_voice(self) -> bool {
        self == CapabilityMode::WithVoice
    }
}

impl fmt::Display for CapabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityMode::WithVoice => f.write_str("with voiceover"),
            CapabilityMode::WithoutVoice => f.write_str("without voiceover"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetriableFailure,
    FatalFailure,
}

#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub attempt_number: u32,
    pub capability_mode: CapabilityMode,
    pub generated_code: String,
    pub outcome: AttemptOutcome,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Success,
    Failure,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GenerationResult {
    pub r2_url: String,
    pub r2_filename: String,
    pub status: GenerationStatus,
    pub message: String,
    pub has_voiceover: bool,
    pub warnings: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorBody {
    pub detail: String,
}
