//! Generation, render and upload of one course video.
//!
//! Each call walks a small state machine: ask the model for scene code,
//! render it, and on a speech-related failure drop narration and try once
//! more. Any other failure ends the call. A rendered video is uploaded and
//! described by a [`GenerationResult`].

use crate::classify::VoiceFailureClassifier;
use crate::codegen::{extract_code, CodeGenerator, GeneratorError};
use crate::models::{
    AttemptOutcome, CapabilityMode, CourseRequest, GenerationAttempt, GenerationResult,
    GenerationStatus, SUCCESS_MESSAGE,
};
use crate::prompt;
use crate::sandbox::{RenderTarget, SandboxError, SceneSandbox, SceneSource};
use crate::storage::{storage_key, ObjectStore, StorageError, VIDEO_CONTENT_TYPE};
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

pub const MAX_ATTEMPTS: u32 = 2;

#[derive(Error, Debug)]
pub enum OrchestrateError {
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error("Generated code must define a class named 'CourseScene'")]
    MissingEntryPoint,
    #[error("Failed to execute/render Manim code: {0}")]
    Render(#[source] SandboxError),
    #[error("Failed to generate video after all attempts ({attempts}): {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("failed to read rendered video {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to upload video: {0}")]
    Upload(#[from] StorageError),
}

pub struct Orchestrator {
    generator: Arc<dyn CodeGenerator>,
    sandbox: Arc<dyn SceneSandbox>,
    store: Arc<dyn ObjectStore>,
    classifier: VoiceFailureClassifier,
    work_root: PathBuf,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        sandbox: Arc<dyn SceneSandbox>,
        store: Arc<dyn ObjectStore>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            generator,
            sandbox,
            store,
            classifier: VoiceFailureClassifier::default(),
            work_root: work_root.into(),
        }
    }

    pub fn with_classifier(mut self, classifier: VoiceFailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Produces and uploads a video for `course`.
    ///
    /// `voice_credential` is the speech-synthesis key as seen at invocation
    /// time; without it every attempt renders silently.
    #[instrument(skip_all, fields(title = %course.title))]
    pub async fn generate(
        &self,
        course: &CourseRequest,
        voice_credential: Option<String>,
    ) -> Result<GenerationResult, OrchestrateError> {
        let target = RenderTarget::for_invocation(&self.work_root);
        let result = self.run(course, voice_credential.as_deref(), &target).await;

        if let Err(e) = tokio::fs::remove_dir_all(&target.work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %target.work_dir.display(), error = %e, "failed to clean render directory");
            }
        }
        result
    }

    async fn run(
        &self,
        course: &CourseRequest,
        voice_credential: Option<&str>,
        target: &RenderTarget,
    ) -> Result<GenerationResult, OrchestrateError> {
        let mut mode = CapabilityMode::initial(voice_credential);
        let mut warnings = Vec::new();
        let mut artifact: Option<PathBuf> = None;
        let mut attempt = 0;
        let mut last_failure = String::new();

        while artifact.is_none() && attempt < MAX_ATTEMPTS {
            attempt += 1;
            info!(attempt, %mode, "generating scene");

            let prompt = prompt::compose(course, mode);
            let raw = match self.generator.generate(&prompt).await {
                Ok(raw) => raw,
                Err(e) if attempt >= MAX_ATTEMPTS => {
                    error!(attempt, error = %e, "generative model failed on final attempt");
                    return Err(OrchestrateError::Exhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            let code = extract_code(&raw);

            let source = SceneSource {
                code: &code,
                mode,
                attempt,
                voice_credential,
            };
            let rendered = match self.sandbox.load(source, target).await {
                Ok(scene) => scene.render().await,
                Err(e) => Err(e),
            };

            let record = |outcome| GenerationAttempt {
                attempt_number: attempt,
                capability_mode: mode,
                generated_code: code.clone(),
                outcome,
            };

            match rendered {
                Ok(path) => {
                    log_attempt(&record(AttemptOutcome::Success));
                    artifact = Some(path);
                }
                Err(SandboxError::MissingEntryPoint) => {
                    log_attempt(&record(AttemptOutcome::FatalFailure));
                    return Err(OrchestrateError::MissingEntryPoint);
                }
                Err(e) => {
                    let message = e.message();
                    let outcome = self.classifier.classify(mode, &message);
                    log_attempt(&record(outcome));
                    match outcome {
                        AttemptOutcome::RetriableFailure => {
                            warn!(attempt, error = %message, "speech failure, retrying without voiceover");
                            mode = CapabilityMode::WithoutVoice;
                            warnings.push(format!(
                                "Switched to non-voiceover mode due to voice synthesis error: {}",
                                message
                            ));
                            last_failure = message;
                        }
                        _ if attempt >= MAX_ATTEMPTS => {
                            return Err(OrchestrateError::Exhausted {
                                attempts: attempt,
                                last: e.to_string(),
                            });
                        }
                        _ => return Err(OrchestrateError::Render(e)),
                    }
                }
            }
        }

        let Some(video_path) = artifact else {
            return Err(OrchestrateError::Exhausted {
                attempts: attempt,
                last: last_failure,
            });
        };

        let bytes = tokio::fs::read(&video_path)
            .await
            .map_err(|source| OrchestrateError::Artifact {
                path: video_path.clone(),
                source,
            })?;

        let key = storage_key(&course.title, &Local::now());
        info!(%key, bytes = bytes.len(), "uploading video");
        self.store.put(&key, bytes, VIDEO_CONTENT_TYPE).await?;

        Ok(GenerationResult {
            r2_url: self.store.public_url(&key),
            r2_filename: key,
            status: GenerationStatus::Success,
            message: SUCCESS_MESSAGE.to_string(),
            has_voiceover: mode.has_voice(),
            warnings: if warnings.is_empty() {
                None
            } else {
                Some(warnings)
            },
        })
    }
}

fn log_attempt(attempt: &GenerationAttempt) {
    match attempt.outcome {
        AttemptOutcome::Success => info!(
            attempt = attempt.attempt_number,
            mode = %attempt.capability_mode,
            "rendered scene"
        ),
        outcome => error!(
            attempt = attempt.attempt_number,
            mode = %attempt.capability_mode,
            ?outcome,
            code_len = attempt.generated_code.len(),
            "scene attempt failed"
        ),
    }
}
