//! Execution of generated scene code.
//!
//! The orchestrator never inspects generated code beyond the entry-point
//! contract: a sandbox turns source text into a [`RenderableScene`] or rejects
//! it, and rendering a scene yields the path of the produced video.

use crate::config::RenderConfig;
use crate::models::CapabilityMode;
use crate::prompt::ENTRY_POINT;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

pub const OUTPUT_NAME: &str = "output";
pub const VIDEO_EXTENSION: &str = "mp4";

/// Environment variable the speech service reads inside the render process.
const SPEECH_KEY_VAR: &str = "ELEVEN_API_KEY";
const INHERITED_ENV: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "TMPDIR", "VIRTUAL_ENV"];
const STDERR_TAIL_CHARS: usize = 4000;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Generated code must define a class named 'CourseScene'")]
    MissingEntryPoint,
    #[error("failed to prepare scene: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start renderer '{bin}': {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("renderer exited with {code}: {output}")]
    RenderFailed { code: String, output: String },
    #[error("rendered video not found under {0}")]
    ArtifactMissing(PathBuf),
}

impl SandboxError {
    /// The failure as the scene itself reported it.
    ///
    /// For a failed render this is the final exception line of the renderer
    /// output (`NameError: ...`), not the traceback above it, which quotes
    /// the generated source.
    pub fn message(&self) -> String {
        match self {
            SandboxError::RenderFailed { output, .. } => exception_line(output)
                .map(str::to_string)
                .unwrap_or_else(|| self.to_string()),
            other => other.to_string(),
        }
    }
}

/// Last line of renderer output carrying text, skipping box-drawing borders.
pub fn exception_line(output: &str) -> Option<&str> {
    output
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| line.chars().any(char::is_alphanumeric))
}

/// Where one invocation renders. Each invocation owns its own directory, so
/// concurrent requests never share an output path.
#[derive(Debug, Clone)]
pub struct RenderTarget {
    pub work_dir: PathBuf,
    pub media_dir: PathBuf,
    pub output_name: String,
}

impl RenderTarget {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            media_dir: work_dir.join("media"),
            work_dir,
            output_name: OUTPUT_NAME.to_string(),
        }
    }

    pub fn for_invocation(root: &Path) -> Self {
        Self::new(root.join(Uuid::new_v4().to_string()))
    }

    pub fn artifact_file_name(&self) -> String {
        format!("{}.{}", self.output_name, VIDEO_EXTENSION)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SceneSource<'a> {
    pub code: &'a str,
    pub mode: CapabilityMode,
    pub attempt: u32,
    pub voice_credential: Option<&'a str>,
}

#[async_trait]
pub trait RenderableScene: Send {
    /// Renders the scene and returns the path of the produced video.
    async fn render(self: Box<Self>) -> Result<PathBuf, SandboxError>;
}

#[async_trait]
pub trait SceneSandbox: Send + Sync {
    /// Builds a renderable scene from generated source, rejecting source that
    /// does not satisfy the entry-point contract.
    async fn load(
        &self,
        source: SceneSource<'_>,
        target: &RenderTarget,
    ) -> Result<Box<dyn RenderableScene>, SandboxError>;
}

pub fn defines_entry_point(code: &str) -> bool {
    let pattern = format!(r"(?m)^class\s+{}\s*[(:]", ENTRY_POINT);
    Regex::new(&pattern)
        .map(|re| re.is_match(code))
        .unwrap_or(false)
}

/// Imports visible to generated code. Voice classes only exist in voice mode.
pub fn preamble(mode: CapabilityMode) -> &'static str {
    match mode {
        CapabilityMode::WithVoice => concat!(
            "from manim import *\n",
            "from manim_voiceover import VoiceoverScene\n",
            "from manim_voiceover.services.elevenlabs import ElevenLabsService\n\n",
        ),
        CapabilityMode::WithoutVoice => "from manim import *\n\n",
    }
}

pub fn find_artifact(media_dir: &Path, file_name: &str) -> Option<PathBuf> {
    WalkDir::new(media_dir.join("videos"))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.path().components().any(|c| c.as_os_str() == "partial_movie_files"))
        .find(|e| e.file_name() == file_name)
        .map(|e| e.into_path())
}

/// Renders scenes with the manim CLI in a child process.
#[derive(Debug, Clone)]
pub struct ManimSandbox {
    bin: String,
    quality: String,
}

impl ManimSandbox {
    pub fn new(cfg: &RenderConfig) -> Self {
        Self {
            bin: cfg.manim_bin.clone(),
            quality: cfg.quality.clone(),
        }
    }
}

#[async_trait]
impl SceneSandbox for ManimSandbox {
    async fn load(
        &self,
        source: SceneSource<'_>,
        target: &RenderTarget,
    ) -> Result<Box<dyn RenderableScene>, SandboxError> {
        if !defines_entry_point(source.code) {
            return Err(SandboxError::MissingEntryPoint);
        }

        tokio::fs::create_dir_all(&target.media_dir).await?;
        let script = target
            .work_dir
            .join(format!("scene_attempt_{}.py", source.attempt));
        let mut contents = String::from(preamble(source.mode));
        contents.push_str(source.code);
        contents.push('\n');
        tokio::fs::write(&script, contents).await?;
        debug!(script = %script.display(), "wrote scene source");

        Ok(Box::new(ManimScene {
            bin: self.bin.clone(),
            quality: self.quality.clone(),
            script,
            target: target.clone(),
            voice_key: speech_key(&source),
        }))
    }
}

fn speech_key(source: &SceneSource<'_>) -> Option<String> {
    match source.mode {
        CapabilityMode::WithVoice => source.voice_credential.map(str::to_string),
        CapabilityMode::WithoutVoice => None,
    }
}

struct ManimScene {
    bin: String,
    quality: String,
    script: PathBuf,
    target: RenderTarget,
    voice_key: Option<String>,
}

impl ManimScene {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("render")
            .arg("-q")
            .arg(&self.quality)
            .arg("--media_dir")
            .arg(&self.target.media_dir)
            .arg("-o")
            .arg(&self.target.output_name)
            .arg(&self.script)
            .arg(ENTRY_POINT)
            .current_dir(&self.target.work_dir)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for var in INHERITED_ENV {
            if let Ok(v) = std::env::var(var) {
                cmd.env(var, v);
            }
        }
        if let Some(key) = &self.voice_key {
            cmd.env(SPEECH_KEY_VAR, key);
        }
        cmd
    }
}

#[async_trait]
impl RenderableScene for ManimScene {
    async fn render(self: Box<Self>) -> Result<PathBuf, SandboxError> {
        info!(script = %self.script.display(), voice = self.voice_key.is_some(), "rendering scene");
        let output = self
            .command()
            .output()
            .await
            .map_err(|source| SandboxError::Spawn {
                bin: self.bin.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let text = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).into_owned()
            } else {
                stderr.into_owned()
            };
            return Err(SandboxError::RenderFailed {
                code: output
                    .status
                    .code()
                    .map(|c| format!("status {}", c))
                    .unwrap_or_else(|| "a signal".to_string()),
                output: tail(&text, STDERR_TAIL_CHARS).trim().to_string(),
            });
        }

        find_artifact(&self.target.media_dir, &self.target.artifact_file_name())
            .ok_or_else(|| SandboxError::ArtifactMissing(self.target.media_dir.clone()))
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
