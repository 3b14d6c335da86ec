use std::{env, path::PathBuf, time::Duration};
use thiserror::Error;

pub const VOICE_CREDENTIAL_VAR: &str = "ELEVENLABS_API_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub api_auth_key: String,
    pub request_timeout: Duration,
    // overrides the built-in speech failure markers when set
    pub voice_markers: Option<Vec<String>>,
    pub gemini: GeminiConfig,
    pub r2: R2Config,
    pub render: RenderConfig,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct R2Config {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub manim_bin: String,
    pub work_dir: PathBuf,
    // manim quality flag: l, m, h, p or k
    pub quality: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parsed("PORT", 8000)?;
        let timeout_secs: u64 = parsed("REQUEST_TIMEOUT_SECS", 900)?;

        let quality = optional("RENDER_QUALITY", "h");
        if !matches!(quality.as_str(), "l" | "m" | "h" | "p" | "k") {
            return Err(ConfigError::Invalid {
                var: "RENDER_QUALITY",
                reason: format!("unknown quality '{}'", quality),
            });
        }

        Ok(Self {
            port,
            api_auth_key: required("API_AUTH_KEY")?,
            request_timeout: Duration::from_secs(timeout_secs),
            voice_markers: env::var("VOICE_ERROR_MARKERS").ok().and_then(|v| split_list(&v)),
            gemini: GeminiConfig {
                api_key: required("GEMINI_API_KEY")?,
                model: optional("GEMINI_MODEL", "gemini-2.5-pro"),
                base_url: optional(
                    "GEMINI_BASE_URL",
                    "https://generativelanguage.googleapis.com",
                ),
            },
            r2: R2Config {
                endpoint: required("R2_STORAGE_ENDPOINT")?,
                access_key: required("R2_STORAGE_ACCESS_KEY")?,
                secret_key: required("R2_STORAGE_SECRET_KEY")?,
                bucket: required("R2_STORAGE_BUCKET_NAME")?,
                region: optional("R2_STORAGE_REGION", "auto"),
                public_base_url: required("R2_STORAGE_BASE_URL")?,
            },
            render: RenderConfig {
                manim_bin: optional("MANIM_BIN", "manim"),
                work_dir: env::var("RENDER_WORK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| env::temp_dir().join("manim-course")),
                quality,
            },
        })
    }
}

/// Reads the voice-synthesis credential from the live environment.
///
/// Called once per invocation rather than at startup, so rotating or removing
/// the secret takes effect on the next request.
pub fn voice_credential() -> Option<String> {
    env::var(VOICE_CREDENTIAL_VAR)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn split_list(value: &str) -> Option<Vec<String>> {
    let items: Vec<String> = value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(var)),
    }
}

fn optional(var: &str, default: &str) -> String {
    env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
