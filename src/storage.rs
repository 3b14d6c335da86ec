//! Object storage for rendered videos.

use crate::config::R2Config;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Client;
use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";
pub const VIDEO_KEY_PREFIX: &str = "videos/";

const PRESIGN_TTL: Duration = Duration::from_secs(3600);

// path segment set; '/' is left alone so key folders survive
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid object store endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("invalid bucket configuration: {0}")]
    Bucket(String),
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("object store rejected upload ({status}): {message}")]
    Rejected { status: u16, message: String },
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    /// Publicly resolvable URL for `key`.
    fn public_url(&self, key: &str) -> String;
}

/// Cloudflare R2 (or any S3-compatible store) via presigned PUT requests.
#[derive(Debug, Clone)]
pub struct R2Store {
    client: Client,
    bucket: Bucket,
    credentials: Credentials,
    public_base_url: String,
}

impl R2Store {
    pub fn new(cfg: &R2Config) -> Result<Self, StorageError> {
        let endpoint: Url = cfg.endpoint.parse()?;
        let bucket = Bucket::new(
            endpoint,
            UrlStyle::Path,
            cfg.bucket.clone(),
            cfg.region.clone(),
        )
        .map_err(|e| StorageError::Bucket(e.to_string()))?;

        Ok(Self {
            client: Client::new(),
            bucket,
            credentials: Credentials::new(cfg.access_key.clone(), cfg.secret_key.clone()),
            public_base_url: cfg.public_base_url.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for R2Store {
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        let url = self
            .bucket
            .put_object(Some(&self.credentials), key)
            .sign(PRESIGN_TTL);

        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        info!(key, "uploaded object");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        join_public_url(&self.public_base_url, key)
    }
}

pub fn join_public_url(base: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        utf8_percent_encode(key.trim_start_matches('/'), KEY_ENCODE_SET)
    )
}

/// Lowercases `title` and replaces every non-alphanumeric char with `_`.
pub fn safe_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .flat_map(char::to_lowercase)
        .collect()
}

/// `videos/<safe title>_<YYYYMMDD_HHMMSS>.mp4`
pub fn storage_key<Tz>(title: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}{}_{}.mp4",
        VIDEO_KEY_PREFIX,
        safe_title(title),
        at.format("%Y%m%d_%H%M%S")
    )
}
