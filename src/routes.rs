use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{self, Header},
    TypedHeader,
};
use http::{HeaderName, HeaderValue};
use std::sync::Arc;
use thiserror::Error;
use crate::{config, models::*, orchestrator::Orchestrator};

static X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub api_key: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/health", get(health))
        .with_state(state)
}

/// `X-API-Key` request header.
#[derive(Debug, Clone)]
pub struct XApiKey(pub String);

impl Header for XApiKey {
    fn name() -> &'static HeaderName {
        &X_API_KEY
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let key = value.to_str().map_err(|_| headers::Error::invalid())?;
        Ok(XApiKey(key.trim().to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(v) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(v));
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("API key is missing")]
    MissingKey,
    #[error("Invalid API key")]
    InvalidKey,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingKey => StatusCode::UNAUTHORIZED,
            ApiError::InvalidKey => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
        }
        (status, Json(ErrorBody { detail: self.to_string() })).into_response()
    }
}

fn verify_api_key(state: &AppState, header: Option<TypedHeader<XApiKey>>) -> Result<(), ApiError> {
    let provided = match header {
        Some(TypedHeader(XApiKey(key))) if !key.is_empty() => key,
        _ => return Err(ApiError::MissingKey),
    };
    if provided.as_str() != &*state.api_key {
        return Err(ApiError::InvalidKey);
    }
    Ok(())
}

async fn generate(
    State(state): State<AppState>,
    api_key: Option<TypedHeader<XApiKey>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerationResult>, ApiError> {
    verify_api_key(&state, api_key)?;

    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let course = req.validate().map_err(|missing| {
        let names: Vec<String> = missing.iter().map(|f| format!("'{}'", f)).collect();
        ApiError::BadRequest(format!("Missing required fields: {}", names.join(", ")))
    })?;

    tracing::info!(title = %course.title, blocks = course.blocks.len(), "generate requested");
    let result = state
        .orchestrator
        .generate(&course, config::voice_credential())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(result))
}

async fn health(
    State(state): State<AppState>,
    api_key: Option<TypedHeader<XApiKey>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    verify_api_key(&state, api_key)?;
    Ok(Json(serde_json::json!({ "status": "healthy" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{CodeGenerator, GeneratorError};
    use crate::sandbox::{RenderTarget, RenderableScene, SandboxError, SceneSandbox, SceneSource};
    use crate::storage::{ObjectStore, StorageError};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    struct CountingGenerator(AtomicUsize);

    #[async_trait]
    impl CodeGenerator for CountingGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("class CourseScene(Scene):\n    pass".into())
        }
    }

    struct FileScene(RenderTarget);

    #[async_trait]
    impl RenderableScene for FileScene {
        async fn render(self: Box<Self>) -> Result<PathBuf, SandboxError> {
            let dir = self.0.media_dir.join("videos/scene/1080p60");
            tokio::fs::create_dir_all(&dir).await?;
            let path = dir.join("output.mp4");
            tokio::fs::write(&path, b"mp4").await?;
            Ok(path)
        }
    }

    struct FileSandbox;

    #[async_trait]
    impl SceneSandbox for FileSandbox {
        async fn load(
            &self,
            _source: SceneSource<'_>,
            target: &RenderTarget,
        ) -> Result<Box<dyn RenderableScene>, SandboxError> {
            Ok(Box::new(FileScene(target.clone())))
        }
    }

    struct NullStore;

    #[async_trait]
    impl ObjectStore for NullStore {
        async fn put(&self, _key: &str, _body: Vec<u8>, _ct: &str) -> Result<(), StorageError> {
            Ok(())
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://cdn.example.com/{}", key)
        }
    }

    fn app(dir: &tempfile::TempDir) -> (Router, Arc<CountingGenerator>) {
        let generator = Arc::new(CountingGenerator(AtomicUsize::new(0)));
        let orchestrator = Orchestrator::new(
            generator.clone(),
            Arc::new(FileSandbox),
            Arc::new(NullStore),
            dir.path(),
        );
        let state = AppState {
            orchestrator: Arc::new(orchestrator),
            api_key: Arc::from("secret"),
        };
        (router(state), generator)
    }

    fn post_generate(key: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/generate")
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(res: Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_key_is_401() {
        let dir = tempfile::TempDir::new().unwrap();
        let (app, _) = app(&dir);
        let res = app.oneshot(post_generate(None, "{}")).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["detail"], "API key is missing");
    }

    #[tokio::test]
    async fn wrong_key_is_403() {
        let dir = tempfile::TempDir::new().unwrap();
        let (app, _) = app(&dir);
        let res = app
            .oneshot(post_generate(Some("nope"), "{}"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(res).await["detail"], "Invalid API key");
    }

    #[tokio::test]
    async fn missing_blocks_is_400_without_model_call() {
        let dir = tempfile::TempDir::new().unwrap();
        let (app, generator) = app(&dir);
        let res = app
            .oneshot(post_generate(Some("secret"), r#"{"title":"Intro to Arrays","subject":"CS"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let detail = json_body(res).await["detail"].as_str().unwrap().to_string();
        assert!(detail.contains("'blocks'"));
        assert!(!detail.contains("'title'"));
        assert_eq!(generator.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let dir = tempfile::TempDir::new().unwrap();
        let (app, generator) = app(&dir);
        let res = app
            .oneshot(post_generate(Some("secret"), "{not json"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(generator.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_generation_shape() {
        let dir = tempfile::TempDir::new().unwrap();
        let (app, generator) = app(&dir);
        let body = r#"{"title":"Intro to Arrays","subject":"CS","blocks":["Arrays are fundamental.","Insertion and deletion."]}"#;
        let res = app
            .oneshot(post_generate(Some("secret"), body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["message"], SUCCESS_MESSAGE);
        assert!(json["r2_url"].as_str().unwrap().ends_with(".mp4"));
        assert!(json["r2_filename"]
            .as_str()
            .unwrap()
            .starts_with("videos/intro_to_arrays_"));
        assert!(json["has_voiceover"].is_boolean());
        assert!(json.get("warnings").is_none());
        assert_eq!(generator.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn health_requires_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let (app, _) = app(&dir);
        let req = Request::builder()
            .uri("/health")
            .header("x-api-key", "secret")
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "healthy");

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
