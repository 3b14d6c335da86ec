use axum::Router;
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::{Any, CorsLayer}, timeout::TimeoutLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use axum::extract::DefaultBodyLimit;

mod classify;
mod codegen;
mod config;
mod models;
mod orchestrator;
mod prompt;
mod routes;
mod sandbox;
mod storage;

use classify::VoiceFailureClassifier;
use codegen::GeminiClient;
use orchestrator::Orchestrator;
use sandbox::ManimSandbox;
use storage::R2Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "manim_course_video=info,tower_http=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::Config::from_env()?;
    tokio::fs::create_dir_all(&cfg.render.work_dir).await?;

    let mut orchestrator = Orchestrator::new(
        Arc::new(GeminiClient::new(&cfg.gemini)),
        Arc::new(ManimSandbox::new(&cfg.render)),
        Arc::new(R2Store::new(&cfg.r2)?),
        cfg.render.work_dir.clone(),
    );
    if let Some(markers) = &cfg.voice_markers {
        orchestrator = orchestrator.with_classifier(VoiceFailureClassifier::new(markers));
    }
    if config::voice_credential().is_none() {
        tracing::warn!("{} not set, videos will render without voiceover", config::VOICE_CREDENTIAL_VAR);
    }

    let state = routes::AppState {
        orchestrator: Arc::new(orchestrator),
        api_key: Arc::from(cfg.api_auth_key.as_str()),
    };

    let app = Router::new()
        .merge(routes::router(state))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(TimeoutLayer::new(cfg.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://0.0.0.0:{}", cfg.port);

    axum::serve(listener, app).await?;
    Ok(())
}
