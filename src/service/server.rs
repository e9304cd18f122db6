//! HTTP routes: `POST /inference` and `GET /health`.

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::error::ServiceError;
use super::worker::{spawn_inference_worker, InferenceHandle};
use crate::classify::{AudioClassifier, InferenceRequest, InferenceResponse};
use crate::model::SpectrogramClassifier;

#[derive(Clone)]
pub struct AppState {
    pub inference: InferenceHandle,
    /// Number of classes the loaded model ranks over
    pub classes: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Health {
    pub status: String,
    pub classes: usize,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/inference", post(inference))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn inference(
    State(state): State<AppState>,
    payload: Result<Json<InferenceRequest>, JsonRejection>,
) -> Result<Json<InferenceResponse>, ServiceError> {
    let Json(request) = payload.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    let response = state.inference.classify(request).await?;
    Ok(Json(response))
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok".into(),
        classes: state.classes,
    })
}

/// Serve `classifier` on `bind_addr` until Ctrl-C.
pub async fn serve<B, M>(
    classifier: AudioClassifier<B, M>,
    bind_addr: &str,
    max_body_bytes: usize,
) -> Result<()>
where
    B: Backend,
    M: SpectrogramClassifier<B> + Send + 'static,
{
    let classes = classifier.classes().len();
    let (inference, worker) = spawn_inference_worker(classifier);
    let app = router(
        AppState {
            inference: inference.clone(),
            classes,
        },
        max_body_bytes,
    );

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    inference.shutdown();
    tokio::task::spawn_blocking(move || worker.join())
        .await?
        .map_err(|_| anyhow::anyhow!("Inference worker panicked"))?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the process is killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
