//! HTTP request surface.
//!
//! Handlers never touch the pipeline directly. Each `POST /run` is queued to a
//! single worker thread that owns the [`CascadeService`] and the
//! [`GenerationOrchestrator`], so requests are served one at a time in arrival
//! order.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::error::{CascadeError, Result};
use crate::models::{GenerationOutcome, RunRequest, RunResponse};
use crate::orchestrator::GenerationOrchestrator;
use crate::persist::OutputPersister;
use crate::seed::SeedController;
use crate::service::CascadeService;

const QUEUE_DEPTH: usize = 16;

pub enum WorkerMessage {
    Run {
        request: RunRequest,
        response_tx: oneshot::Sender<Result<GenerationOutcome>>,
    },
    Shutdown,
}

pub struct AppState {
    pub worker_tx: mpsc::Sender<WorkerMessage>,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>, error_type: &str) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.to_string(),
        }
    }
}

type ApiResult<T> = std::result::Result<T, (StatusCode, Json<ApiError>)>;

fn error_response(err: &CascadeError) -> (StatusCode, Json<ApiError>) {
    if err.is_validation() {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(err.to_string(), "invalid_request_error")),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(err.to_string(), "server_error")),
        )
    }
}

/// Starts the generation worker. The service is initialized by the caller and
/// shut down by the worker once it receives [`WorkerMessage::Shutdown`] or the
/// queue closes.
pub fn spawn_worker(
    service: CascadeService,
    seeds: SeedController,
    output_dir: PathBuf,
) -> (mpsc::Sender<WorkerMessage>, JoinHandle<Result<()>>) {
    let (worker_tx, mut worker_rx) = mpsc::channel::<WorkerMessage>(QUEUE_DEPTH);

    let handle = std::thread::spawn(move || {
        let mut service = service;
        {
            let mut orchestrator =
                GenerationOrchestrator::new(&service, seeds, OutputPersister::new(output_dir));

            while let Some(message) = worker_rx.blocking_recv() {
                match message {
                    WorkerMessage::Run {
                        request,
                        response_tx,
                    } => {
                        let result = orchestrator.run(&request.request, request.randomize_seed);
                        if let Err(e) = &result {
                            log::error!("❌ Generation failed: {}", e);
                        }
                        if response_tx.send(result).is_err() {
                            log::warn!("⚠️  Client went away before the result was ready");
                        }
                    }
                    WorkerMessage::Shutdown => break,
                }
            }
        }
        service.shutdown()
    });

    (worker_tx, handle)
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/run", post(run))
        .with_state(state)
}

pub async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn run(
    State(state): State<SharedState>,
    Json(req): Json<RunRequest>,
) -> ApiResult<Json<RunResponse>> {
    req.request.validate().map_err(|e| error_response(&e))?;

    let (response_tx, response_rx) = oneshot::channel();
    state
        .worker_tx
        .send(WorkerMessage::Run {
            request: req,
            response_tx,
        })
        .await
        .map_err(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("Generation worker unavailable", "server_error")),
            )
        })?;

    let outcome = response_rx
        .await
        .map_err(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("Generation channel closed", "server_error")),
            )
        })?
        .map_err(|e| error_response(&e))?;

    let response = RunResponse::from_outcome(&outcome).map_err(|e| error_response(&e))?;
    log::info!("📤 Returning {} image(s)", response.images.len());
    Ok(Json(response))
}

/// Serves until Ctrl-C, then drains the worker and shuts the service down.
pub async fn serve(config: &Config, service: CascadeService) -> Result<()> {
    let (worker_tx, worker) = spawn_worker(service, SeedController::new(), config.output_dir.clone());
    let app = router(Arc::new(AppState {
        worker_tx: worker_tx.clone(),
    }));

    let port = config.port_or_default();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("🌐 Listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("🛑 Shutdown requested");
        })
        .await?;

    // The worker may already be gone if it failed; nothing left to stop then.
    let _ = worker_tx.send(WorkerMessage::Shutdown).await;
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .map_err(|e| CascadeError::InternalError(e.to_string()))?
        .map_err(|_| CascadeError::InternalError("generation worker panicked".into()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PreviewConfig, ResourceConfig};
    use crate::models::GenerationRequest;
    use crate::resources::Device;

    fn start(output_dir: PathBuf) -> (SharedState, JoinHandle<Result<()>>) {
        let config = Config::new()
            .with_resources(ResourceConfig::new().with_device(Device::Cpu))
            .with_preview(PreviewConfig::disabled());
        let mut service = CascadeService::synthetic(&config).unwrap();
        service.init().unwrap();
        let (worker_tx, worker) =
            spawn_worker(service, SeedController::with_source_seed(9), output_dir);
        (Arc::new(AppState { worker_tx }), worker)
    }

    async fn stop(state: SharedState, worker: JoinHandle<Result<()>>) {
        state.worker_tx.send(WorkerMessage::Shutdown).await.unwrap();
        tokio::task::spawn_blocking(move || worker.join())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_health_check() {
        let Json(body) = health_check().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_run_returns_images_and_seed() {
        let dir = tempfile::tempdir().unwrap();
        let (state, worker) = start(dir.path().join("outputs"));

        let request = RunRequest {
            request: GenerationRequest::new("a red cube")
                .with_size(512, 512)
                .with_seed(42),
            randomize_seed: false,
        };
        let Json(response) = run(State(state.clone()), Json(request)).await.unwrap();

        assert_eq!(response.seed, 42);
        assert_eq!(response.seeds, vec![42]);
        assert_eq!(response.images.len(), 1);
        assert_eq!(response.files.len(), 1);

        stop(state, worker).await;
    }

    #[tokio::test]
    async fn test_invalid_request_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (state, worker) = start(dir.path().join("outputs"));

        let request = RunRequest {
            request: GenerationRequest::new("x").with_size(500, 1024),
            randomize_seed: false,
        };
        let (status, Json(error)) = run(State(state.clone()), Json(request)).await.unwrap_err();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error.error_type, "invalid_request_error");
        assert!(!dir.path().join("outputs").exists());

        stop(state, worker).await;
    }

    #[tokio::test]
    async fn test_worker_gone_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let (state, worker) = start(dir.path().join("outputs"));
        state.worker_tx.send(WorkerMessage::Shutdown).await.unwrap();
        tokio::task::spawn_blocking(move || worker.join())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let request = RunRequest {
            request: GenerationRequest::new("x").with_size(512, 512),
            randomize_seed: true,
        };
        let (status, _) = run(State(state), Json(request)).await.unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
