use crate::capture::status::{CaptureStatus, LastRecording, StatusReader};
use crate::store::clips::{validate_clip_name, ClipStore};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared by all handlers: the clip directory plus the capture status
/// snapshot (for the in-progress exclusion and `/status`).
#[derive(Clone)]
pub struct AppState {
    pub store: ClipStore,
    pub status: StatusReader,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub device: String,
    pub sample_rate: u32,
    pub record_duration: u32,
    pub queued: usize,
    pub last_recording: LastRecording,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/wavs", get(list_wavs))
        .route("/wavs/{name}", get(get_wav).delete(delete_wav))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the token fires; in-flight requests drain first.
pub async fn serve(bind: &str, state: AppState, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "pull-queue server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("pull-queue server stopped");
    Ok(())
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot: CaptureStatus = state.status.borrow().clone();
    let queued = state
        .store
        .list_ready(snapshot.in_progress.as_deref())
        .map(|names| names.len())
        .unwrap_or(0);
    Json(StatusResponse {
        device: snapshot.device,
        sample_rate: snapshot.sample_rate,
        record_duration: snapshot.record_duration,
        queued,
        last_recording: snapshot.last_recording,
    })
}

/// Ready filenames, oldest first. The clip currently being written is never
/// listed, which is the only synchronization between recorder and consumer.
async fn list_wavs(State(state): State<AppState>) -> Result<Json<Vec<String>>, StatusCode> {
    let in_progress = state.status.borrow().in_progress.clone();
    state
        .store
        .list_ready(in_progress.as_deref())
        .map(Json)
        .map_err(|e| {
            warn!(error = %e, "failed to list clip store");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_wav(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, StatusCode> {
    if validate_clip_name(&name).is_err() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let path = state
        .store
        .path_for(&name)
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let stream = ReaderStream::new(file);
    let response = Response::builder()
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{name}\""),
        )
        .body(Body::from_stream(stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(response)
}

/// Delete after the consumer confirms processing. Deleting an absent entry is
/// a 404 the caller treats as success, so repeated deletes are harmless.
async fn delete_wav(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, StatusCode> {
    if validate_clip_name(&name).is_err() {
        return Err(StatusCode::BAD_REQUEST);
    }
    match state.store.delete(&name) {
        Ok(true) => {
            info!(name = %name, "clip deleted on consumer confirmation");
            Ok(Json(serde_json::json!({ "deleted": name })).into_response())
        }
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!(name = %name, error = %e, "clip delete failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
