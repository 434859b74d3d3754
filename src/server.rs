// HTTP front end: PUT / GET / DELETE by file name
use anyhow::Context;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, put};
use axum::Router;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::trace::TraceLayer;

use crate::engine::StorageEngine;
use crate::error::StorageError;
use crate::record::FileId;

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveResponse {
    pub id: FileId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error rendered as `{"error": ...}` with the matching status
#[derive(Debug)]
pub enum ApiError {
    MissingName,
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MissingName => (StatusCode::BAD_REQUEST, "missing file name".to_string()),
            ApiError::Storage(err) => {
                let status = StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if status.is_server_error() {
                    tracing::error!("Request failed: {}", err);
                } else {
                    tracing::debug!("Request rejected: {}", err);
                }
                (status, err.to_string())
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Build the router over a shared engine
pub fn router(engine: Arc<StorageEngine>) -> Router {
    Router::new()
        .route("/", any(missing_name))
        .route("/*name", put(save_file).get(read_file).delete(delete_file))
        .with_state(engine)
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` on `listen_addr` until `shutdown` resolves
pub async fn serve<F>(engine: Arc<StorageEngine>, listen_addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    Ok(())
}

async fn missing_name() -> ApiError {
    ApiError::MissingName
}

async fn save_file(
    State(engine): State<Arc<StorageEngine>>,
    Path(name): Path<String>,
    body: Body,
) -> Result<Json<SaveResponse>, ApiError> {
    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let reader = StreamReader::new(Box::pin(stream));

    let id = engine.save(&name, reader).await?;

    Ok(Json(SaveResponse { id }))
}

async fn read_file(
    State(engine): State<Arc<StorageEngine>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let info = engine.get_info_by_name(&name).await?;
    let file = engine.get_contents(&info.content_hash).await?;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn delete_file(
    State(engine): State<Arc<StorageEngine>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let info = engine.get_info_by_name(&name).await?;
    engine.delete(&info).await?;

    Ok(StatusCode::OK)
}
