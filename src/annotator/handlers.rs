use super::protocol::*;
use super::service::Annotator;
use crate::candidate::types::Split;
use crate::error::AnnotatorError;

use axum::routing::{get, post};
use axum::{Extension, Json, Router, http::StatusCode};
use std::sync::Arc;

/// Routes of the annotator HTTP surface.
pub fn router(annotator: Arc<Annotator>) -> Router {
    Router::new()
        .route(ENDPOINT_APPLY, post(handle_apply))
        .route(ENDPOINT_CACHE, get(handle_cache_status))
        .route(ENDPOINT_FUNCTIONS, get(handle_list_functions))
        .layer(Extension(annotator))
}

fn status_for(error: &AnnotatorError) -> StatusCode {
    match error {
        AnnotatorError::CacheMiss(_) => StatusCode::NOT_FOUND,
        AnnotatorError::StaleCache { .. } => StatusCode::CONFLICT,
        AnnotatorError::UnknownFunction(_) | AnnotatorError::InvalidInput(_) => {
            StatusCode::BAD_REQUEST
        }
        AnnotatorError::LfExecution { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AnnotatorError::WorkerUnavailable(_) | AnnotatorError::BroadcastUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn handle_apply(
    Extension(annotator): Extension<Arc<Annotator>>,
    Json(req): Json<ApplyRequest>,
) -> (StatusCode, Json<ApplyResponse>) {
    let split = Split::new(req.split);

    let handle = match annotator.handle_for(&req.set_name, &split).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!("Apply request for unknown set {}@{}: {}", req.set_name, split, e);
            return (status_for(&e), Json(ApplyResponse::failed(e.to_string())));
        }
    };

    let mode = req.mode.unwrap_or(annotator.config().failure_mode);
    let run = match annotator
        .apply_with_mode(&handle, &req.functions, mode)
        .await
    {
        Ok(run) => run,
        Err(e) => {
            tracing::error!("Apply on {} failed: {}", handle.key, e);
            return (status_for(&e), Json(ApplyResponse::failed(e.to_string())));
        }
    };

    match annotator.report(&run.matrix, None) {
        Ok(report) => (
            StatusCode::OK,
            Json(ApplyResponse {
                success: true,
                run_id: Some(run.run_id.to_string()),
                report: Some(report),
                faults: run.faults.iter().cloned().collect(),
                error: None,
            }),
        ),
        Err(e) => (status_for(&e), Json(ApplyResponse::failed(e.to_string()))),
    }
}

pub async fn handle_cache_status(
    Extension(annotator): Extension<Arc<Annotator>>,
) -> (StatusCode, Json<CacheStatusResponse>) {
    (
        StatusCode::OK,
        Json(CacheStatusResponse {
            handles: annotator.cached_handles(),
            distributions: annotator.distribution_count(),
            transport: annotator.transport(),
        }),
    )
}

pub async fn handle_list_functions(
    Extension(annotator): Extension<Arc<Annotator>>,
) -> (StatusCode, Json<FunctionListResponse>) {
    (
        StatusCode::OK,
        Json(FunctionListResponse {
            functions: annotator.registry().list_functions(),
        }),
    )
}
