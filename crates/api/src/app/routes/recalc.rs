//! Admin endpoints driving the recalculation job.
//!
//! The recalculator and its stores are synchronous, so every handler runs
//! its work on the blocking pool.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::error;

use recalc_engine::Recalculator;
use recalc_infra::{TaskScheduler, TaskStore};

use crate::app::dto::{ProgressResponse, QueueResponse};
use crate::app::errors::{json_error, recalc_error_to_response};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/start", post(start))
        .route("/status", get(status))
        .route("/clear", post(clear))
        .route("/tasks", get(tasks))
}

/// Start (or restart) a job. The response carries the fresh state; batches
/// run in the background.
pub async fn start(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match blocking(services.recalc.clone(), |recalc| recalc.start()).await {
        Ok(Ok(state)) => (
            StatusCode::ACCEPTED,
            Json(ProgressResponse::from(state).with_message("Recalculation started.")),
        )
            .into_response(),
        Ok(Err(e)) => recalc_error_to_response(e),
        Err(res) => res,
    }
}

pub async fn status(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match blocking(services.recalc.clone(), |recalc| recalc.progress()).await {
        Ok(progress) => Json(ProgressResponse::from(progress)).into_response(),
        Err(res) => res,
    }
}

pub async fn clear(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match blocking(services.recalc.clone(), |recalc| recalc.clear()).await {
        Ok(Ok(state)) => {
            Json(ProgressResponse::from(state).with_message("Relevance data cleared.")).into_response()
        }
        Ok(Err(e)) => recalc_error_to_response(e),
        Err(res) => res,
    }
}

/// Queue counters for the batch tasks.
pub async fn tasks(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.tasks().stats() {
        Ok(tasks) => Json(QueueResponse {
            scheduler_available: services.scheduler.is_available(),
            tasks,
        })
        .into_response(),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "task_store_error", e.to_string()),
    }
}

async fn blocking<T, F>(recalc: Arc<Recalculator>, f: F) -> Result<T, Response>
where
    F: FnOnce(&Recalculator) -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&recalc))
        .await
        .map_err(|e| {
            error!(error = %e, "recalculation handler panicked");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        })
}
