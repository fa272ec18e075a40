//! ---
//! ingest_section: "03-observability"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Producer status, manual re-run, and dead-letter routes."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use crm_ingest_publisher::DeadLetter;
use crm_ingest_scheduler::{ProducerStatus, SchedulerError, SchedulerView};
use serde_json::json;
use tracing::info;

/// Routes merged next to `/metrics` on the daemon's HTTP server.
pub fn router(view: SchedulerView) -> Router {
    Router::new()
        .route("/producers", get(list_producers))
        .route("/producers/:name", get(get_producer))
        .route("/producers/:name/run", post(run_producer))
        .route("/dead-letters", get(list_dead_letters))
        .with_state(view)
}

async fn list_producers(State(view): State<SchedulerView>) -> Json<Vec<ProducerStatus>> {
    Json(view.statuses())
}

async fn get_producer(State(view): State<SchedulerView>, Path(name): Path<String>) -> Response {
    match view.status(&name) {
        Some(status) => Json(status).into_response(),
        None => not_found(&name),
    }
}

async fn run_producer(State(view): State<SchedulerView>, Path(name): Path<String>) -> Response {
    match view.trigger(&name) {
        Ok(()) => {
            info!(source = %name, "manual run requested");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "accepted": true, "source": name })),
            )
                .into_response()
        }
        Err(SchedulerError::UnknownProducer(_)) => not_found(&name),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn list_dead_letters(State(view): State<SchedulerView>) -> Json<Vec<DeadLetter>> {
    Json(view.dead_letters())
}

fn not_found(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("no producer named '{}'", name) })),
    )
        .into_response()
}
