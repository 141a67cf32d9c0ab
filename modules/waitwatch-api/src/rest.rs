use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, info, warn};

use waitwatch_store::{ListParams, ListQuery};
use waitwatch_sync::{parse_extraction_payload, SubmitOutcome};

use crate::AppState;

fn error_body(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// `GET /api/facilities?page=&pageSize=&search=&lat=&lon=&radius=`
pub async fn api_facilities(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let query = match ListQuery::parse(&params, state.services.query.config()) {
        Ok(q) => q,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.services.query.list(&query).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to list facilities");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list facilities")
        }
    }
}

/// `POST /api/observations/{label}` with the extractor's raw output as the
/// body.
pub async fn api_observations(
    State(state): State<Arc<AppState>>,
    Path(label): Path<String>,
    body: String,
) -> impl IntoResponse {
    let batch = parse_extraction_payload(&body, &label);
    match state.services.ingestor.ingest(&label, &batch).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!(source_label = label.as_str(), error = %e, "Observation ingest failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to ingest observations")
        }
    }
}

/// `POST /api/sync`: start a sync pass in the background.
pub async fn api_sync(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.services.submit_sync() {
        Ok(SubmitOutcome::Started(_)) => {
            info!("Sync submitted");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "status": "started" })),
            )
                .into_response()
        }
        Ok(SubmitOutcome::AlreadyRunning) => {
            error_body(StatusCode::CONFLICT, "Sync already in progress")
        }
        Err(e) => {
            warn!(error = %e, "Sync not available");
            error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}
