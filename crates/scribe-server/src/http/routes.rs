use super::{AppError, AppResult, AppState, JsonResponse};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use scribe_core::{BatchReport, Disposition, RunOutcome, Summary};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 100;

pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/summaries", get(search_summaries))
        .route("/summaries/*key", get(get_summary))
        .route("/admin/concurrency", put(set_concurrency));

    if state.http_events {
        router = router.route("/events", post(post_events));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

// --- Health ---

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    version: String,
    uptime_seconds: u64,
    gate: GateStatus,
    index: IndexStatus,
}

#[derive(Serialize)]
struct GateStatus {
    capacity: usize,
    in_flight: usize,
    leases_expired: u64,
}

#[derive(Serialize)]
struct IndexStatus {
    backend: String,
    documents: u64,
}

async fn health(State(state): State<AppState>) -> AppResult<Json<JsonResponse<HealthResponse>>> {
    let index = state.coordinator.index();
    let documents = index.count().await?;
    let gate = state.coordinator.gate();

    Ok(Json(JsonResponse::ok(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        gate: GateStatus {
            capacity: gate.capacity(),
            in_flight: gate.in_flight(),
            leases_expired: gate.expired_total(),
        },
        index: IndexStatus {
            backend: index.name().to_string(),
            documents,
        },
    })))
}

// --- Metrics ---

async fn metrics(State(state): State<AppState>) -> AppResult<Response> {
    let m = &state.metrics;
    let gate = state.coordinator.gate();

    m.gate_capacity.set(gate.capacity() as i64);
    m.gate_slots_held.set(gate.in_flight() as i64);
    m.gate_leases_expired.set(gate.expired_total() as i64);
    m.uptime_seconds.set(state.start_time.elapsed().as_secs() as i64);
    match state.coordinator.index().count().await {
        Ok(count) => {
            m.indexed_documents.set(count as i64);
        }
        Err(e) => tracing::warn!("Index count unavailable for metrics: {}", e),
    }

    let body = m.render()?;
    Ok((
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response())
}

// --- Summaries ---

async fn get_summary(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<JsonResponse<Summary>>> {
    match state.coordinator.index().get(&key).await? {
        Some(summary) => Ok(Json(JsonResponse::ok(summary))),
        None => Err(AppError::not_found(format!("No summary for {}", key))),
    }
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

async fn search_summaries(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<JsonResponse<Vec<Summary>>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);
    let hits = state.coordinator.index().search(&params.q, limit).await?;
    Ok(Json(JsonResponse::ok(hits)))
}

// --- Admin ---

#[derive(Deserialize)]
struct ConcurrencyRequest {
    max_concurrency: usize,
}

#[derive(Serialize)]
struct ConcurrencyResponse {
    max_concurrency: usize,
    in_flight: usize,
}

async fn set_concurrency(
    State(state): State<AppState>,
    Json(req): Json<ConcurrencyRequest>,
) -> AppResult<Json<JsonResponse<ConcurrencyResponse>>> {
    let gate = state.coordinator.gate();
    gate.set_capacity(req.max_concurrency)
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    tracing::info!("max_concurrency set to {}", req.max_concurrency);

    Ok(Json(JsonResponse::ok(ConcurrencyResponse {
        max_concurrency: gate.capacity(),
        in_flight: gate.in_flight(),
    })))
}

// --- Webhook ---

#[derive(Serialize)]
struct RunView {
    run_id: String,
    bucket: String,
    key: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    stage: &'static str,
}

#[derive(Serialize)]
struct EventsResponse {
    indexed: usize,
    runs: Vec<RunView>,
    rejected: Vec<String>,
}

impl From<&BatchReport> for EventsResponse {
    fn from(batch: &BatchReport) -> Self {
        let runs = batch
            .runs
            .iter()
            .map(|r| {
                let stage = match &r.outcome {
                    RunOutcome::Indexed { .. } => r.last_stage,
                    RunOutcome::Fatal(f) | RunOutcome::Retryable(f) => f.stage,
                };
                RunView {
                    run_id: r.run_id.to_string(),
                    bucket: r.event.bucket.clone(),
                    key: r.event.key.clone(),
                    status: r.outcome.status(),
                    reason: r.outcome.reason(),
                    stage: stage.as_str(),
                }
            })
            .collect();

        Self {
            indexed: batch.indexed(),
            runs,
            rejected: batch.rejected.iter().map(|f| f.message.clone()).collect(),
        }
    }
}

/// 200 when the notification is consumed, 503 with `Retry-After` when any
/// run should be re-delivered, 400 when nothing in it could be understood.
async fn post_events(State(state): State<AppState>, body: Bytes) -> Response {
    let batch = state.coordinator.handle_notification(&body).await;
    let payload = EventsResponse::from(&batch);

    if batch.runs.is_empty() && !batch.rejected.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(JsonResponse::<()>::err(payload.rejected.join("; "))),
        )
            .into_response();
    }

    match batch.disposition() {
        Disposition::Ack => (StatusCode::OK, Json(JsonResponse::ok(payload))).into_response(),
        Disposition::Nack => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, state.retry_after_secs.to_string())],
            Json(JsonResponse::ok(payload)),
        )
            .into_response(),
    }
}
